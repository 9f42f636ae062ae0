//! Dirty-region tracking
//!
//! Every completed write lands either on the GPU surface or in a system-side
//! backing; the tracker records which side went stale. For scanout targets
//! it additionally routes damage between the presented and pending region
//! sets, flushing queued work whenever a write would race a present queued
//! in the opposite direction.

use alloc::sync::Arc;

use crate::pixmap::Pixmap;
use crate::region::Region;
use crate::Saa;

impl Saa {
    /// Record that `damage` was just written, on the GPU surface
    /// (`hw = true`) or in a system-side backing (`hw = false`).
    pub fn damage(&self, pixmap: &Arc<Pixmap>, hw: bool, damage: &Region) {
        let mut flush_first = false;

        {
            let mut state = pixmap.state.lock();
            let damage = damage.intersect_rect(state.info.extent());
            if damage.is_empty() {
                return;
            }

            if state.damage {
                if hw {
                    state.dirty_hw.union(&damage);
                    state.dirty_shadow.subtract(&damage);
                } else {
                    state.dirty_shadow.union(&damage);
                    state.dirty_hw.subtract(&damage);
                }
            }

            if let Some(present) = &mut state.present {
                if hw {
                    if !present.present_damage.is_empty() {
                        // A present-copy just landed here; fold it into the
                        // presented tracking set.
                        present.dirty_present.union(&damage);
                        present.present_damage.clear();
                        return;
                    }
                    flush_first = present.pending_update.overlaps(&damage);
                } else {
                    flush_first = present.pending_present.overlaps(&damage);
                }
            } else {
                return;
            }
        }

        if flush_first {
            // The same pixels are queued for the opposite direction; let the
            // queued work land before the new damage supersedes it.
            self.flush_scanouts();
        }

        let mut state = pixmap.state.lock();
        let damage = damage.intersect_rect(state.info.extent());
        if let Some(present) = &mut state.present {
            if hw {
                present.pending_present.union(&damage);
            } else {
                present.pending_update.union(&damage);
            }
            present.dirty_present.subtract(&damage);
        }
    }
}

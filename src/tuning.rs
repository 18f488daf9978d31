//! # Affinity / Priority Tuning
//!
//! Applies one affinity mask and the high priority class to every running
//! instance of a game executable. Individual processes that refuse to open
//! (access denied, exited mid-enumeration) are skipped; the batch carries on.

use log::{debug, warn};

use crate::mask::{self, AffinityMask};
use crate::process_list::find_process_ids;
use crate::system::ProcessController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningReport {
    /// Processes we managed to open. Counted once opened, even if a set call then failed.
    pub processes_changed: usize,
    /// Processes that matched the executable name.
    pub processes_seen: usize,
    pub mask_used: AffinityMask,
}

pub fn apply(
    processes: &(impl ProcessController + ?Sized),
    exe_name: &str,
    mask_hex: &str,
    apply_affinity: bool,
    apply_priority: bool,
) -> TuningReport {
    let mask_used = mask::resolve(mask_hex);
    apply_mask(processes, exe_name, mask_used, apply_affinity, apply_priority)
}

/// Same as [`apply`] with an already resolved mask.
pub fn apply_mask(
    processes: &(impl ProcessController + ?Sized),
    exe_name: &str,
    mask_used: AffinityMask,
    apply_affinity: bool,
    apply_priority: bool,
) -> TuningReport {
    let mut processes_changed = 0;
    let mut processes_seen = 0;

    for found in find_process_ids(processes, exe_name) {
        processes_seen += 1;
        let mut handle = match processes.open(found.pid) {
            Ok(h) => h,
            Err(e) => {
                debug!("Skipping {} ({}): {}", found.exe_name, found.pid, e);
                continue;
            }
        };

        if apply_affinity {
            if let Err(e) = handle.set_affinity(mask_used) {
                warn!("{}", e);
            }
        }
        if apply_priority {
            if let Err(e) = handle.set_high_priority() {
                warn!("{}", e);
            }
        }
        processes_changed += 1;
        debug!("Tuned {} ({})", found.exe_name, handle.pid());
    }

    TuningReport {
        processes_changed,
        processes_seen,
        mask_used,
    }
}

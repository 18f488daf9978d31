use log::debug;

use crate::system::{ProcessController, exe_name_matches};

/// A running process whose image name matched the one we were looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMatch {
    pub pid: u32,
    pub exe_name: String,
}

/// Lists the processes whose image file name equals `exe_name`, ignoring case.
///
/// Every call takes a fresh snapshot. A snapshot failure yields nothing: at this
/// layer "not running" and "could not look" are the same answer, and callers
/// that care poll with a deadline.
pub fn find_process_ids(
    processes: &(impl ProcessController + ?Sized),
    exe_name: &str,
) -> impl Iterator<Item = ProcessMatch> {
    let entries = processes.snapshot().unwrap_or_else(|e| {
        debug!("Process snapshot failed: {}", e);
        Vec::new()
    });
    let wanted = exe_name.to_lowercase();
    entries
        .into_iter()
        .filter(move |entry| exe_name_matches(&entry.exe_name, &wanted))
        .map(|entry| ProcessMatch {
            pid: entry.pid,
            exe_name: entry.exe_name,
        })
}

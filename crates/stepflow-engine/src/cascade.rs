//! Cascade resolution: which ordering group opens after a close.
//!
//! These functions only change task statuses in memory. The engine records
//! history, dispatches automatic tasks and persists the process afterwards.

use tracing::debug;

use stepflow_core::{Process, TaskId, TaskStatus};

/// Returns true if every task at `ordering` is DONE.
pub fn group_done(process: &Process, ordering: i32) -> bool {
    process.tasks_at(ordering).all(|t| t.status == TaskStatus::Done)
}

/// The smallest ordering above `ordering` that still has unfinished tasks.
/// Tasks frozen by a correction count as unfinished.
pub fn next_group(process: &Process, ordering: i32) -> Option<i32> {
    process
        .tasks()
        .iter()
        .filter(|t| t.ordering > ordering && t.status != TaskStatus::Done)
        .map(|t| t.ordering)
        .min()
}

/// Open the LOCKED tasks at `ordering` and return the ones that changed.
///
/// Tasks frozen by a correction open too, with their flag cleared, once no
/// correction target at or below `ordering` is still OPEN or INWORK. Tasks
/// already OPEN or further along are left alone.
pub fn open_group(process: &mut Process, ordering: i32) -> Vec<TaskId> {
    let release = !process.correction_pending_up_to(ordering);
    let mut opened = Vec::new();
    for task in process.tasks_mut() {
        if task.ordering != ordering {
            continue;
        }
        let changed = if task.is_correction_flagged {
            release && task.release_correction()
        } else {
            task.unlock()
        };
        if changed {
            opened.push(task.id.clone());
        }
    }
    opened
}

/// Returns true if the only unfinished tasks at `ordering` are frozen by a
/// correction, which happens when the target of a correction shares its
/// group with tasks it froze.
fn only_frozen_left(process: &Process, ordering: i32) -> bool {
    let mut frozen = false;
    for task in process.tasks_at(ordering) {
        if task.is_correction_locked() {
            frozen = true;
        } else if task.status != TaskStatus::Done {
            return false;
        }
    }
    frozen
}

/// Run one cascade pass for a task just closed at `ordering`.
///
/// Opens at most one ordering group, and only once every sibling at
/// `ordering` is DONE. Siblings still frozen by a finished correction are
/// opened instead. Running it again on an unchanged process opens nothing.
pub fn resolve(process: &mut Process, ordering: i32) -> Vec<TaskId> {
    if only_frozen_left(process, ordering) {
        let opened = open_group(process, ordering);
        debug!(process_id = %process.id, ordering, opened = opened.len(), "Cascade released frozen siblings");
        return opened;
    }
    if !group_done(process, ordering) {
        debug!(process_id = %process.id, ordering, "Siblings outstanding, cascade stops");
        return Vec::new();
    }
    let Some(next) = next_group(process, ordering) else {
        debug!(process_id = %process.id, ordering, "No further group to open");
        return Vec::new();
    };
    let opened = open_group(process, next);
    debug!(process_id = %process.id, ordering = next, opened = opened.len(), "Cascade opened group");
    opened
}

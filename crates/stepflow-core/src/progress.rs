//! Process completion derived from task statuses.

use serde::{Deserialize, Serialize};

use crate::{Task, TaskStatus};

/// Share of tasks per status, in whole percent.
///
/// Each part is truncated independently, so the parts may sum to less than
/// 100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub done: u8,
    pub in_work: u8,
    pub open: u8,
    pub locked: u8,
}

impl Progress {
    /// Compute the progress of a set of tasks.
    pub fn of<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let (mut done, mut in_work, mut open, mut locked) = (0u32, 0u32, 0u32, 0u32);
        for task in tasks {
            match task.status {
                TaskStatus::Done => done += 1,
                TaskStatus::Inwork => in_work += 1,
                TaskStatus::Open => open += 1,
                TaskStatus::Locked => locked += 1,
            }
        }

        let total = done + in_work + open + locked;
        if total == 0 {
            return Self {
                locked: 100,
                ..Self::default()
            };
        }

        let pct = |n: u32| (n * 100 / total) as u8;
        Self {
            done: pct(done),
            in_work: pct(in_work),
            open: pct(open),
            locked: pct(locked),
        }
    }

    /// Zero-padded `done|in_work|open` key used to sort processes.
    pub fn sort_key(&self) -> String {
        format!("{:03}{:03}{:03}", self.done, self.in_work, self.open)
    }

    /// Returns true if every task is done.
    pub fn is_complete(&self) -> bool {
        self.done == 100
    }
}

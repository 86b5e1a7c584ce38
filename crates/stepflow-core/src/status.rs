//! Status enums for Tasks.

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Processing status of a Task.
///
/// The numeric codes (see [`TaskStatus::code`]) are the storage values and
/// must not change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Not yet reachable, or frozen by an open correction.
    #[default]
    Locked,
    /// Available to be taken over.
    Open,
    /// Taken over by an actor and being worked on.
    Inwork,
    /// Finished.
    Done,
}

impl TaskStatus {
    /// Storage code of this status.
    pub fn code(&self) -> u8 {
        match self {
            Self::Locked => 0,
            Self::Open => 1,
            Self::Inwork => 2,
            Self::Done => 3,
        }
    }

    /// Parse a storage code.
    pub fn from_code(code: u8) -> Result<Self, CoreError> {
        match code {
            0 => Ok(Self::Locked),
            1 => Ok(Self::Open),
            2 => Ok(Self::Inwork),
            3 => Ok(Self::Done),
            other => Err(CoreError::UnknownStatusCode(other)),
        }
    }

    /// The next status in the forward direction, if any.
    pub fn up(&self) -> Option<Self> {
        match self {
            Self::Locked => Some(Self::Open),
            Self::Open => Some(Self::Inwork),
            Self::Inwork => Some(Self::Done),
            Self::Done => None,
        }
    }

    /// The previous status, if any.
    pub fn down(&self) -> Option<Self> {
        match self {
            Self::Locked => None,
            Self::Open => Some(Self::Locked),
            Self::Inwork => Some(Self::Open),
            Self::Done => Some(Self::Inwork),
        }
    }

    /// Returns true if the task currently sits on the active frontier.
    pub fn is_current(&self) -> bool {
        matches!(self, Self::Open | Self::Inwork)
    }

    /// Short name used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "LOCKED",
            Self::Open => "OPEN",
            Self::Inwork => "INWORK",
            Self::Done => "DONE",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the last transition of a task was made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EditType {
    /// Never edited.
    #[default]
    Unset,
    /// A user acting on a single task.
    Manual,
    /// A user acting on a whole batch.
    ManualBatch,
    /// An administrative status override.
    Admin,
    /// The engine itself (cascade, scripts).
    Automatic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for status in [
            TaskStatus::Locked,
            TaskStatus::Open,
            TaskStatus::Inwork,
            TaskStatus::Done,
        ] {
            assert_eq!(TaskStatus::from_code(status.code()).unwrap(), status);
        }
        assert!(TaskStatus::from_code(4).is_err());
    }

    #[test]
    fn test_up_and_down_are_bounded() {
        assert_eq!(TaskStatus::Done.up(), None);
        assert_eq!(TaskStatus::Locked.down(), None);
        assert_eq!(TaskStatus::Open.up(), Some(TaskStatus::Inwork));
        assert_eq!(TaskStatus::Done.down(), Some(TaskStatus::Inwork));
    }

    #[test]
    fn test_serde_uses_screaming_case() {
        let json = serde_json::to_string(&TaskStatus::Inwork).unwrap();
        assert_eq!(json, "\"INWORK\"");
    }
}

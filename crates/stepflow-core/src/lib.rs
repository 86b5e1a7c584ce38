//! stepflow Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Persistence
//! - Script execution
//! - Runtime specifics
//!
//! Tasks carry their own single-task transitions; everything that spans
//! several tasks or needs collaborators lives in `stepflow-engine`.

pub mod error;
pub mod history;
pub mod ids;
pub mod process;
pub mod progress;
pub mod property;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use history::{HistoryEvent, HistoryEventType};
pub use ids::{Actor, BatchId, ProcessId, PropertyId, TaskId};
pub use process::Process;
pub use progress::Progress;
pub use property::{Property, PropertyOwner, PropertyType};
pub use status::{EditType, TaskStatus};
pub use task::{ScriptSpec, Task};

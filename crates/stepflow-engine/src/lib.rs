//! stepflow engine
//!
//! Moves processes through their ordered tasks: single-task transitions,
//! the cascade that opens the next ordering group, the problem/solution
//! correction protocol and batch operations across processes.
//!
//! Persistence, history, properties, content checks and script execution
//! are collaborators behind traits; [`MemoryStore`] and
//! [`CommandScriptRunner`] are the implementations shipped here.

pub mod automatic;
pub mod batch;
pub mod cascade;
pub mod checks;
pub mod config;
pub mod correction;
pub mod engine;
pub mod error;
pub mod events;
pub mod locks;
pub mod metrics;
pub mod script;
pub mod store;
pub mod transition;

pub use automatic::AutomaticJob;
pub use batch::{BatchGroup, BatchMember, BatchReport, MemberOutcome, MemberResult};
pub use checks::{AcceptAll, CheckKind, ContentChecks};
pub use config::{ConfigError, EngineConfig, ScriptConfig};
pub use correction::{ProblemReport, ProblemSolution};
pub use engine::{Collaborators, Engine};
pub use error::{EngineError, EngineResult, StoreError};
pub use events::EngineEvent;
pub use metrics::collect_metrics;
pub use script::{CommandScriptRunner, ScriptError, ScriptRunner};
pub use store::{HistorySink, MemoryStore, PropertyStore, StoreSnapshot, WorkflowStore};
pub use transition::{CloseMode, CloseReport};

//! Content checks run before a validated close.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stepflow_core::{Process, Task};

use crate::config::EngineConfig;

/// Which content check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Metadata,
    Images,
    Properties,
}

/// Validation collaborators.
#[async_trait]
pub trait ContentChecks: Send + Sync {
    async fn validate_metadata(&self, process: &Process) -> bool;

    async fn validate_images(&self, process: &Process) -> bool;

    async fn validate_properties(&self, task: &Task) -> bool;

    /// Current number of images for the process, if known.
    async fn count_images(&self, _process: &Process) -> Option<u32> {
        None
    }
}

/// Checks that always pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

#[async_trait]
impl ContentChecks for AcceptAll {
    async fn validate_metadata(&self, _process: &Process) -> bool {
        true
    }

    async fn validate_images(&self, _process: &Process) -> bool {
        true
    }

    async fn validate_properties(&self, _task: &Task) -> bool {
        true
    }
}

/// Run the checks that apply to closing `task` and return the failed ones.
///
/// Metadata is only checked for metadata tasks and only when metadata
/// validation is enabled; images only for image-writing tasks. Required
/// properties are always checked.
pub async fn run_close_checks(
    checks: &dyn ContentChecks,
    config: &EngineConfig,
    process: &Process,
    task: &Task,
) -> Vec<CheckKind> {
    let mut failed = Vec::new();
    if task.edits_metadata
        && config.metadata_validation
        && !checks.validate_metadata(process).await
    {
        failed.push(CheckKind::Metadata);
    }
    if task.writes_images && !checks.validate_images(process).await {
        failed.push(CheckKind::Images);
    }
    if !checks.validate_properties(task).await {
        failed.push(CheckKind::Properties);
    }
    failed
}

//! Prometheus metrics collection and formatting.
//!
//! This module renders the state of all processes in Prometheus text
//! exposition format.

use std::fmt::Write;

use stepflow_core::TaskStatus;

use crate::error::EngineResult;
use crate::store::WorkflowStore;

/// Collect all metrics from the store and format as Prometheus text.
pub async fn collect_metrics(store: &dyn WorkflowStore) -> EngineResult<String> {
    let mut processes = 0u64;
    let mut complete = 0u64;
    let mut images = 0u64;
    let (mut locked, mut open, mut inwork, mut done) = (0u64, 0u64, 0u64, 0u64);
    let mut corrections = 0u64;

    for id in store.list_processes().await? {
        let process = store.load_process(&id).await?;
        processes += 1;
        if process.progress.is_complete() {
            complete += 1;
        }
        images += u64::from(process.image_count.unwrap_or(0));

        for task in process.tasks() {
            match task.status {
                TaskStatus::Locked => locked += 1,
                TaskStatus::Open => open += 1,
                TaskStatus::Inwork => inwork += 1,
                TaskStatus::Done => done += 1,
            }
            if task.is_correction_flagged {
                corrections += 1;
            }
        }
    }

    let mut output = String::new();
    writeln!(output, "# HELP stepflow_processes_total Number of processes").ok();
    writeln!(output, "# TYPE stepflow_processes_total gauge").ok();
    writeln!(output, "stepflow_processes_total {processes}").ok();
    writeln!(output, "stepflow_processes_complete {complete}").ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP stepflow_tasks_total Total number of tasks by status"
    )
    .ok();
    writeln!(output, "# TYPE stepflow_tasks_total gauge").ok();
    writeln!(output, "stepflow_tasks_total{{status=\"locked\"}} {locked}").ok();
    writeln!(output, "stepflow_tasks_total{{status=\"open\"}} {open}").ok();
    writeln!(output, "stepflow_tasks_total{{status=\"inwork\"}} {inwork}").ok();
    writeln!(output, "stepflow_tasks_total{{status=\"done\"}} {done}").ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP stepflow_tasks_correction_flagged Tasks affected by an open correction"
    )
    .ok();
    writeln!(output, "# TYPE stepflow_tasks_correction_flagged gauge").ok();
    writeln!(output, "stepflow_tasks_correction_flagged {corrections}").ok();

    writeln!(output).ok();
    writeln!(output, "# HELP stepflow_images_total Images counted over all processes").ok();
    writeln!(output, "# TYPE stepflow_images_total gauge").ok();
    writeln!(output, "stepflow_images_total {images}").ok();

    Ok(output)
}

//! Process definition files read by `stepflow init`.

use serde::Deserialize;

use stepflow_core::{BatchId, CoreError, Process, ProcessId, ScriptSpec, Task};

/// A process as written in a definition file.
#[derive(Debug, Deserialize)]
pub struct ProcessDefinition {
    #[serde(default)]
    pub id: Option<ProcessId>,
    pub title: String,
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    pub tasks: Vec<TaskDefinition>,
}

/// A task as written in a definition file.
#[derive(Debug, Deserialize)]
pub struct TaskDefinition {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub ordering: i32,
    #[serde(default)]
    pub script: Option<ScriptSpec>,
    #[serde(default)]
    pub automatic: bool,
    #[serde(default)]
    pub finish_immediately: bool,
    #[serde(default)]
    pub batch_eligible: bool,
    #[serde(default)]
    pub validate_on_close: bool,
    #[serde(default)]
    pub edits_metadata: bool,
    #[serde(default)]
    pub writes_images: bool,
}

impl ProcessDefinition {
    /// Build the process; the first ordering group starts OPEN.
    pub fn into_process(self) -> Result<Process, CoreError> {
        let id = self.id.unwrap_or_else(ProcessId::generate);
        let mut tasks = Vec::with_capacity(self.tasks.len());
        for def in self.tasks {
            if def.automatic && def.script.is_none() {
                return Err(CoreError::InvalidInput(format!(
                    "automatic task '{}' has no script",
                    def.title
                )));
            }

            let mut task = Task::new(id.clone(), def.title, def.ordering);
            if let Some(task_id) = def.id {
                task = task.with_id(task_id);
            }
            task.script = def.script;
            task.is_automatic = def.automatic;
            task.is_finish_immediately = def.finish_immediately;
            task.is_batch_eligible = def.batch_eligible;
            task.requires_validation_on_close = def.validate_on_close;
            task.edits_metadata = def.edits_metadata;
            task.writes_images = def.writes_images;
            tasks.push(task);
        }

        let process = Process::with_id(id, self.title, tasks)?;
        Ok(match self.batch_id {
            Some(batch) => process.with_batch(batch),
            None => process,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_core::TaskStatus;

    #[test]
    fn test_definition_builds_process() {
        let json = r#"{
            "id": "vol-1",
            "title": "Volume 1",
            "batch_id": "run-7",
            "tasks": [
                {"id": "scan", "title": "Scan", "ordering": 1, "batch_eligible": true},
                {"id": "ocr", "title": "OCR", "ordering": 2, "automatic": true,
                 "script": {"name": "ocr", "command": "ocr {processid}"}},
                {"id": "qc", "title": "QC", "ordering": 3, "validate_on_close": true}
            ]
        }"#;
        let def: ProcessDefinition = serde_json::from_str(json).unwrap();
        let process = def.into_process().unwrap();

        assert_eq!(process.id, ProcessId::new("vol-1"));
        assert_eq!(process.batch_id, Some(BatchId::new("run-7")));
        assert_eq!(process.tasks()[0].status, TaskStatus::Open);
        assert!(process.tasks()[0].is_batch_eligible);
        assert!(process.tasks()[1].is_automatic);
        assert!(process.tasks()[2].requires_validation_on_close);
    }

    #[test]
    fn test_automatic_without_script_rejected() {
        let json = r#"{"title": "x", "tasks": [{"title": "OCR", "ordering": 1, "automatic": true}]}"#;
        let def: ProcessDefinition = serde_json::from_str(json).unwrap();
        assert!(def.into_process().is_err());
    }
}

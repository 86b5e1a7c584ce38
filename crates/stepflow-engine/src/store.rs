//! Persistence, history and property collaborators.
//!
//! The engine only talks to these traits. [`MemoryStore`] implements all of
//! them on top of in-process maps and can be saved to and restored from a
//! serde snapshot.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use stepflow_core::{
    BatchId, HistoryEvent, Process, ProcessId, Property, PropertyId, PropertyOwner, Task, TaskId,
};

use crate::error::StoreError;

/// Task and process persistence.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn load_task(&self, id: &TaskId) -> Result<Task, StoreError>;

    async fn save_task(&self, task: &Task) -> Result<(), StoreError>;

    async fn load_process(&self, id: &ProcessId) -> Result<Process, StoreError>;

    async fn save_process(&self, process: &Process) -> Result<(), StoreError>;

    /// Ids of all processes carrying the given batch id.
    async fn processes_in_batch(&self, batch: &BatchId) -> Result<Vec<ProcessId>, StoreError>;

    async fn list_processes(&self) -> Result<Vec<ProcessId>, StoreError>;
}

/// Receives process history events.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn append_event(&self, event: HistoryEvent) -> Result<(), StoreError>;
}

/// Property CRUD for processes and tasks.
#[async_trait]
pub trait PropertyStore: Send + Sync {
    async fn properties(&self, owner: &PropertyOwner) -> Result<Vec<Property>, StoreError>;

    /// Insert the property, or replace the one with the same id.
    async fn put_property(&self, owner: &PropertyOwner, property: Property)
        -> Result<(), StoreError>;

    async fn remove_property(
        &self,
        owner: &PropertyOwner,
        id: &PropertyId,
    ) -> Result<(), StoreError>;
}

/// Properties of one owner, as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedProperties {
    pub owner: PropertyOwner,
    pub properties: Vec<Property>,
}

/// Serializable content of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub processes: Vec<Process>,
    #[serde(default)]
    pub history: Vec<HistoryEvent>,
    #[serde(default)]
    pub properties: Vec<OwnedProperties>,
}

/// In-memory implementation of all collaborator stores.
#[derive(Default)]
pub struct MemoryStore {
    processes: RwLock<HashMap<ProcessId, Process>>,
    task_index: RwLock<HashMap<TaskId, ProcessId>>,
    history: RwLock<Vec<HistoryEvent>>,
    properties: RwLock<HashMap<PropertyOwner, Vec<Property>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a store from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut processes = HashMap::new();
        let mut task_index = HashMap::new();
        for process in snapshot.processes {
            for task in process.tasks() {
                task_index.insert(task.id.clone(), process.id.clone());
            }
            processes.insert(process.id.clone(), process);
        }

        let properties = snapshot
            .properties
            .into_iter()
            .map(|entry| (entry.owner, entry.properties))
            .collect();

        Self {
            processes: RwLock::new(processes),
            task_index: RwLock::new(task_index),
            history: RwLock::new(snapshot.history),
            properties: RwLock::new(properties),
        }
    }

    /// Copy the current content into a snapshot. Processes are sorted by id
    /// so snapshots are stable.
    pub async fn snapshot(&self) -> StoreSnapshot {
        let mut processes: Vec<Process> = self.processes.read().await.values().cloned().collect();
        processes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut properties: Vec<OwnedProperties> = self
            .properties
            .read()
            .await
            .iter()
            .filter(|(_, props)| !props.is_empty())
            .map(|(owner, props)| OwnedProperties {
                owner: owner.clone(),
                properties: props.clone(),
            })
            .collect();
        properties.sort_by_key(|entry| match &entry.owner {
            PropertyOwner::Process(id) => (0, id.to_string()),
            PropertyOwner::Task(id) => (1, id.to_string()),
        });

        StoreSnapshot {
            processes,
            history: self.history.read().await.clone(),
            properties,
        }
    }

    /// History events recorded for a process, oldest first.
    pub async fn history_of(&self, process: &ProcessId) -> Vec<HistoryEvent> {
        self.history
            .read()
            .await
            .iter()
            .filter(|e| &e.process_id == process)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn load_task(&self, id: &TaskId) -> Result<Task, StoreError> {
        let process_id = self
            .task_index
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        let processes = self.processes.read().await;
        processes
            .get(&process_id)
            .and_then(|p| p.task(id))
            .cloned()
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))
    }

    async fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut processes = self.processes.write().await;
        let process = processes
            .get_mut(&task.process_id)
            .ok_or_else(|| StoreError::ProcessNotFound(task.process_id.clone()))?;
        process
            .replace_task(task.clone())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn load_process(&self, id: &ProcessId) -> Result<Process, StoreError> {
        self.processes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ProcessNotFound(id.clone()))
    }

    async fn save_process(&self, process: &Process) -> Result<(), StoreError> {
        {
            let mut index = self.task_index.write().await;
            for task in process.tasks() {
                index.insert(task.id.clone(), process.id.clone());
            }
        }
        self.processes
            .write()
            .await
            .insert(process.id.clone(), process.clone());
        Ok(())
    }

    async fn processes_in_batch(&self, batch: &BatchId) -> Result<Vec<ProcessId>, StoreError> {
        let mut ids: Vec<ProcessId> = self
            .processes
            .read()
            .await
            .values()
            .filter(|p| p.batch_id.as_ref() == Some(batch))
            .map(|p| p.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_processes(&self) -> Result<Vec<ProcessId>, StoreError> {
        let mut ids: Vec<ProcessId> = self.processes.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl HistorySink for MemoryStore {
    async fn append_event(&self, event: HistoryEvent) -> Result<(), StoreError> {
        self.history.write().await.push(event);
        Ok(())
    }
}

#[async_trait]
impl PropertyStore for MemoryStore {
    async fn properties(&self, owner: &PropertyOwner) -> Result<Vec<Property>, StoreError> {
        Ok(self
            .properties
            .read()
            .await
            .get(owner)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_property(
        &self,
        owner: &PropertyOwner,
        property: Property,
    ) -> Result<(), StoreError> {
        let mut properties = self.properties.write().await;
        let entries = properties.entry(owner.clone()).or_default();
        match entries.iter_mut().find(|p| p.id == property.id) {
            Some(existing) => *existing = property,
            None => entries.push(property),
        }
        Ok(())
    }

    async fn remove_property(
        &self,
        owner: &PropertyOwner,
        id: &PropertyId,
    ) -> Result<(), StoreError> {
        if let Some(entries) = self.properties.write().await.get_mut(owner) {
            entries.retain(|p| &p.id != id);
        }
        Ok(())
    }
}

//! Title/value/type properties attached to processes and tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ProcessId, PropertyId, TaskId};

/// Kind of a property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    /// Plain user-entered value.
    #[default]
    General,
    /// A reported problem.
    MessageError,
    /// A notice worth highlighting, e.g. a solved correction.
    MessageImportant,
}

/// What a property is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PropertyOwner {
    Process(ProcessId),
    Task(TaskId),
}

/// A property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub title: String,
    pub value: String,
    pub property_type: PropertyType,
    pub created_at: DateTime<Utc>,
}

impl Property {
    /// Create a new Property.
    pub fn new(
        title: impl Into<String>,
        value: impl Into<String>,
        property_type: PropertyType,
    ) -> Self {
        Self {
            id: PropertyId::generate(),
            title: title.into(),
            value: value.into(),
            property_type,
            created_at: Utc::now(),
        }
    }

    /// A new property with the same title, value and type but its own
    /// identity.
    pub fn detached_copy(&self) -> Self {
        Self::new(self.title.clone(), self.value.clone(), self.property_type)
    }

    /// Returns true if the title is missing, which marks a partially
    /// initialized entry.
    pub fn has_blank_title(&self) -> bool {
        self.title.trim().is_empty()
    }
}

//! Snapshot shapes of the searchable domain entities.
//!
//! The persistence layer owns these records; the search engine only ever reads
//! a snapshot handed to it. Each variant carries the text fields that feed the
//! keyword index and the embedding pipeline.
//!
//! Entities (de)serialize with an internal `"type"` tag so that a JSON row such
//! as `{"id": "t1", "type": "task", "title": "Buy groceries"}` maps directly to
//! an [`EntityRow`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of entity a document or embedding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Task,
    Note,
    Meeting,
    Project,
    Stakeholder,
}

impl EntityType {
    /// Every entity type, in the order a full reindex walks them.
    pub const ALL: [EntityType; 5] = [
        EntityType::Task,
        EntityType::Note,
        EntityType::Meeting,
        EntityType::Project,
        EntityType::Stakeholder,
    ];

    /// Storage representation, also used in queue keys and CLI arguments.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Task => "task",
            EntityType::Note => "note",
            EntityType::Meeting => "meeting",
            EntityType::Project => "project",
            EntityType::Stakeholder => "stakeholder",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "task" | "tasks" => Ok(EntityType::Task),
            "note" | "notes" => Ok(EntityType::Note),
            "meeting" | "meetings" => Ok(EntityType::Meeting),
            "project" | "projects" => Ok(EntityType::Project),
            "stakeholder" | "stakeholders" => Ok(EntityType::Stakeholder),
            _ => Err(format!(
                "Invalid entity type: '{s}'. Valid values are: task, note, meeting, project, stakeholder"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Note {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stakeholder {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A snapshot of one searchable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entity {
    Task(Task),
    Note(Note),
    Meeting(Meeting),
    Project(Project),
    Stakeholder(Stakeholder),
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Task(_) => EntityType::Task,
            Entity::Note(_) => EntityType::Note,
            Entity::Meeting(_) => EntityType::Meeting,
            Entity::Project(_) => EntityType::Project,
            Entity::Stakeholder(_) => EntityType::Stakeholder,
        }
    }
}

/// One row of an entity table: the opaque id plus the entity snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    pub id: String,
    #[serde(flatten)]
    pub entity: Entity,
}

impl EntityRow {
    pub fn new(id: impl Into<String>, entity: Entity) -> Self {
        Self {
            id: id.into(),
            entity,
        }
    }
}

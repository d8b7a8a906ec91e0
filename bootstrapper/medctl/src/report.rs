use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Role,
    User,
    Collection,
    Index,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Outcome {
    Created,
    AlreadyExists,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityReport {
    pub kind: EntityKind,
    pub name: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Done,
    PartiallyProvisioned,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapReport {
    pub run_id: String,
    pub database: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub entities: Vec<EntityReport>,
}

impl BootstrapReport {
    pub fn start(database: &str) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            database: database.to_string(),
            started_at: Utc::now().to_rfc3339(),
            finished_at: None,
            entities: Vec::new(),
        }
    }

    pub fn record(&mut self, kind: EntityKind, name: &str, outcome: Outcome) {
        self.entities.push(EntityReport {
            kind,
            name: name.to_string(),
            outcome,
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now().to_rfc3339());
    }

    pub fn outcome(&self, kind: EntityKind, name: &str) -> Option<&Outcome> {
        self.entities
            .iter()
            .find(|e| e.kind == kind && e.name == name)
            .map(|e| &e.outcome)
    }

    pub fn count(&self, kind: EntityKind, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.entities
            .iter()
            .filter(|e| e.kind == kind && pred(&e.outcome))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntityReport> {
        self.entities
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Failed { .. }))
    }

    pub fn status(&self) -> RunStatus {
        if self.failures().next().is_some() {
            RunStatus::PartiallyProvisioned
        } else {
            RunStatus::Done
        }
    }
}

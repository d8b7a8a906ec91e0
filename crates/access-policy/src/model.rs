use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Operation identifiers a privilege may grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    // read
    Find,
    ListCollections,
    // write
    Insert,
    Update,
    Remove,
    // schema
    CreateCollection,
    CreateIndex,
    DropCollection,
    CollMod,
    // administrative
    DropDatabase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCategory {
    Read,
    Write,
    Schema,
    Administrative,
}

impl Action {
    pub const ALL: [Action; 10] = [
        Action::Find,
        Action::ListCollections,
        Action::Insert,
        Action::Update,
        Action::Remove,
        Action::CreateCollection,
        Action::CreateIndex,
        Action::DropCollection,
        Action::CollMod,
        Action::DropDatabase,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Find => "find",
            Action::ListCollections => "listCollections",
            Action::Insert => "insert",
            Action::Update => "update",
            Action::Remove => "remove",
            Action::CreateCollection => "createCollection",
            Action::CreateIndex => "createIndex",
            Action::DropCollection => "dropCollection",
            Action::CollMod => "collMod",
            Action::DropDatabase => "dropDatabase",
        }
    }

    pub fn category(&self) -> ActionCategory {
        match self {
            Action::Find | Action::ListCollections => ActionCategory::Read,
            Action::Insert | Action::Update | Action::Remove => ActionCategory::Write,
            Action::CreateCollection
            | Action::CreateIndex
            | Action::DropCollection
            | Action::CollMod => ActionCategory::Schema,
            Action::DropDatabase => ActionCategory::Administrative,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// A database, optionally narrowed to one collection. An empty collection
/// name means every collection in the database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    pub db: String,
    #[serde(default)]
    pub collection: String,
}

impl Resource {
    pub fn database(db: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: String::new(),
        }
    }

    pub fn collection(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
        }
    }

    pub fn is_whole_database(&self) -> bool {
        self.collection.is_empty()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_whole_database() {
            write!(f, "{}.*", self.db)
        } else {
            write!(f, "{}.{}", self.db, self.collection)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privilege {
    pub resource: Resource,
    pub actions: BTreeSet<Action>,
}

impl Privilege {
    pub fn new(resource: Resource, actions: impl IntoIterator<Item = Action>) -> Self {
        Self {
            resource,
            actions: actions.into_iter().collect(),
        }
    }
}

/// A (role, database) pair, used both for user bindings and role inheritance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleRef {
    pub role: String,
    pub db: String,
}

impl RoleRef {
    pub fn new(role: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            db: db.into(),
        }
    }
}

impl fmt::Display for RoleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.role, self.db)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,
    pub privileges: Vec<Privilege>,
    #[serde(default)]
    pub inherits: Vec<RoleRef>,
}

impl RoleSpec {
    pub fn new(name: impl Into<String>, privileges: Vec<Privilege>) -> Self {
        Self {
            name: name.into(),
            privileges,
            inherits: Vec::new(),
        }
    }

    /// Union of the actions this role grants on `resource`, ignoring parents.
    pub fn actions_on(&self, resource: &Resource) -> BTreeSet<Action> {
        self.privileges
            .iter()
            .filter(|p| &p.resource == resource)
            .flat_map(|p| p.actions.iter().copied())
            .collect()
    }
}

/// Credential material. Opaque to everything except the admin client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub name: String,
    pub secret: Secret,
    pub roles: Vec<RoleRef>,
}

impl UserSpec {
    pub fn new(name: impl Into<String>, secret: impl Into<String>, roles: Vec<RoleRef>) -> Self {
        Self {
            name: name.into(),
            secret: Secret::new(secret),
            roles,
        }
    }
}

/// The two declarative tables plus the database they are scoped to.
/// Roles are applied in order before any user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub database: String,
    pub roles: Vec<RoleSpec>,
    pub users: Vec<UserSpec>,
}

impl AccessPolicy {
    pub fn role(&self, name: &str) -> Option<&RoleSpec> {
        self.roles.iter().find(|r| r.name == name)
    }

    pub fn user(&self, name: &str) -> Option<&UserSpec> {
        self.users.iter().find(|u| u.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_wire_names_round_trip_through_from_str() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        let err = "aggregate".parse::<Action>().unwrap_err();
        assert_eq!(err, UnknownAction("aggregate".into()));
        assert_eq!(err.to_string(), "unknown action: aggregate");
    }

    #[test]
    fn serde_names_match_wire_names() {
        let json = serde_json::to_string(&Action::CollMod).unwrap();
        assert_eq!(json, "\"collMod\"");
        let parsed: Action = serde_json::from_str("\"listCollections\"").unwrap();
        assert_eq!(parsed, Action::ListCollections);
    }

    #[test]
    fn categories() {
        assert_eq!(Action::Find.category(), ActionCategory::Read);
        assert_eq!(Action::Remove.category(), ActionCategory::Write);
        assert_eq!(Action::CollMod.category(), ActionCategory::Schema);
        assert_eq!(Action::DropDatabase.category(), ActionCategory::Administrative);
    }

    #[test]
    fn secret_is_never_printed() {
        let user = UserSpec::new("u", "hunter2", vec![RoleRef::new("r", "db")]);
        let debug = format!("{:?}", user);
        assert!(!debug.contains("hunter2"));
        assert_eq!(user.secret.expose(), "hunter2");
    }

    #[test]
    fn resource_defaults_to_whole_database() {
        let r: Resource = serde_json::from_str(r#"{"db":"medical_data"}"#).unwrap();
        assert!(r.is_whole_database());
        assert_eq!(r.to_string(), "medical_data.*");
        assert_eq!(
            Resource::collection("medical_data", "admissions").to_string(),
            "medical_data.admissions"
        );
    }
}

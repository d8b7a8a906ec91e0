use crate::collections::{CollectionSpec, IndexSpec};
use access_policy::{Privilege, RoleRef, RoleSpec, UserSpec};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error("already exists: {message}")]
    AlreadyExists { message: String },

    #[error("engine unreachable: {message}")]
    Unreachable { message: String },

    #[error("rejected by engine{}: {message}", .code.map(|c| format!(" (code {c})")).unwrap_or_default())]
    Rejected { code: Option<i32>, message: String },
}

/// The engine's administrative primitives. Every call names its target
/// database explicitly.
#[async_trait]
pub trait AdminClient: Send + Sync {
    async fn ping(&self, db: &str) -> Result<(), AdminError>;
    async fn create_role(&self, db: &str, role: &RoleSpec) -> Result<(), AdminError>;
    async fn create_user(&self, db: &str, user: &UserSpec) -> Result<(), AdminError>;
    async fn create_collection(&self, db: &str, spec: &CollectionSpec) -> Result<(), AdminError>;
    async fn create_index(
        &self,
        db: &str,
        collection: &str,
        index: &IndexSpec,
    ) -> Result<(), AdminError>;
}

/// One administrative request, as planned or as issued. Secrets never appear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Call {
    Ping {
        db: String,
    },
    CreateRole {
        db: String,
        role: String,
        privileges: Vec<Privilege>,
        roles: Vec<RoleRef>,
    },
    CreateUser {
        db: String,
        user: String,
        roles: Vec<RoleRef>,
    },
    CreateCollection {
        db: String,
        collection: String,
    },
    CreateIndex {
        db: String,
        collection: String,
        index: String,
    },
}

impl Call {
    pub fn create_role(db: &str, role: &RoleSpec) -> Self {
        Call::CreateRole {
            db: db.to_string(),
            role: role.name.clone(),
            privileges: role.privileges.clone(),
            roles: role.inherits.clone(),
        }
    }

    pub fn create_user(db: &str, user: &UserSpec) -> Self {
        Call::CreateUser {
            db: db.to_string(),
            user: user.name.clone(),
            roles: user.roles.clone(),
        }
    }

    pub fn create_collection(db: &str, spec: &CollectionSpec) -> Self {
        Call::CreateCollection {
            db: db.to_string(),
            collection: spec.name.clone(),
        }
    }

    pub fn create_index(db: &str, collection: &str, index: &IndexSpec) -> Self {
        Call::CreateIndex {
            db: db.to_string(),
            collection: collection.to_string(),
            index: index.name.clone(),
        }
    }

    pub fn is_role_creation(&self) -> bool {
        matches!(self, Call::CreateRole { .. })
    }

    pub fn is_user_creation(&self) -> bool {
        matches!(self, Call::CreateUser { .. })
    }
}

#[derive(Debug, Default)]
struct EngineState {
    reachable: bool,
    disconnect_after: Option<usize>,
    calls: Vec<Call>,
    roles: BTreeMap<(String, String), RoleSpec>,
    users: BTreeMap<(String, String), UserSpec>,
    collections: BTreeMap<(String, String), CollectionSpec>,
    indexes: BTreeMap<(String, String), BTreeSet<String>>,
    rejections: HashMap<String, String>,
}

/// Engine double that keeps roles, users and collections in memory and logs
/// every request in order. Mirrors the engine's create semantics: duplicates
/// fail, bindings to missing roles fail.
#[derive(Debug)]
pub struct InMemoryAdminClient {
    state: Mutex<EngineState>,
}

impl Default for InMemoryAdminClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAdminClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState {
                reachable: true,
                ..Default::default()
            }),
        }
    }

    pub fn unreachable() -> Self {
        let client = Self::new();
        client.set_reachable(false);
        client
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Lets the next `requests` requests through, then drops the connection
    /// for every request after them.
    pub fn disconnect_after(&self, requests: usize) {
        self.lock().disconnect_after = Some(requests);
    }

    /// Makes the next create request for `name` (role, user or collection)
    /// fail with a non-duplicate rejection.
    pub fn reject(&self, name: &str, message: &str) {
        self.lock()
            .rejections
            .insert(name.to_string(), message.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn role(&self, db: &str, name: &str) -> Option<RoleSpec> {
        self.lock()
            .roles
            .get(&(db.to_string(), name.to_string()))
            .cloned()
    }

    pub fn user(&self, db: &str, name: &str) -> Option<UserSpec> {
        self.lock()
            .users
            .get(&(db.to_string(), name.to_string()))
            .cloned()
    }

    pub fn role_names(&self, db: &str) -> Vec<String> {
        self.lock()
            .roles
            .keys()
            .filter(|(d, _)| d == db)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn user_names(&self, db: &str) -> Vec<String> {
        self.lock()
            .users
            .keys()
            .filter(|(d, _)| d == db)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn collection(&self, db: &str, name: &str) -> Option<CollectionSpec> {
        self.lock()
            .collections
            .get(&(db.to_string(), name.to_string()))
            .cloned()
    }

    pub fn index_names(&self, db: &str, collection: &str) -> BTreeSet<String> {
        self.lock()
            .indexes
            .get(&(db.to_string(), collection.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        // state stays consistent across a panicked holder
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EngineState {
    fn admit(&mut self, call: Call, name: &str) -> Result<(), AdminError> {
        self.calls.push(call);
        match self.disconnect_after {
            Some(0) => self.reachable = false,
            Some(n) => self.disconnect_after = Some(n - 1),
            None => {}
        }
        if !self.reachable {
            return Err(AdminError::Unreachable {
                message: "connection refused".into(),
            });
        }
        if let Some(message) = self.rejections.remove(name) {
            return Err(AdminError::Rejected {
                code: Some(13),
                message,
            });
        }
        Ok(())
    }

    fn missing_role<'a>(&self, refs: &'a [RoleRef]) -> Option<&'a RoleRef> {
        refs.iter()
            .find(|r| !self.roles.contains_key(&(r.db.clone(), r.role.clone())))
    }
}

#[async_trait]
impl AdminClient for InMemoryAdminClient {
    async fn ping(&self, db: &str) -> Result<(), AdminError> {
        let mut state = self.lock();
        state.admit(Call::Ping { db: db.to_string() }, "")
    }

    async fn create_role(&self, db: &str, role: &RoleSpec) -> Result<(), AdminError> {
        let mut state = self.lock();
        state.admit(Call::create_role(db, role), &role.name)?;
        let key = (db.to_string(), role.name.clone());
        if state.roles.contains_key(&key) {
            return Err(AdminError::AlreadyExists {
                message: format!("Role \"{}@{}\" already exists", role.name, db),
            });
        }
        if let Some(missing) = state.missing_role(&role.inherits) {
            return Err(AdminError::Rejected {
                code: Some(31),
                message: format!("Could not find role: {}", missing),
            });
        }
        state.roles.insert(key, role.clone());
        Ok(())
    }

    async fn create_user(&self, db: &str, user: &UserSpec) -> Result<(), AdminError> {
        let mut state = self.lock();
        state.admit(Call::create_user(db, user), &user.name)?;
        let key = (db.to_string(), user.name.clone());
        if state.users.contains_key(&key) {
            return Err(AdminError::AlreadyExists {
                message: format!("User \"{}@{}\" already exists", user.name, db),
            });
        }
        if let Some(missing) = state.missing_role(&user.roles) {
            return Err(AdminError::Rejected {
                code: Some(31),
                message: format!("Could not find role: {}", missing),
            });
        }
        state.users.insert(key, user.clone());
        Ok(())
    }

    async fn create_collection(&self, db: &str, spec: &CollectionSpec) -> Result<(), AdminError> {
        let mut state = self.lock();
        state.admit(Call::create_collection(db, spec), &spec.name)?;
        let key = (db.to_string(), spec.name.clone());
        if state.collections.contains_key(&key) {
            return Err(AdminError::AlreadyExists {
                message: format!("Collection {}.{} already exists.", db, spec.name),
            });
        }
        state.collections.insert(key, spec.clone());
        Ok(())
    }

    async fn create_index(
        &self,
        db: &str,
        collection: &str,
        index: &IndexSpec,
    ) -> Result<(), AdminError> {
        let mut state = self.lock();
        state.admit(Call::create_index(db, collection, index), &index.name)?;
        let key = (db.to_string(), collection.to_string());
        if !state.collections.contains_key(&key) {
            return Err(AdminError::Rejected {
                code: Some(26),
                message: format!("ns does not exist: {}.{}", db, collection),
            });
        }
        if !state.indexes.entry(key).or_default().insert(index.name.clone()) {
            return Err(AdminError::AlreadyExists {
                message: format!("index {} already exists", index.name),
            });
        }
        Ok(())
    }
}

use crate::admin::{AdminClient, AdminError};
use crate::collections::{CollectionSpec, IndexSpec};
use access_policy::{RoleRef, RoleSpec, UserSpec};
use async_trait::async_trait;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::ClientOptions;
use mongodb::Client;
use std::time::Duration;
use tracing::debug;

// DuplicateKey, role exists, user exists, NamespaceExists
const ALREADY_EXISTS_CODES: [i32; 4] = [11000, 51002, 51003, 48];

pub struct MongoAdminClient {
    client: Client,
}

impl MongoAdminClient {
    /// Builds a client. No connection is made until the first command.
    pub async fn connect(uri: &str, server_selection_timeout: Duration) -> Result<Self, AdminError> {
        let mut opts = ClientOptions::parse(uri).await.map_err(classify)?;
        opts.app_name = Some("medctl".to_string());
        opts.server_selection_timeout = Some(server_selection_timeout);
        let client = Client::with_options(opts).map_err(classify)?;
        Ok(Self { client })
    }

    async fn run(&self, db: &str, command: Document) -> Result<Document, AdminError> {
        debug!(db, command = command.keys().next().map(String::as_str).unwrap_or(""), "run command");
        self.client
            .database(db)
            .run_command(command, None)
            .await
            .map_err(classify)
    }
}

fn role_refs(refs: &[RoleRef]) -> Vec<Bson> {
    refs.iter()
        .map(|r| Bson::Document(doc! { "role": r.role.as_str(), "db": r.db.as_str() }))
        .collect()
}

pub(crate) fn create_role_command(role: &RoleSpec) -> Document {
    let privileges: Vec<Bson> = role
        .privileges
        .iter()
        .map(|p| {
            let actions: Vec<&str> = p.actions.iter().map(|a| a.as_str()).collect();
            Bson::Document(doc! {
                "resource": { "db": p.resource.db.as_str(), "collection": p.resource.collection.as_str() },
                "actions": actions,
            })
        })
        .collect();
    doc! {
        "createRole": role.name.as_str(),
        "privileges": privileges,
        "roles": role_refs(&role.inherits),
    }
}

pub(crate) fn create_user_command(user: &UserSpec) -> Document {
    doc! {
        "createUser": user.name.as_str(),
        "pwd": user.secret.expose(),
        "roles": role_refs(&user.roles),
    }
}

pub(crate) fn create_indexes_command(collection: &str, index: &IndexSpec) -> Document {
    let mut key = Document::new();
    for (field, dir) in &index.keys {
        key.insert(field.as_str(), *dir);
    }
    doc! {
        "createIndexes": collection,
        "indexes": [ { "key": key, "name": index.name.as_str(), "unique": index.unique } ],
    }
}

fn classify(err: MongoError) -> AdminError {
    match err.kind.as_ref() {
        ErrorKind::Command(c) if ALREADY_EXISTS_CODES.contains(&c.code) => {
            AdminError::AlreadyExists {
                message: c.message.clone(),
            }
        }
        ErrorKind::Command(c) => AdminError::Rejected {
            code: Some(c.code),
            message: format!("{} ({})", c.message, c.code_name),
        },
        ErrorKind::ServerSelection { .. }
        | ErrorKind::Io(_)
        | ErrorKind::ConnectionPoolCleared { .. }
        | ErrorKind::DnsResolve { .. }
        | ErrorKind::Authentication { .. } => AdminError::Unreachable {
            message: err.to_string(),
        },
        _ => AdminError::Rejected {
            code: None,
            message: err.to_string(),
        },
    }
}

#[async_trait]
impl AdminClient for MongoAdminClient {
    async fn ping(&self, db: &str) -> Result<(), AdminError> {
        self.run(db, doc! { "ping": 1 }).await.map(|_| ())
    }

    async fn create_role(&self, db: &str, role: &RoleSpec) -> Result<(), AdminError> {
        self.run(db, create_role_command(role)).await.map(|_| ())
    }

    async fn create_user(&self, db: &str, user: &UserSpec) -> Result<(), AdminError> {
        self.run(db, create_user_command(user)).await.map(|_| ())
    }

    async fn create_collection(&self, db: &str, spec: &CollectionSpec) -> Result<(), AdminError> {
        let validator = bson::to_document(&spec.validator).map_err(|e| AdminError::Rejected {
            code: None,
            message: format!("validator is not a document: {}", e),
        })?;
        self.run(db, doc! { "create": spec.name.as_str(), "validator": validator })
            .await
            .map(|_| ())
    }

    async fn create_index(
        &self,
        db: &str,
        collection: &str,
        index: &IndexSpec,
    ) -> Result<(), AdminError> {
        let reply = self
            .run(db, create_indexes_command(collection, index))
            .await?;
        // an identical index is a silent no-op on the server
        let before = reply.get_i32("numIndexesBefore").ok();
        let after = reply.get_i32("numIndexesAfter").ok();
        if before.is_some() && before == after {
            return Err(AdminError::AlreadyExists {
                message: format!("index {} already exists", index.name),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use access_policy::defaults;

    #[test]
    fn create_role_command_carries_explicit_scope() {
        let policy = defaults::medical_data();
        let cmd = create_role_command(policy.role("medical_user").unwrap());
        assert_eq!(cmd.get_str("createRole").unwrap(), "medical_user");
        let privileges = cmd.get_array("privileges").unwrap();
        let first = privileges[0].as_document().unwrap();
        let resource = first.get_document("resource").unwrap();
        assert_eq!(resource.get_str("db").unwrap(), "medical_data");
        assert_eq!(resource.get_str("collection").unwrap(), "admissions");
        let actions: Vec<_> = first
            .get_array("actions")
            .unwrap()
            .iter()
            .filter_map(|a| a.as_str())
            .collect();
        assert_eq!(actions, ["find", "listCollections", "insert", "update"]);
        assert!(cmd.get_array("roles").unwrap().is_empty());
    }

    #[test]
    fn whole_database_scope_sends_empty_collection() {
        let policy = defaults::medical_data();
        let cmd = create_role_command(policy.role("medical_viewer").unwrap());
        let privileges = cmd.get_array("privileges").unwrap();
        let resource = privileges[0]
            .as_document()
            .unwrap()
            .get_document("resource")
            .unwrap();
        assert_eq!(resource.get_str("collection").unwrap(), "");
    }

    #[test]
    fn create_user_command_binds_role_in_database() {
        let policy = defaults::medical_data();
        let cmd = create_user_command(policy.user("viewer_medical").unwrap());
        assert_eq!(cmd.get_str("createUser").unwrap(), "viewer_medical");
        assert_eq!(cmd.get_str("pwd").unwrap(), "Viewer@123");
        let roles = cmd.get_array("roles").unwrap();
        assert_eq!(roles.len(), 1);
        let binding = roles[0].as_document().unwrap();
        assert_eq!(binding.get_str("role").unwrap(), "medical_viewer");
        assert_eq!(binding.get_str("db").unwrap(), "medical_data");
    }

    #[test]
    fn index_keys_keep_declared_order() {
        let plan = crate::collections::admissions();
        let cmd = create_indexes_command("admissions", &plan.indexes[0]);
        let spec = cmd.get_array("indexes").unwrap()[0].as_document().unwrap();
        let keys: Vec<_> = spec.get_document("key").unwrap().keys().cloned().collect();
        assert_eq!(keys[0], "patient.name");
        assert_eq!(keys[4], "admission.date");
        assert!(spec.get_bool("unique").unwrap());
    }

    #[ignore]
    #[tokio::test]
    async fn applies_default_policy_against_live_mongodb() {
        // requires a disposable mongod with auth; MONGO_URI must point at it
        let uri = std::env::var("MONGO_URI").unwrap();
        let client = MongoAdminClient::connect(&uri, Duration::from_secs(5))
            .await
            .unwrap();
        let policy = defaults::medical_data();
        let opts = crate::loader::LoadOptions::default();
        let first = crate::loader::apply(&client, &policy, &opts).await.unwrap();
        assert_eq!(first.status(), crate::report::RunStatus::Done);
        let second = crate::loader::apply(&client, &policy, &opts).await.unwrap();
        assert!(second
            .entities
            .iter()
            .all(|e| e.outcome == crate::report::Outcome::AlreadyExists));
    }
}

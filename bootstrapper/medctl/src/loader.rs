use crate::admin::{AdminClient, AdminError, Call};
use crate::collections::CollectionPlan;
use crate::report::{BootstrapReport, EntityKind, Outcome};
use access_policy::{AccessPolicy, PolicyError, RoleRef};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    InvalidPolicy(#[from] PolicyError),

    #[error("engine unreachable during {during}: {message}")]
    EngineUnreachable {
        during: String,
        message: String,
        /// What was provisioned before the connection was lost.
        report: Box<BootstrapReport>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Collections to ensure after roles and users.
    pub collections: Vec<CollectionPlan>,
}

impl LoadOptions {
    pub fn new(with_collections: bool) -> Self {
        let collections = if with_collections {
            vec![crate::collections::admissions()]
        } else {
            Vec::new()
        };
        Self { collections }
    }
}

/// The ordered request sequence a run issues: every role, then every user,
/// then collections and their indexes.
pub fn plan(policy: &AccessPolicy, opts: &LoadOptions) -> Vec<Call> {
    let db = policy.database.as_str();
    let mut calls: Vec<Call> = policy
        .roles
        .iter()
        .map(|r| Call::create_role(db, r))
        .collect();
    calls.extend(policy.users.iter().map(|u| Call::create_user(db, u)));
    for c in &opts.collections {
        calls.push(Call::create_collection(db, &c.collection));
        calls.extend(
            c.indexes
                .iter()
                .map(|i| Call::create_index(db, &c.collection.name, i)),
        );
    }
    calls
}

/// Applies `policy` through `client`. Validation runs first and aborts
/// before any request. Duplicates are skipped, rejections are recorded and
/// the run continues, an unreachable engine aborts.
#[instrument(skip_all, fields(db = %policy.database))]
pub async fn apply<C: AdminClient + ?Sized>(
    client: &C,
    policy: &AccessPolicy,
    opts: &LoadOptions,
) -> Result<BootstrapReport, LoadError> {
    policy.validate()?;

    let db = policy.database.as_str();
    let mut report = BootstrapReport::start(db);

    if let Err(e) = client.ping(db).await {
        return Err(unreachable("ping", e, report));
    }

    let mut provisioned: HashSet<RoleRef> = HashSet::new();
    for role in &policy.roles {
        match client.create_role(db, role).await {
            Ok(()) => {
                info!(role = %role.name, "role created");
                report.record(EntityKind::Role, &role.name, Outcome::Created);
                provisioned.insert(RoleRef::new(&role.name, db));
            }
            Err(AdminError::AlreadyExists { message }) => {
                warn!(role = %role.name, %message, "role already exists, skipping");
                report.record(EntityKind::Role, &role.name, Outcome::AlreadyExists);
                provisioned.insert(RoleRef::new(&role.name, db));
            }
            Err(AdminError::Rejected { code, message }) => {
                warn!(role = %role.name, ?code, %message, "role rejected");
                report.record(
                    EntityKind::Role,
                    &role.name,
                    Outcome::Failed { reason: message },
                );
            }
            Err(e @ AdminError::Unreachable { .. }) => {
                return Err(unreachable(&format!("role {}", role.name), e, report));
            }
        }
    }

    for user in &policy.users {
        if let Some(missing) = user.roles.iter().find(|r| !provisioned.contains(*r)) {
            warn!(user = %user.name, role = %missing, "bound role was not provisioned, skipping");
            report.record(
                EntityKind::User,
                &user.name,
                Outcome::Failed {
                    reason: format!("role {} was not provisioned", missing),
                },
            );
            continue;
        }
        match client.create_user(db, user).await {
            Ok(()) => {
                info!(user = %user.name, "user created");
                report.record(EntityKind::User, &user.name, Outcome::Created);
            }
            Err(AdminError::AlreadyExists { message }) => {
                warn!(user = %user.name, %message, "user already exists, skipping");
                report.record(EntityKind::User, &user.name, Outcome::AlreadyExists);
            }
            Err(AdminError::Rejected { code, message }) => {
                warn!(user = %user.name, ?code, %message, "user rejected");
                report.record(
                    EntityKind::User,
                    &user.name,
                    Outcome::Failed { reason: message },
                );
            }
            Err(e @ AdminError::Unreachable { .. }) => {
                return Err(unreachable(&format!("user {}", user.name), e, report));
            }
        }
    }

    for c in &opts.collections {
        let name = &c.collection.name;
        let outcome = match client.create_collection(db, &c.collection).await {
            Ok(()) => Outcome::Created,
            Err(AdminError::AlreadyExists { .. }) => Outcome::AlreadyExists,
            Err(AdminError::Rejected { message, .. }) => Outcome::Failed { reason: message },
            Err(e @ AdminError::Unreachable { .. }) => {
                return Err(unreachable(&format!("collection {}", name), e, report));
            }
        };
        info!(collection = %name, ?outcome, "collection ensured");
        report.record(EntityKind::Collection, name, outcome);

        for index in &c.indexes {
            let outcome = match client.create_index(db, name, index).await {
                Ok(()) => Outcome::Created,
                Err(AdminError::AlreadyExists { .. }) => Outcome::AlreadyExists,
                Err(AdminError::Rejected { message, .. }) => Outcome::Failed { reason: message },
                Err(e @ AdminError::Unreachable { .. }) => {
                    return Err(unreachable(&format!("index {}", index.name), e, report));
                }
            };
            info!(collection = %name, index = %index.name, ?outcome, "index ensured");
            report.record(EntityKind::Index, &index.name, outcome);
        }
    }

    report.finish();
    Ok(report)
}

fn unreachable(during: &str, err: AdminError, mut report: BootstrapReport) -> LoadError {
    report.finish();
    let message = match err {
        AdminError::Unreachable { message } => message,
        other => other.to_string(),
    };
    LoadError::EngineUnreachable {
        during: during.to_string(),
        message,
        report: Box::new(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use access_policy::defaults;

    #[test]
    fn plan_puts_every_role_before_any_user() {
        let calls = plan(&defaults::medical_data(), &LoadOptions::default());
        assert_eq!(calls.len(), 8);
        let last_role = calls.iter().rposition(Call::is_role_creation).unwrap();
        let first_user = calls.iter().position(Call::is_user_creation).unwrap();
        assert!(last_role < first_user);
    }

    #[test]
    fn plan_appends_collections_last() {
        let opts = LoadOptions::new(true);
        let calls = plan(&defaults::medical_data(), &opts);
        assert_eq!(calls.len(), 10);
        assert!(matches!(calls[8], Call::CreateCollection { ref collection, .. } if collection == "admissions"));
        assert!(matches!(calls[9], Call::CreateIndex { ref index, .. } if index == "unique_patient"));
    }
}

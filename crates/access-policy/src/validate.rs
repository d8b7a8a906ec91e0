use crate::model::AccessPolicy;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyIssue {
    #[error("user '{user}' is bound to undeclared role '{role}' in database '{db}'")]
    InvalidRoleReference {
        user: String,
        role: String,
        db: String,
    },

    #[error("role '{role}' is declared more than once")]
    DuplicateRole { role: String },

    #[error("user '{user}' is declared more than once")]
    DuplicateUser { user: String },

    #[error("{what} has an empty name")]
    EmptyName { what: String },

    #[error("user '{user}' has no role bindings")]
    NoRoleBindings { user: String },

    #[error("user '{user}' has an empty secret")]
    EmptySecret { user: String },

    #[error("role '{role}' has a privilege with no actions")]
    EmptyActions { role: String },

    #[error("role '{role}' grants on database '{db}' outside the policy database")]
    ResourceOutsideDatabase { role: String, db: String },

    #[error("role '{role}' inherits '{parent}' which is not declared before it")]
    UnknownParentRole { role: String, parent: String },
}

/// Cross-checks the two tables. Every issue is collected; an empty result
/// means the policy can be applied.
pub fn check(policy: &AccessPolicy) -> Vec<PolicyIssue> {
    let mut issues = Vec::new();
    let db = policy.database.as_str();

    if db.trim().is_empty() {
        issues.push(PolicyIssue::EmptyName {
            what: "policy database".into(),
        });
    }

    let mut declared: HashSet<&str> = HashSet::new();
    for role in &policy.roles {
        if role.name.trim().is_empty() {
            issues.push(PolicyIssue::EmptyName {
                what: "role".into(),
            });
        }
        for parent in &role.inherits {
            if parent.db != db || !declared.contains(parent.role.as_str()) {
                issues.push(PolicyIssue::UnknownParentRole {
                    role: role.name.clone(),
                    parent: parent.to_string(),
                });
            }
        }
        for privilege in &role.privileges {
            if privilege.actions.is_empty() {
                issues.push(PolicyIssue::EmptyActions {
                    role: role.name.clone(),
                });
            }
            if privilege.resource.db != db {
                issues.push(PolicyIssue::ResourceOutsideDatabase {
                    role: role.name.clone(),
                    db: privilege.resource.db.clone(),
                });
            }
        }
        if !declared.insert(role.name.as_str()) {
            issues.push(PolicyIssue::DuplicateRole {
                role: role.name.clone(),
            });
        }
    }

    let mut users: HashSet<&str> = HashSet::new();
    for user in &policy.users {
        if user.name.trim().is_empty() {
            issues.push(PolicyIssue::EmptyName {
                what: "user".into(),
            });
        }
        if !users.insert(user.name.as_str()) {
            issues.push(PolicyIssue::DuplicateUser {
                user: user.name.clone(),
            });
        }
        if user.secret.is_empty() {
            issues.push(PolicyIssue::EmptySecret {
                user: user.name.clone(),
            });
        }
        if user.roles.is_empty() {
            issues.push(PolicyIssue::NoRoleBindings {
                user: user.name.clone(),
            });
        }
        for binding in &user.roles {
            if binding.db != db || !declared.contains(binding.role.as_str()) {
                issues.push(PolicyIssue::InvalidRoleReference {
                    user: user.name.clone(),
                    role: binding.role.clone(),
                    db: binding.db.clone(),
                });
            }
        }
    }

    debug!(
        roles = policy.roles.len(),
        users = policy.users.len(),
        issues = issues.len(),
        "policy checked"
    );
    issues
}

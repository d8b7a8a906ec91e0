//! Declarative access-control model for a single database: roles with their
//! privileges, users with their credentials and role bindings, the built-in
//! `medical_data` tables, policy files and the pre-flight validation pass.

use std::path::Path;
use thiserror::Error;

pub mod defaults;
pub mod file;
pub mod model;
pub mod secrets;
pub mod validate;

pub use model::{
    AccessPolicy, Action, ActionCategory, Privilege, Resource, RoleRef, RoleSpec, Secret,
    UserSpec,
};
pub use secrets::{EnvFileSecrets, SecretError, SecretProvider};
pub use validate::PolicyIssue;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Failed to read policy file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse policy: {message}")]
    Parse { message: String },

    #[error("Policy schema validation failed: {}", errors.join("; "))]
    Schema { errors: Vec<String> },

    #[error("Secret resolution failed: {0}")]
    Secret(#[from] SecretError),

    #[error("Policy is invalid: {}", render_issues(issues))]
    Invalid { issues: Vec<PolicyIssue> },
}

impl PolicyError {
    pub fn issues(&self) -> &[PolicyIssue] {
        match self {
            PolicyError::Invalid { issues } => issues,
            _ => &[],
        }
    }
}

fn render_issues(issues: &[PolicyIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl AccessPolicy {
    /// Runs the pre-flight cross-check and turns any issue into an error.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let issues = validate::check(self);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(PolicyError::Invalid { issues })
        }
    }
}

/// Loads the policy from `path`, or the built-in tables when `path` is None,
/// and validates it.
pub fn resolve_policy<P: SecretProvider + ?Sized>(
    path: Option<&Path>,
    provider: &P,
) -> Result<AccessPolicy, PolicyError> {
    let policy = match path {
        Some(p) => file::load_policy(p, provider)?,
        None => defaults::medical_data(),
    };
    policy.validate()?;
    Ok(policy)
}

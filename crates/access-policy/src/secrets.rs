use crate::model::{AccessPolicy, Secret};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const SECRETS_FILE_ENV: &str = "MEDCTL_SECRETS_FILE";

static SECRET_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^secret://([^/]+)/(.+)$").expect("secret uri pattern compiles")
});

/// scope -> key -> value
type ScopedSecrets = HashMap<String, HashMap<String, String>>;

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("no value for secret://{scope}/{key}")]
    NotFound { scope: String, key: String },

    #[error("cannot read secrets file {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("secrets file {path} is not a map of scopes to string values: {message}")]
    Malformed { path: String, message: String },
}

pub trait SecretProvider: Send + Sync {
    fn resolve(&self, scope: &str, key: &str) -> Result<String, SecretError>;
}

/// Operator-supplied passwords: `SECRET_<SCOPE>_<KEY>` from the environment,
/// else the JSON secrets file `{ "<scope>": { "<key>": "<value>" } }`.
/// The file is read at most once, on the first lookup that reaches it.
pub struct EnvFileSecrets {
    file: Option<PathBuf>,
    loaded: OnceCell<ScopedSecrets>,
}

impl EnvFileSecrets {
    /// Takes the secrets file from `MEDCTL_SECRETS_FILE`, if set.
    pub fn from_env() -> Self {
        Self {
            file: env::var_os(SECRETS_FILE_ENV).map(PathBuf::from),
            loaded: OnceCell::new(),
        }
    }

    pub fn with_secrets_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
            loaded: OnceCell::new(),
        }
    }

    fn file_secrets(&self) -> Result<&ScopedSecrets, SecretError> {
        self.loaded.get_or_try_init(|| match &self.file {
            Some(path) => read_secrets_file(path),
            None => Ok(ScopedSecrets::new()),
        })
    }
}

fn read_secrets_file(path: &Path) -> Result<ScopedSecrets, SecretError> {
    let text = fs::read_to_string(path).map_err(|e| SecretError::Unreadable {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let secrets: ScopedSecrets =
        serde_json::from_str(&text).map_err(|e| SecretError::Malformed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    debug!(path = %path.display(), scopes = secrets.len(), "loaded secrets file");
    Ok(secrets)
}

fn env_var_name(scope: &str, key: &str) -> String {
    format!("SECRET_{}_{}", scope, key).to_uppercase()
}

impl SecretProvider for EnvFileSecrets {
    fn resolve(&self, scope: &str, key: &str) -> Result<String, SecretError> {
        let var = env_var_name(scope, key);
        if let Ok(value) = env::var(&var) {
            debug!(scope, key, source = %var, "secret resolved");
            return Ok(value);
        }

        let value = self
            .file_secrets()?
            .get(scope)
            .and_then(|s| s.get(key))
            .cloned()
            .ok_or_else(|| SecretError::NotFound {
                scope: scope.to_string(),
                key: key.to_string(),
            })?;
        debug!(scope, key, source = "secrets file", "secret resolved");
        Ok(value)
    }
}

/// Swaps every user secret written as `secret://<scope>/<key>` for the
/// provider's value. Other secrets are left as they are.
pub fn resolve_user_secrets<P: SecretProvider + ?Sized>(
    policy: &mut AccessPolicy,
    provider: &P,
) -> Result<(), SecretError> {
    for user in &mut policy.users {
        let Some(uri) = SECRET_URI.captures(user.secret.expose()) else {
            continue;
        };
        let value = provider.resolve(&uri[1], &uri[2])?;
        debug!(user = %user.name, "secret reference resolved");
        user.secret = Secret::new(value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    struct Fixed;

    impl SecretProvider for Fixed {
        fn resolve(&self, scope: &str, key: &str) -> Result<String, SecretError> {
            Ok(format!("{}:{}", scope, key))
        }
    }

    #[test]
    fn only_secret_references_are_replaced() {
        let mut policy = defaults::medical_data();
        policy.users[0].secret = Secret::new("secret://medical/admin_medical");
        policy.users[1].secret = Secret::new("not-secret://medical/x");

        resolve_user_secrets(&mut policy, &Fixed).unwrap();

        assert_eq!(policy.users[0].secret.expose(), "medical:admin_medical");
        assert_eq!(policy.users[1].secret.expose(), "not-secret://medical/x");
        assert_eq!(policy.users[2].secret.expose(), "Viewer@123");
    }

    #[test]
    #[serial]
    fn env_takes_precedence_over_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"medical": {{"viewer": "from-file", "indexer": "file-only"}}}}"#)
            .unwrap();
        env::set_var("SECRET_MEDICAL_VIEWER", "from-env");

        let provider = EnvFileSecrets::with_secrets_file(file.path());
        assert_eq!(provider.resolve("medical", "viewer").unwrap(), "from-env");
        assert_eq!(provider.resolve("medical", "indexer").unwrap(), "file-only");
        assert!(matches!(
            provider.resolve("medical", "missing"),
            Err(SecretError::NotFound { .. })
        ));

        env::remove_var("SECRET_MEDICAL_VIEWER");
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let provider = EnvFileSecrets::with_secrets_file("/nonexistent/secrets.json");
        assert!(matches!(
            provider.resolve("medical", "nobody_sets_this"),
            Err(SecretError::Unreadable { .. })
        ));
    }

    #[test]
    fn non_string_value_makes_the_file_malformed() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"medical": {{"viewer": 42}}}}"#).unwrap();
        let provider = EnvFileSecrets::with_secrets_file(file.path());
        assert!(matches!(
            provider.resolve("medical", "nobody_sets_this_either"),
            Err(SecretError::Malformed { .. })
        ));
    }
}

use crate::model::AccessPolicy;
use crate::secrets::{resolve_user_secrets, SecretProvider};
use crate::PolicyError;
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;
use tracing::{debug, instrument};

const POLICY_SCHEMA: &str = include_str!("../../../contracts/schemas/access.policy.v1.json");

static ENV_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("env pattern compiles")
});

/// Reads a YAML (or JSON) policy file, interpolates `${VAR}` and
/// `${VAR:-default}` inside string values, checks it against the policy
/// schema, then resolves `secret://` references.
#[instrument(skip(provider))]
pub fn load_policy<P: SecretProvider + ?Sized>(
    path: &Path,
    provider: &P,
) -> Result<AccessPolicy, PolicyError> {
    let raw = fs::read_to_string(path).map_err(|e| PolicyError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    debug!(bytes = raw.len(), "read policy file");
    parse_policy(&raw, provider)
}

pub fn parse_policy<P: SecretProvider + ?Sized>(
    text: &str,
    provider: &P,
) -> Result<AccessPolicy, PolicyError> {
    let doc_yaml: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| PolicyError::Parse {
            message: e.to_string(),
        })?;
    let mut doc = serde_json::to_value(doc_yaml).map_err(|e| PolicyError::Parse {
        message: e.to_string(),
    })?;

    // substituted values are never re-read as YAML
    interpolate_in_value(&mut doc);
    validate_against_schema(&doc)?;

    let mut policy: AccessPolicy =
        serde_json::from_value(doc).map_err(|e| PolicyError::Parse {
            message: e.to_string(),
        })?;
    resolve_user_secrets(&mut policy, provider)?;
    Ok(policy)
}

fn validate_against_schema(doc: &JsonValue) -> Result<(), PolicyError> {
    let schema: JsonValue =
        serde_json::from_str(POLICY_SCHEMA).map_err(|e| PolicyError::Schema {
            errors: vec![format!("schema is not JSON: {}", e)],
        })?;
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .map_err(|e| PolicyError::Schema {
            errors: vec![format!("schema does not compile: {}", e)],
        })?;

    if let Err(errors) = compiled.validate(doc) {
        let errors = errors
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect();
        return Err(PolicyError::Schema { errors });
    }
    Ok(())
}

fn interpolate_in_value(doc: &mut JsonValue) {
    match doc {
        JsonValue::String(s) => {
            if ENV_REF.is_match(s) {
                *s = interpolate_env(s);
            }
        }
        JsonValue::Object(obj) => obj.values_mut().for_each(interpolate_in_value),
        JsonValue::Array(arr) => arr.iter_mut().for_each(interpolate_in_value),
        _ => {}
    }
}

fn interpolate_env(s: &str) -> String {
    ENV_REF
        .replace_all(s, |caps: &Captures<'_>| {
            std::env::var(&caps[1])
                .ok()
                .or_else(|| caps.get(2).map(|d| d.as_str().to_string()))
                .unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::SecretError;
    use serial_test::serial;

    struct NoSecrets;

    impl SecretProvider for NoSecrets {
        fn resolve(&self, scope: &str, key: &str) -> Result<String, SecretError> {
            Err(SecretError::NotFound {
                scope: scope.into(),
                key: key.into(),
            })
        }
    }

    #[test]
    #[serial]
    fn interpolate_basic_and_default() {
        std::env::set_var("MEDCTL_TEST_FOO", "bar");
        let s = "x=${MEDCTL_TEST_FOO},y=${MEDCTL_TEST_MISSING:-def},z=${MEDCTL_TEST_MISSING}";
        assert_eq!(interpolate_env(s), "x=bar,y=def,z=");
        std::env::remove_var("MEDCTL_TEST_FOO");
    }

    #[test]
    #[serial]
    fn injected_value_is_taken_verbatim() {
        let text = r#"
database: medical_data
roles:
  - name: medical_viewer
    privileges:
      - resource: { db: medical_data, collection: "" }
        actions: [find]
users:
  - name: viewer_medical
    secret: "${MEDCTL_TEST_PASSWORD:-Viewer@123}"
    roles: [{ role: medical_viewer, db: medical_data }]
  - name: plain_medical
    secret: ${MEDCTL_TEST_PASSWORD}
    roles: [{ role: medical_viewer, db: medical_data }]
"#;
        for value in [r"C:\temp\new", r#"pa"ss"#, "a: b # c", "${NOT_EXPANDED_AGAIN}"] {
            std::env::set_var("MEDCTL_TEST_PASSWORD", value);
            let policy = parse_policy(text, &NoSecrets).unwrap();
            assert_eq!(policy.users[0].secret.expose(), value);
            assert_eq!(policy.users[1].secret.expose(), value);
        }
        std::env::remove_var("MEDCTL_TEST_PASSWORD");
    }

    #[test]
    fn interpolation_keeps_non_ascii_text() {
        assert_eq!(interpolate_env("rôle: ${MEDCTL_TEST_UNSET:-é}"), "rôle: é");
    }

    #[test]
    fn unknown_action_fails_schema() {
        let text = r#"
database: medical_data
roles:
  - name: r
    privileges:
      - resource: { db: medical_data }
        actions: [aggregate]
users: []
"#;
        let err = parse_policy(text, &NoSecrets).unwrap_err();
        match err {
            PolicyError::Schema { errors } => {
                assert!(errors.iter().any(|e| e.contains("/roles/0/privileges/0/actions/0")))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_secret_reference_fails() {
        let text = r#"
database: medical_data
roles: []
users:
  - name: u
    secret: secret://medical/u
    roles: []
"#;
        assert!(matches!(
            parse_policy(text, &NoSecrets),
            Err(PolicyError::Secret(SecretError::NotFound { .. }))
        ));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        assert!(matches!(
            parse_policy("database: [", &NoSecrets),
            Err(PolicyError::Parse { .. })
        ));
    }
}

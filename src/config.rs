//! Configuration loading and schema validation.

use std::path::Path;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use crate::error::ConductorError;

const IDENTIFIER_PATTERN: &str = "^[A-Za-z_][A-Za-z0-9_]*$";

/// Schema for the top-level controller config: a `services` list where
/// each entry carries `$plugin` and/or `$name`, optional override maps,
/// and otherwise arbitrary plugin-specific keys.
pub fn controller_schema() -> &'static Value {
    static SCHEMA: OnceLock<Value> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let override_map = json!({
            "type": "object",
            "propertyNames": {"pattern": IDENTIFIER_PATTERN},
            "additionalProperties": {"type": "string"},
        });
        json!({
            "type": "object",
            "properties": {
                "services": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "anyOf": [
                            {"required": ["$plugin"]},
                            {"required": ["$name"]},
                        ],
                        "properties": {
                            "$plugin": {"type": "string", "minLength": 1},
                            "$name": {"type": "string", "minLength": 1},
                            "$dep-overrides": override_map,
                            "$export-overrides": override_map,
                        },
                    },
                },
            },
            "required": ["services"],
            "additionalProperties": false,
        })
    })
}

/// Validate `instance` against `schema`, reporting every violation at
/// once. `scope` labels the error so batch failures stay attributable.
pub(crate) fn check_schema(
    schema: &Value,
    instance: &Value,
    scope: &str,
) -> Result<(), ConductorError> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(validator) => validator,
        Err(e) => {
            return Err(ConductorError::SchemaValidation {
                scope: scope.to_string(),
                violations: vec![format!("invalid schema: {e}")],
            });
        }
    };
    let violations: Vec<String> = validator
        .iter_errors(instance)
        .map(|e| format!("{}: {}", e.instance_path, e))
        .collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ConductorError::SchemaValidation {
            scope: scope.to_string(),
            violations,
        })
    }
}

/// Load a config file as JSON data. `.yaml`/`.yml` files go through the
/// YAML parser, everything else is treated as JSON.
pub fn load_file(path: &Path) -> Result<Value> {
    if !path.is_file() {
        bail!("config file not found: {}", path.display());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let value = if is_yaml {
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
    } else {
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_valid_config_passes() {
        let config = json!({
            "services": [
                {"$plugin": "acme.cache", "size": 64},
                {"$name": "Pool", "$dep-overrides": {"cache": "shared_cache"}},
            ],
        });
        check_schema(controller_schema(), &config, "controller").unwrap();
    }

    #[test]
    fn test_misspelled_top_level_key_fails() {
        let config = json!({"service": []});
        let err = check_schema(controller_schema(), &config, "controller").unwrap_err();
        match err {
            ConductorError::SchemaValidation { scope, violations } => {
                assert_eq!(scope, "controller");
                assert!(!violations.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_entry_without_plugin_or_name_fails() {
        let config = json!({"services": [{"size": 64}]});
        assert!(check_schema(controller_schema(), &config, "controller").is_err());
    }

    #[test]
    fn test_bad_override_key_fails() {
        let config = json!({
            "services": [
                {"$plugin": "acme.cache", "$dep-overrides": {"not a name": "x"}},
            ],
        });
        assert!(check_schema(controller_schema(), &config, "controller").is_err());
    }

    #[test]
    fn test_load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{}", json!({"services": []})).unwrap();
        let value = load_file(&path).unwrap();
        assert_eq!(value, json!({"services": []}));
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.yaml");
        std::fs::write(&path, "services:\n  - $plugin: acme.cache\n").unwrap();
        let value = load_file(&path).unwrap();
        assert_eq!(value, json!({"services": [{"$plugin": "acme.cache"}]}));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_file(Path::new("/nonexistent/services.json")).is_err());
    }
}

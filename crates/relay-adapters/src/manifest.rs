// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in adapter manifests and config validation.
//!
//! Manifests are plain data: the catalog, the instance policy, and each
//! type's config-field schema live here, not in code paths. Validation
//! accumulates every problem instead of stopping at the first.

use relay_core::adapter::{
    AdapterCategory, AdapterManifest, ConfigField, FieldType, ShowWhen, SubjectSpec,
};
use serde_json::Value;

/// Type id of the internal agent bridge.
pub const CLAUDE_CODE: &str = "claude-code";

/// Type id of the Telegram channel adapter.
pub const TELEGRAM: &str = "telegram";

/// Type id of the generic HMAC-signed webhook adapter.
pub const WEBHOOK: &str = "webhook";

/// All built-in manifests, in catalog order.
pub fn builtin_manifests() -> Vec<AdapterManifest> {
    vec![claude_code(), telegram(), webhook()]
}

/// Look up a built-in manifest by type id.
pub fn manifest_for(adapter_type: &str) -> Option<AdapterManifest> {
    builtin_manifests()
        .into_iter()
        .find(|m| m.adapter_type == adapter_type)
}

fn claude_code() -> AdapterManifest {
    AdapterManifest {
        adapter_type: CLAUDE_CODE.into(),
        display_name: "Claude Code".into(),
        category: AdapterCategory::Internal,
        builtin: true,
        multi_instance: false,
        config_fields: vec![ConfigField::optional("agent_dir", FieldType::Text)],
        subjects: SubjectSpec {
            inbound: Some("relay.agent.*".into()),
            outbound: Some("relay.human.console.>".into()),
        },
    }
}

fn telegram() -> AdapterManifest {
    AdapterManifest {
        adapter_type: TELEGRAM.into(),
        display_name: "Telegram".into(),
        category: AdapterCategory::Messaging,
        builtin: true,
        multi_instance: true,
        config_fields: vec![
            ConfigField::required("token", FieldType::Password),
            ConfigField::required("chat_id", FieldType::Text),
            ConfigField {
                default: Some(Value::String("https://api.telegram.org".into())),
                ..ConfigField::optional("api_base", FieldType::Url)
            },
        ],
        subjects: SubjectSpec {
            inbound: Some("relay.telegram.*.in".into()),
            outbound: Some("relay.telegram.*.out".into()),
        },
    }
}

fn webhook() -> AdapterManifest {
    AdapterManifest {
        adapter_type: WEBHOOK.into(),
        display_name: "Webhook".into(),
        category: AdapterCategory::Automation,
        builtin: true,
        multi_instance: true,
        config_fields: vec![
            ConfigField::required("secret", FieldType::Password),
            ConfigField::optional("forward_url", FieldType::Url),
            ConfigField {
                default: Some(Value::Bool(false)),
                ..ConfigField::optional("sign_outbound", FieldType::Boolean)
            },
            ConfigField {
                default: Some(Value::String("x-relay-signature".into())),
                show_when: Some(ShowWhen {
                    key: "sign_outbound".into(),
                    equals: Value::Bool(true),
                }),
                ..ConfigField::optional("signature_header", FieldType::Text)
            },
        ],
        subjects: SubjectSpec {
            inbound: Some("relay.webhook.*.in".into()),
            outbound: Some("relay.webhook.*.out".into()),
        },
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate `config` against the manifest's field schema.
///
/// Returns the config with declared defaults filled in, or every problem
/// found. Fields hidden by a `show_when` rule are skipped entirely; unknown
/// keys are rejected.
pub fn validate_config(manifest: &AdapterManifest, config: &Value) -> Result<Value, Vec<String>> {
    let Some(map) = config.as_object() else {
        return Err(vec!["config must be a JSON object".into()]);
    };

    let mut errors = Vec::new();
    let mut out = map.clone();

    let known: Vec<&str> = manifest.config_fields.iter().map(|f| f.key.as_str()).collect();
    for key in map.keys() {
        if !known.contains(&key.as_str()) {
            errors.push(format!("unknown field '{key}'"));
        }
    }

    for field in &manifest.config_fields {
        if let Some(rule) = &field.show_when {
            let controlling = map.get(&rule.key).or(default_of(manifest, &rule.key));
            if controlling != Some(&rule.equals) {
                continue;
            }
        }

        match map.get(&field.key) {
            None => {
                if let Some(default) = &field.default {
                    out.insert(field.key.clone(), default.clone());
                } else if field.required {
                    errors.push(format!("missing required field '{}'", field.key));
                }
            }
            Some(value) => {
                if let Err(reason) = check_type(field, value) {
                    errors.push(reason);
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(Value::Object(out))
    } else {
        Err(errors)
    }
}

fn default_of<'a>(manifest: &'a AdapterManifest, key: &str) -> Option<&'a Value> {
    manifest
        .config_fields
        .iter()
        .find(|f| f.key == key)
        .and_then(|f| f.default.as_ref())
}

fn check_type(field: &ConfigField, value: &Value) -> Result<(), String> {
    let key = &field.key;
    match field.field_type {
        FieldType::Text | FieldType::Password | FieldType::Textarea => {
            if !value.is_string() {
                return Err(format!("field '{key}' must be a string"));
            }
        }
        FieldType::Url => {
            let Some(s) = value.as_str() else {
                return Err(format!("field '{key}' must be a URL string"));
            };
            if !(s.starts_with("http://") || s.starts_with("https://")) {
                return Err(format!("field '{key}' must be an http(s) URL"));
            }
        }
        FieldType::Number => {
            if !value.is_number() {
                return Err(format!("field '{key}' must be a number"));
            }
        }
        FieldType::Boolean => {
            if !value.is_boolean() {
                return Err(format!("field '{key}' must be a boolean"));
            }
        }
        FieldType::Select => {
            let Some(s) = value.as_str() else {
                return Err(format!("field '{key}' must be one of {:?}", field.options));
            };
            if !field.options.iter().any(|o| o == s) {
                return Err(format!(
                    "field '{key}' must be one of {:?}, got '{s}'",
                    field.options
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn catalog_has_three_builtins() {
        let manifests = builtin_manifests();
        assert_eq!(manifests.len(), 3);
        assert!(manifests.iter().all(|m| m.builtin));
        assert!(manifest_for(CLAUDE_CODE).is_some());
        assert!(manifest_for("smoke-signals").is_none());
    }

    #[test]
    fn claude_code_is_single_instance() {
        let m = manifest_for(CLAUDE_CODE).unwrap();
        assert!(!m.multi_instance);
        assert_eq!(m.category, AdapterCategory::Internal);
    }

    #[test]
    fn valid_webhook_config_gets_defaults() {
        let m = manifest_for(WEBHOOK).unwrap();
        let out = validate_config(&m, &json!({"secret": "s3"})).unwrap();
        assert_eq!(out["secret"], "s3");
        assert_eq!(out["sign_outbound"], false);
        // signature_header is hidden while sign_outbound is false.
        assert!(out.get("signature_header").is_none());
    }

    #[test]
    fn show_when_reveals_dependent_field_default() {
        let m = manifest_for(WEBHOOK).unwrap();
        let out = validate_config(&m, &json!({"secret": "s3", "sign_outbound": true})).unwrap();
        assert_eq!(out["signature_header"], "x-relay-signature");
    }

    #[test]
    fn missing_required_field_reported() {
        let m = manifest_for(TELEGRAM).unwrap();
        let errors = validate_config(&m, &json!({"token": "t"})).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("chat_id")));
    }

    #[test]
    fn unknown_field_rejected() {
        let m = manifest_for(WEBHOOK).unwrap();
        let errors = validate_config(&m, &json!({"secret": "s", "bogus": 1})).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("bogus")));
    }

    #[test]
    fn type_mismatches_accumulate() {
        let m = manifest_for(TELEGRAM).unwrap();
        let errors =
            validate_config(&m, &json!({"token": 5, "chat_id": true, "api_base": "ftp://x"}))
                .unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn non_object_config_rejected() {
        let m = manifest_for(WEBHOOK).unwrap();
        assert!(validate_config(&m, &json!([1, 2])).is_err());
    }

    #[test]
    fn manifest_subject_patterns_are_valid() {
        for m in builtin_manifests() {
            if let Some(p) = &m.subjects.inbound {
                relay_subject::validate_pattern(p).unwrap();
            }
            if let Some(p) = &m.subjects.outbound {
                relay_subject::validate_pattern(p).unwrap();
            }
        }
    }
}

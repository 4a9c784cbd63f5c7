//! Namespace settings.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{OomlError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct NamespaceSettings {
    /// Restrict property names to `^[a-z][a-zA-Z0-9]*$`
    #[serde(alias = "strict_property_names")]
    pub strict_property_names: bool,
    /// Debounce window for formatted attribute writes
    #[serde(alias = "write_delay_ms")]
    pub write_delay_ms: u64,
}

impl Default for NamespaceSettings {
    fn default() -> Self {
        Self {
            strict_property_names: true,
            write_delay_ms: 50,
        }
    }
}

impl NamespaceSettings {
    /// Read settings from a JSON object. Both `camelCase` and `snake_case`
    /// keys are accepted; an unknown key is a Reference error and a value of
    /// the wrong shape a Type error.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(OomlError::type_error("Namespace settings must be an object"));
        }
        Self::deserialize(value).map_err(|e| {
            let message = e.to_string();
            if message.starts_with("unknown field") {
                OomlError::reference(format!("Invalid namespace setting: {}", message))
            } else {
                OomlError::type_error(format!("Invalid namespace setting: {}", message))
            }
        })
    }

    pub fn write_delay(&self) -> Duration {
        Duration::from_millis(self.write_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let settings = NamespaceSettings::default();
        assert!(settings.strict_property_names);
        assert_eq!(settings.write_delay(), Duration::from_millis(50));

        let parsed: NamespaceSettings = serde_json::from_value(json!({ "write_delay_ms": 5 })).unwrap();
        assert!(parsed.strict_property_names);
        assert_eq!(parsed.write_delay_ms, 5);
    }

    #[test]
    fn test_from_json() {
        let settings = NamespaceSettings::from_json(&json!({ "strictPropertyNames": false })).unwrap();
        assert!(!settings.strict_property_names);

        assert_eq!(
            NamespaceSettings::from_json(&json!({ "verbose": true })).unwrap_err().kind(),
            ErrorKind::Reference
        );
        assert_eq!(
            NamespaceSettings::from_json(&json!({ "strict_property_names": "yes" }))
                .unwrap_err()
                .kind(),
            ErrorKind::Type
        );
        assert_eq!(
            NamespaceSettings::from_json(&json!({ "writeDelayMs": -5 })).unwrap_err().kind(),
            ErrorKind::Type
        );
        assert_eq!(
            NamespaceSettings::from_json(&json!([1])).unwrap_err().kind(),
            ErrorKind::Type
        );

        let both = NamespaceSettings::from_json(&json!({
            "strict_property_names": false,
            "writeDelayMs": 10
        }))
        .unwrap();
        assert_eq!(
            both,
            NamespaceSettings {
                strict_property_names: false,
                write_delay_ms: 10,
            }
        );
    }
}

//! Settings Documents
//!
//! The settings declaration a plugin serves on `@settings` and the reply it
//! sends back for every settings update.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subject suffix used for settings updates when the plugin does not pick one
pub const DEFAULT_SETTINGS_REPLY_TO: &str = "_settings.config.submit";

/// Settings form plus the last known value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsDeclaration {
    /// Subject suffix the platform pushes updates to
    #[serde(rename = "replyTo")]
    pub reply_to: String,
    pub jsonui: Value,
    pub jsonschema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Outcome of a settings update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsStatus {
    Accepted,
    NotAccepted,
    /// Another update was still being applied
    Busy,
}

/// Reply to a settings update request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsReply {
    pub status: SettingsStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SettingsReply {
    pub fn accepted() -> Self {
        Self {
            status: SettingsStatus::Accepted,
            error: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: SettingsStatus::NotAccepted,
            error: Some(reason.into()),
        }
    }

    pub fn busy() -> Self {
        Self {
            status: SettingsStatus::Busy,
            error: Some("another settings update is in progress".to_string()),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == SettingsStatus::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_wire_format() {
        assert_eq!(
            serde_json::to_value(SettingsReply::accepted()).unwrap(),
            json!({"status": "accepted"})
        );
        assert_eq!(
            serde_json::to_value(SettingsReply::rejected("api_key is required")).unwrap(),
            json!({"status": "not_accepted", "error": "api_key is required"})
        );
    }

    #[test]
    fn test_declaration_omits_missing_data() {
        let declaration = SettingsDeclaration {
            reply_to: DEFAULT_SETTINGS_REPLY_TO.to_string(),
            jsonui: json!({}),
            jsonschema: json!({"required": ["api_key"]}),
            data: None,
        };
        let value = serde_json::to_value(&declaration).unwrap();

        assert_eq!(value["replyTo"], "_settings.config.submit");
        assert!(value.get("data").is_none());
    }
}

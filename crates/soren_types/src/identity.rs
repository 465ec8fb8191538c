//! Plugin Identity
//!
//! The intro document a plugin publishes at startup and serves on `@intro`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Plugin introduction: who the plugin is and what it needs before it can run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginIntro {
    pub name: String,
    pub author: String,
    pub version: String,

    /// Extra information the platform must collect before the plugin is usable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Requirements>,
}

impl PluginIntro {
    pub fn new(
        name: impl Into<String>,
        author: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            author: author.into(),
            version: version.into(),
            requirements: None,
        }
    }

    pub fn with_requirements(mut self, requirements: Requirements) -> Self {
        self.requirements = Some(requirements);
        self
    }
}

/// Requirements form attached to the intro
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    /// Subject suffix the platform submits the requirements form to
    #[serde(rename = "replyTo")]
    pub reply_to: String,
    pub jsonui: Value,
    pub jsonschema: Value,
}

impl Requirements {
    pub fn new(reply_to: impl Into<String>, jsonui: Value, jsonschema: Value) -> Self {
        Self {
            reply_to: reply_to.into(),
            jsonui,
            jsonschema,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intro_without_requirements_omits_field() {
        let intro = PluginIntro::new("scanner", "Soren Team", "1.0.0");
        let value = serde_json::to_value(&intro).unwrap();

        assert_eq!(
            value,
            json!({"name": "scanner", "author": "Soren Team", "version": "1.0.0"})
        );
    }

    #[test]
    fn test_requirements_use_reply_to_key() {
        let intro = PluginIntro::new("scanner", "Soren Team", "1.0.0").with_requirements(
            Requirements::new("_requirements.submit", json!({"type": "VerticalLayout"}), json!({})),
        );
        let value = serde_json::to_value(&intro).unwrap();

        assert_eq!(value["requirements"]["replyTo"], "_requirements.submit");
        assert_eq!(value["requirements"]["jsonui"]["type"], "VerticalLayout");
    }
}

//! Operation Catalog
//!
//! Metadata describing the operations a plugin exposes. Handlers are attached
//! by the runtime; this module only holds what goes on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Form Descriptor
// ─────────────────────────────────────────────────────────────────────────────

/// Input form of an operation: a UI layout tree and a validation tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDescriptor {
    pub jsonui: Value,
    pub jsonschema: Value,
}

impl FormDescriptor {
    pub fn new(jsonui: Value, jsonschema: Value) -> Self {
        Self { jsonui, jsonschema }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Icon
// ─────────────────────────────────────────────────────────────────────────────

/// Icon shown next to an operation in the platform UI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Icon {
    #[serde(rename = "ref", default)]
    pub reference: String,
    #[serde(default)]
    pub icon: String,
}

impl Icon {
    pub fn new(reference: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            icon: icon.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Operation Info
// ─────────────────────────────────────────────────────────────────────────────

/// One entry of the operation catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationInfo {
    /// Unique key within a plugin, also the last token of the dispatch subject
    pub method: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Icon,
    #[serde(flatten)]
    pub form: Option<FormDescriptor>,
}

impl OperationInfo {
    pub fn new(method: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            title: title.into(),
            description: String::new(),
            icon: Icon::default(),
            form: None,
        }
    }

    /// Form document served on `<method>.@form`, `{}` when there is no form
    pub fn form_document(&self) -> Value {
        match &self.form {
            Some(form) => serde_json::to_value(form).unwrap_or_else(|_| Value::Object(Default::default())),
            None => Value::Object(Default::default()),
        }
    }
}

//! Assertions: signed statements attached to a TDF
//!
//! An assertion is hashed over its canonical JSON with the `binding` member
//! removed (keys sorted, no insignificant whitespace). The binding holds a
//! compact JWS over that hash and the manifest root signature.

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssertionType {
    #[serde(rename = "handling")]
    Handling,
    #[serde(rename = "other", alias = "base")]
    Base,
}

/// The object an assertion applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssertionScope {
    /// The whole trusted data object
    #[serde(rename = "tdo")]
    Tdo,
    #[serde(rename = "payload")]
    Payload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppliesToState {
    #[serde(rename = "encrypted")]
    Encrypted,
    #[serde(rename = "unencrypted")]
    Unencrypted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schema: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
}

/// Cryptographic binding of an assertion to its TDF
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
}

impl Binding {
    pub fn is_empty(&self) -> bool {
        self.method.is_empty() && self.signature.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    pub id: String,
    #[serde(rename = "type")]
    pub assertion_type: AssertionType,
    pub scope: AssertionScope,
    #[serde(rename = "appliesToState", default, skip_serializing_if = "Option::is_none")]
    pub applies_to_state: Option<AppliesToState>,
    pub statement: Statement,
    #[serde(default)]
    pub binding: Binding,
}

impl Assertion {
    /// Canonical JSON of the assertion without its binding
    pub fn canonical_json(&self) -> Result<String, ProtocolError> {
        let mut value = serde_json::to_value(self)?;
        if let serde_json::Value::Object(map) = &mut value {
            map.remove("binding");
        }
        Ok(serde_json::to_string(&sort_keys(value))?)
    }
}

fn sort_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sort_keys).collect())
        }
        other => other,
    }
}

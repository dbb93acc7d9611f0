//! Data policy embedded in the manifest
//!
//! The manifest carries `base64(JSON(Policy))`; the same base64 text is the
//! HMAC input of every policy binding.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub uuid: String,
    pub body: PolicyBody,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBody {
    #[serde(rename = "dataAttributes", default)]
    pub data_attributes: Vec<AttributeObject>,
    #[serde(default)]
    pub dissem: Vec<String>,
}

/// One attribute value the policy applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeObject {
    /// Fully qualified attribute value name
    pub attribute: String,
    #[serde(rename = "displayName", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "isDefault", default, skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
    #[serde(rename = "pubKey", default, skip_serializing_if = "Option::is_none")]
    pub pub_key: Option<String>,
    #[serde(rename = "kasURL", default, skip_serializing_if = "Option::is_none")]
    pub kas_url: Option<String>,
}

impl AttributeObject {
    pub fn new(attribute: impl Into<String>) -> Self {
        AttributeObject {
            attribute: attribute.into(),
            display_name: None,
            is_default: None,
            pub_key: None,
            kas_url: None,
        }
    }
}

impl Policy {
    pub fn new<I, S>(uuid: impl Into<String>, attributes: I, dissem: Vec<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Policy {
            uuid: uuid.into(),
            body: PolicyBody {
                data_attributes: attributes.into_iter().map(AttributeObject::new).collect(),
                dissem,
            },
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// `base64(JSON(self))`, as stored in `encryptionInformation.policy`
    pub fn to_base64(&self) -> Result<String, ProtocolError> {
        Ok(BASE64.encode(self.to_json()?))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, ProtocolError> {
        let json = BASE64.decode(encoded)?;
        serde_json::from_slice(&json).map_err(|e| ProtocolError::InvalidPolicy(e.to_string()))
    }

    /// Attribute value FQNs in policy order
    pub fn attribute_fqns(&self) -> impl Iterator<Item = &str> {
        self.body.data_attributes.iter().map(|a| a.attribute.as_str())
    }
}

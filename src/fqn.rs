//! Fully Qualified Name (FQN) support for TDF attributes
//!
//! Attribute values are identified by URLs of the form
//! `https://<namespace>/attr/<name>/value/<value>`. The key splitter groups
//! values by their attribute prefix (`https://<namespace>/attr/<name>`).
//!
//! # Example
//!
//! ```
//! use opentdf_core::fqn::AttributeFqn;
//!
//! let fqn = AttributeFqn::parse("https://example.com/attr/classification/value/secret")?;
//! assert_eq!(fqn.namespace(), "example.com");
//! assert_eq!(fqn.name(), "classification");
//! assert_eq!(fqn.value(), Some("secret"));
//! assert_eq!(fqn.attribute_prefix(), "https://example.com/attr/classification");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use thiserror::Error;

/// FQN parsing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FqnError {
    #[error("Malformed attribute URL: {0}")]
    MalformedUrl(String),

    #[error("Invalid scheme: expected {expected}, found {found}")]
    InvalidScheme {
        expected: &'static str,
        found: String,
    },

    #[error("Attribute URL must use https: {url}")]
    NotHttps { url: String },

    #[error("Missing FQN component: {component}")]
    MissingComponent { component: &'static str },

    #[error("Missing /attr/ path in {url}")]
    MissingAttrStructure { url: String },

    #[error("Attribute value FQN required, got {url}")]
    MissingValue { url: String },
}

/// Fully Qualified Name for a TDF attribute or attribute value
///
/// The scheme is preserved, the namespace is lowercased, and the name and
/// value are percent-decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeFqn {
    scheme: String,
    namespace: String,
    name: String,
    value: Option<String>,
}

impl AttributeFqn {
    /// Parse an attribute or attribute value FQN with default rules
    pub fn parse(s: &str) -> Result<Self, FqnError> {
        Self::parse_with_rules(s, &FqnValidationRules::default())
    }

    /// Parse an FQN that must carry a `/value/<value>` component
    pub fn parse_value(s: &str) -> Result<Self, FqnError> {
        Self::parse_with_rules(
            s,
            &FqnValidationRules {
                require_value: true,
                ..FqnValidationRules::default()
            },
        )
    }

    /// Parse an FQN with custom validation rules
    pub fn parse_with_rules(s: &str, rules: &FqnValidationRules) -> Result<Self, FqnError> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| FqnError::MalformedUrl("Missing scheme separator ://".to_string()))?;

        let scheme = scheme.to_ascii_lowercase();
        if scheme != "https" && scheme != "http" {
            return Err(FqnError::InvalidScheme {
                expected: "https",
                found: scheme,
            });
        }
        if rules.require_https && scheme == "http" {
            return Err(FqnError::NotHttps { url: s.to_string() });
        }

        let (namespace, path) = rest.split_once('/').unwrap_or((rest, ""));
        if namespace.is_empty() {
            return Err(FqnError::MissingComponent {
                component: "namespace",
            });
        }
        let namespace = namespace.to_lowercase();

        let path = path.strip_prefix("attr/").ok_or_else(|| FqnError::MissingAttrStructure {
            url: s.to_string(),
        })?;

        let (name, value) = match path.split_once("/value/") {
            Some((name, value)) => (name, Some(value)),
            None => (path, None),
        };
        if name.is_empty() || name.contains('/') || name.chars().any(char::is_whitespace) {
            return Err(FqnError::MissingComponent { component: "name" });
        }

        let value = match value {
            Some(v) if v.is_empty() || v.chars().any(char::is_whitespace) => {
                return Err(FqnError::MissingComponent { component: "value" })
            }
            Some(v) => Some(percent_decode(v)),
            None if rules.require_value => {
                return Err(FqnError::MissingValue { url: s.to_string() })
            }
            None => None,
        };

        Ok(Self {
            scheme,
            namespace,
            name: percent_decode(name),
            value,
        })
    }

    /// Create an FQN for an attribute value over https
    pub fn with_value(ns: &str, name: &str, value: &str) -> Self {
        Self {
            scheme: "https".to_string(),
            namespace: ns.to_lowercase(),
            name: name.to_string(),
            value: Some(value.to_string()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// The attribute definition this value belongs to
    ///
    /// `https://example.com/attr/level/value/high` → `https://example.com/attr/level`
    pub fn attribute_prefix(&self) -> String {
        format!(
            "{}://{}/attr/{}",
            self.scheme,
            self.namespace,
            percent_encode(&self.name)
        )
    }

    /// Full URL form
    pub fn to_url(&self) -> String {
        match &self.value {
            Some(value) => format!("{}/value/{}", self.attribute_prefix(), percent_encode(value)),
            None => self.attribute_prefix(),
        }
    }
}

impl std::fmt::Display for AttributeFqn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_url())
    }
}

impl std::str::FromStr for AttributeFqn {
    type Err = FqnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'a> TryFrom<&'a str> for AttributeFqn {
    type Error = FqnError;

    fn try_from(s: &'a str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

/// FQN validation rules
#[derive(Debug, Clone, Default)]
pub struct FqnValidationRules {
    /// Reject `http://` URLs
    pub require_https: bool,
    /// Require the `/value/<value>` component
    pub require_value: bool,
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&String::from_utf8_lossy(&bytes[i + 1..i + 3]), 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

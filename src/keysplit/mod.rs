//! Key-split engine
//!
//! Splits the payload key into XOR shares, one per KAS disjunction derived
//! from the data attributes. Reconstruction needs one share from every
//! disjunction; any single KAS inside a disjunction can release its share.
//!
//! # Example
//!
//! ```
//! use opentdf_core::keysplit::{KasGrant, Splitter};
//! use opentdf_crypto::PayloadKey;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dek = PayloadKey::from_slice(&[7u8; 32])?;
//! let result = Splitter::default().split(&dek, &[], &[KasGrant::new("https://kas.example.com")])?;
//! assert_eq!(result.splits.len(), 1);
//! assert_eq!(result.splits[0].data.as_slice(), dek.as_slice());
//! # Ok(())
//! # }
//! ```

pub mod plan;

use crate::fqn::AttributeFqn;
use opentdf_crypto::{OsRandom, PayloadKey, RandomSource, SplitKey};
use opentdf_protocol::KeyAlgorithm;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

pub use plan::{plan, Disjunction, SplitPlan};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SplitError {
    #[error("No KAS grants found and no default KAS configured")]
    NoDefaultKas,

    #[error("Split {index} has no KAS with a known public key")]
    EmptySplit { index: usize },

    #[error("Unknown attribute rule: {0}")]
    UnknownRule(String),
}

/// How the values of one attribute combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeRule {
    AllOf,
    AnyOf,
    Hierarchy,
}

impl FromStr for AttributeRule {
    type Err = SplitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "").as_str() {
            "allof" | "attributeruletypeenumallof" => Ok(AttributeRule::AllOf),
            "anyof" | "attributeruletypeenumanyof" => Ok(AttributeRule::AnyOf),
            "hierarchy" | "attributeruletypeenumhierarchy" => Ok(AttributeRule::Hierarchy),
            _ => Err(SplitError::UnknownRule(s.to_string())),
        }
    }
}

/// A KAS public key as published by the KAS or policy service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KasPublicKey {
    pub kid: Option<String>,
    pub algorithm: KeyAlgorithm,
    pub pem: String,
}

impl KasPublicKey {
    pub fn new(algorithm: KeyAlgorithm, pem: impl Into<String>) -> Self {
        KasPublicKey {
            kid: None,
            algorithm,
            pem: pem.into(),
        }
    }

    #[must_use]
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }
}

/// A KAS granted access to an attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KasGrant {
    pub url: String,
    pub public_key: Option<KasPublicKey>,
}

impl KasGrant {
    pub fn new(url: impl Into<String>) -> Self {
        KasGrant {
            url: url.into(),
            public_key: None,
        }
    }

    #[must_use]
    pub fn with_public_key(mut self, key: KasPublicKey) -> Self {
        self.public_key = Some(key);
        self
    }
}

/// One data attribute value with its rule and grants
///
/// `rank` is the position of the value in its attribute's declared order;
/// for hierarchies a lower rank is a higher level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeValue {
    pub fqn: AttributeFqn,
    pub rule: AttributeRule,
    pub rank: usize,
    pub grants: Vec<KasGrant>,
}

impl AttributeValue {
    pub fn new(fqn: AttributeFqn, rule: AttributeRule) -> Self {
        AttributeValue {
            fqn,
            rule,
            rank: 0,
            grants: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    #[must_use]
    pub fn with_grant(mut self, grant: KasGrant) -> Self {
        self.grants.push(grant);
        self
    }
}

/// One XOR share and the KAS that may each release it
#[derive(Debug, Clone)]
pub struct Split {
    /// Empty when the key is not split
    pub id: String,
    pub data: SplitKey,
    pub kas_urls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SplitResult {
    pub splits: Vec<Split>,
    pub kas_public_keys: BTreeMap<String, KasPublicKey>,
}

/// Generates key splits from attribute values
pub struct Splitter {
    rng: Arc<dyn RandomSource>,
}

impl Default for Splitter {
    fn default() -> Self {
        Splitter {
            rng: Arc::new(OsRandom),
        }
    }
}

impl Splitter {
    pub fn new(rng: Arc<dyn RandomSource>) -> Self {
        Splitter { rng }
    }

    /// Plan and split in one step
    pub fn split(
        &self,
        dek: &PayloadKey,
        values: &[AttributeValue],
        default_kas: &[KasGrant],
    ) -> Result<SplitResult, SplitError> {
        let plan = plan(values, default_kas)?;
        self.split_plan(dek, &plan)
    }

    /// Split `dek` over an existing plan
    ///
    /// The first N-1 shares are random and the last is the DEK XORed with
    /// all of them. KAS without a public key are dropped from their share.
    pub fn split_plan(&self, dek: &PayloadKey, plan: &SplitPlan) -> Result<SplitResult, SplitError> {
        let mut groups = Vec::with_capacity(plan.disjunctions.len());
        for (index, disjunction) in plan.disjunctions.iter().enumerate() {
            let mut kas_urls = Vec::with_capacity(disjunction.urls().len());
            for url in disjunction.urls() {
                if plan.public_keys.contains_key(url) {
                    kas_urls.push(url.clone());
                } else {
                    tracing::warn!(kas_url = %url, split = index, "No public key for KAS, dropping it from split");
                }
            }
            if kas_urls.is_empty() {
                return Err(SplitError::EmptySplit { index });
            }
            groups.push(kas_urls);
        }

        let count = groups.len();
        let mut last = SplitKey::from(dek);
        let mut splits = Vec::with_capacity(count);
        for (index, kas_urls) in groups.into_iter().enumerate() {
            let id = if count > 1 { self.split_id() } else { String::new() };
            let data = if index + 1 < count {
                let share = SplitKey::random(self.rng.as_ref());
                for (a, b) in last.as_mut_slice().iter_mut().zip(share.as_slice()) {
                    *a ^= b;
                }
                share
            } else {
                last.clone()
            };
            splits.push(Split { id, data, kas_urls });
        }

        let kas_public_keys = splits
            .iter()
            .flat_map(|s| s.kas_urls.iter())
            .filter_map(|url| plan.public_keys.get(url).map(|k| (url.clone(), k.clone())))
            .collect();

        tracing::debug!(splits = splits.len(), "Generated key splits");
        Ok(SplitResult {
            splits,
            kas_public_keys,
        })
    }

    fn split_id(&self) -> String {
        let mut bytes = [0u8; 16];
        self.rng.fill(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentdf_crypto::SeededRandom;
    use proptest::prelude::*;

    fn key(url: &str) -> KasGrant {
        KasGrant::new(url).with_public_key(KasPublicKey::new(KeyAlgorithm::RsaOaep, "pem"))
    }

    fn all_of(fqn: &str, kas: KasGrant) -> AttributeValue {
        AttributeValue::new(AttributeFqn::parse(fqn).unwrap(), AttributeRule::AllOf).with_grant(kas)
    }

    fn xor_all(result: &SplitResult) -> Vec<u8> {
        let mut acc = vec![0u8; 32];
        for split in &result.splits {
            for (a, b) in acc.iter_mut().zip(split.data.as_slice()) {
                *a ^= b;
            }
        }
        acc
    }

    #[test]
    fn test_single_split_is_dek_with_empty_id() {
        let dek = PayloadKey::from_slice(&[9u8; 32]).unwrap();
        let result = Splitter::default().split(&dek, &[], &[key("https://kas")]).unwrap();
        assert_eq!(result.splits.len(), 1);
        assert!(result.splits[0].id.is_empty());
        assert_eq!(result.splits[0].data.as_slice(), dek.as_slice());
        assert!(result.kas_public_keys.contains_key("https://kas"));
    }

    #[test]
    fn test_two_all_of_splits_reconstruct() {
        let dek = PayloadKey::from_slice(&[0x42u8; 32]).unwrap();
        let values = [
            all_of("https://a.org/attr/rel/value/usa", key("https://kas1")),
            all_of("https://a.org/attr/rel/value/gbr", key("https://kas2")),
        ];
        let result = Splitter::default().split(&dek, &values, &[]).unwrap();
        assert_eq!(result.splits.len(), 2);
        assert_ne!(result.splits[0].id, result.splits[1].id);
        assert!(!result.splits[0].id.is_empty());
        assert_ne!(result.splits[0].data.as_slice(), dek.as_slice());
        assert_eq!(xor_all(&result), dek.as_slice());
    }

    #[test]
    fn test_kas_without_key_dropped_then_empty() {
        let dek = PayloadKey::from_slice(&[1u8; 32]).unwrap();
        let values = [AttributeValue::new(
            AttributeFqn::parse("https://a.org/attr/x/value/1").unwrap(),
            AttributeRule::AnyOf,
        )
        .with_grant(KasGrant::new("https://no-key"))
        .with_grant(key("https://with-key"))];
        let result = Splitter::default().split(&dek, &values, &[]).unwrap();
        assert_eq!(result.splits[0].kas_urls, vec!["https://with-key".to_string()]);

        let err = Splitter::default()
            .split(&dek, &[], &[KasGrant::new("https://no-key")])
            .unwrap_err();
        assert_eq!(err, SplitError::EmptySplit { index: 0 });
    }

    #[test]
    fn test_seeded_splits_are_deterministic() {
        let dek = PayloadKey::from_slice(&[3u8; 32]).unwrap();
        let values = [
            all_of("https://a.org/attr/rel/value/usa", key("https://kas1")),
            all_of("https://a.org/attr/rel/value/gbr", key("https://kas2")),
        ];
        let run = || {
            Splitter::new(Arc::new(SeededRandom::from_u64(5)))
                .split(&dek, &values, &[])
                .unwrap()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.splits[0].id, b.splits[0].id);
        assert_eq!(a.splits[0].data, b.splits[0].data);
    }

    #[test]
    fn test_rule_from_str() {
        assert_eq!("allOf".parse::<AttributeRule>().unwrap(), AttributeRule::AllOf);
        assert_eq!("ANY_OF".parse::<AttributeRule>().unwrap(), AttributeRule::AnyOf);
        assert_eq!("hierarchy".parse::<AttributeRule>().unwrap(), AttributeRule::Hierarchy);
        assert!("sometimes".parse::<AttributeRule>().is_err());
    }

    proptest! {
        #[test]
        fn prop_xor_of_splits_is_dek(dek in prop::array::uniform32(any::<u8>()), n in 1usize..6, seed in any::<u64>()) {
            let dek = PayloadKey::from_slice(&dek).unwrap();
            let values: Vec<AttributeValue> = (0..n)
                .map(|i| all_of(&format!("https://a.org/attr/a/value/v{}", i), key(&format!("https://kas{}", i))))
                .collect();
            let result = Splitter::new(Arc::new(SeededRandom::from_u64(seed)))
                .split(&dek, &values, &[])
                .unwrap();
            prop_assert_eq!(result.splits.len(), n);
            prop_assert_eq!(xor_all(&result), dek.as_slice().to_vec());
        }
    }
}

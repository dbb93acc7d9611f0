//! Split planning: attribute rules to KAS disjunctions
//!
//! A plan is a conjunction of disjunctions. Every disjunction becomes one key
//! split; the split secret is wrapped to each KAS in the disjunction, so any
//! one of them can release it.

use super::{AttributeRule, AttributeValue, KasGrant, KasPublicKey, SplitError};
use std::collections::BTreeMap;

/// Set of KAS URLs that can each release the same split
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Disjunction(Vec<String>);

impl Disjunction {
    /// Sorted, de-duplicated, blank URLs dropped
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut urls: Vec<String> = urls
            .into_iter()
            .map(Into::into)
            .filter(|u| !u.is_empty())
            .collect();
        urls.sort();
        urls.dedup();
        Disjunction(urls)
    }

    pub fn urls(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ordered list of disjunctions plus the public keys known for each KAS
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitPlan {
    pub disjunctions: Vec<Disjunction>,
    pub public_keys: BTreeMap<String, KasPublicKey>,
}

impl SplitPlan {
    fn push(&mut self, disjunction: Disjunction) {
        if !disjunction.is_empty() && !self.disjunctions.contains(&disjunction) {
            self.disjunctions.push(disjunction);
        }
    }

    fn learn_keys<'a>(&mut self, grants: impl IntoIterator<Item = &'a KasGrant>) {
        for grant in grants {
            if let Some(key) = &grant.public_key {
                self.public_keys
                    .entry(grant.url.clone())
                    .or_insert_with(|| key.clone());
            }
        }
    }
}

/// Build a split plan from attribute values
///
/// Values are grouped by attribute prefix in first-seen order. When no value
/// carries a grant, every default KAS becomes its own split; with no default
/// either the plan fails with [`SplitError::NoDefaultKas`].
pub fn plan(values: &[AttributeValue], default_kas: &[KasGrant]) -> Result<SplitPlan, SplitError> {
    let mut groups: Vec<(String, Vec<&AttributeValue>)> = Vec::new();
    for value in values {
        let prefix = value.fqn.attribute_prefix();
        match groups.iter_mut().find(|(p, _)| *p == prefix) {
            Some((_, members)) => members.push(value),
            None => groups.push((prefix, vec![value])),
        }
    }

    let mut plan = SplitPlan::default();
    for (_, members) in &groups {
        let rule = members[0].rule;
        match rule {
            AttributeRule::AllOf => {
                for value in members {
                    for grant in &value.grants {
                        plan.push(Disjunction::new([grant.url.as_str()]));
                    }
                    plan.learn_keys(&value.grants);
                }
            }
            AttributeRule::AnyOf => {
                let grants = members.iter().flat_map(|v| v.grants.iter());
                plan.push(Disjunction::new(grants.clone().map(|g| g.url.as_str())));
                plan.learn_keys(grants);
            }
            AttributeRule::Hierarchy => {
                let mut ranked: Vec<&&AttributeValue> = members.iter().collect();
                ranked.sort_by_key(|v| v.rank);
                if let Some(top) = ranked.into_iter().find(|v| !v.grants.is_empty()) {
                    plan.push(Disjunction::new(top.grants.iter().map(|g| g.url.as_str())));
                    plan.learn_keys(&top.grants);
                }
            }
        }
    }

    if plan.disjunctions.is_empty() {
        if default_kas.is_empty() {
            return Err(SplitError::NoDefaultKas);
        }
        for grant in default_kas {
            plan.push(Disjunction::new([grant.url.as_str()]));
        }
        plan.learn_keys(default_kas);
    }

    Ok(plan)
}

//! Deduplication of candidate rows against the batch and the destination.
//!
//! Severity order:
//! 1. the primary identity (e.g. full name) was already seen: skip the row;
//! 2. a secondary unique field (national ID, email) was already seen:
//!    rewrite it with a deterministic synthesized value;
//! 3. otherwise accept.
//!
//! Decisions depend only on the policy, the candidate and the seen sets, so
//! the same batch in the same order always yields the same decisions.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::core::{NormalizedRecord, SqlValue};
use crate::error::Result;
use crate::normalize::slug;
use crate::resolve::NaturalKey;
use crate::target::TargetWriter;

/// How a replacement value for a colliding secondary field is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Synthesis {
    /// `<prefix><original>`, e.g. DNI `40123456` -> `dd40123456`.
    Prefix(String),
    /// `<original><suffix>`.
    Suffix(String),
    /// `<prefix><identity slug><suffix>`, truncated to `max_len`.
    FromIdentity {
        prefix: String,
        suffix: String,
        max_len: Option<usize>,
    },
    /// `<prefix><value of from_field><suffix>`, or the identity slug when
    /// that field is empty. Reads the candidate before any rewrite.
    Placeholder {
        from_field: String,
        prefix: String,
        suffix: String,
    },
}

/// A secondary uniqueness rule for one column.
#[derive(Debug, Clone)]
pub struct SecondaryRule {
    pub column: String,
    pub synthesis: Synthesis,
    pub reason: String,
}

impl SecondaryRule {
    pub fn new(column: &str, synthesis: Synthesis, reason: &str) -> Self {
        Self {
            column: column.to_string(),
            synthesis,
            reason: reason.to_string(),
        }
    }
}

/// Per-unit uniqueness configuration.
#[derive(Debug, Clone)]
pub struct DedupPolicy {
    /// Columns forming the primary identity.
    pub identity: Vec<String>,
    pub identity_reason: String,
    /// Applied in order.
    pub secondary: Vec<SecondaryRule>,
}

impl DedupPolicy {
    pub fn new(identity: &[&str], identity_reason: &str) -> Self {
        Self {
            identity: identity.iter().map(|c| c.to_string()).collect(),
            identity_reason: identity_reason.to_string(),
            secondary: Vec::new(),
        }
    }

    pub fn secondary(mut self, rule: SecondaryRule) -> Self {
        self.secondary.push(rule);
        self
    }

    /// Columns to read from the destination when seeding.
    pub fn seed_columns(&self) -> Vec<String> {
        let mut cols = self.identity.clone();
        cols.extend(self.secondary.iter().map(|r| r.column.clone()));
        cols
    }

    fn identity_key(&self, record: &NormalizedRecord) -> Option<NaturalKey> {
        NaturalKey::from_parts(
            self.identity
                .iter()
                .map(|c| record.get(c).unwrap_or(&SqlValue::Null)),
        )
    }
}

/// One field replaced by the deduplicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRewrite {
    pub column: String,
    pub original: Option<String>,
    pub value: String,
}

/// Verdict for a candidate row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictDecision {
    Accept,
    Skip { reason: String },
    Rewrite {
        rewrites: Vec<FieldRewrite>,
        reason: String,
    },
}

/// Keys seen for one field set, split by where they came from.
#[derive(Debug, Clone, Default)]
pub struct SeenKeys {
    pub batch: HashSet<NaturalKey>,
    pub target: HashSet<NaturalKey>,
}

impl SeenKeys {
    pub fn contains(&self, key: &NaturalKey) -> bool {
        self.batch.contains(key) || self.target.contains(key)
    }
}

/// Seen identities and secondary values.
#[derive(Debug, Clone, Default)]
pub struct SeenValues {
    pub identity: SeenKeys,
    pub secondary: HashMap<String, SeenKeys>,
}

impl SeenValues {
    fn secondary_contains(&self, column: &str, key: &NaturalKey) -> bool {
        self.secondary
            .get(column)
            .map(|s| s.contains(key))
            .unwrap_or(false)
    }
}

/// Decide what happens to `candidate`. Pure: the seen sets are not updated.
pub fn decide(
    policy: &DedupPolicy,
    candidate: &NormalizedRecord,
    seen: &SeenValues,
) -> ConflictDecision {
    let identity = policy.identity_key(candidate);
    if let Some(key) = &identity {
        if seen.identity.contains(key) {
            return ConflictDecision::Skip {
                reason: policy.identity_reason.clone(),
            };
        }
    }

    let identity_slug = identity.as_ref().map(|k| slug(k.as_str())).unwrap_or_default();
    let mut rewrites = Vec::new();
    let mut reasons: Vec<&str> = Vec::new();

    for rule in &policy.secondary {
        let Some(original) = candidate.text(&rule.column) else {
            continue;
        };
        let Some(key) = NaturalKey::from_text(original) else {
            continue;
        };
        if !seen.secondary_contains(&rule.column, &key) {
            continue;
        }

        let value = (1u32..)
            .map(|attempt| synthesize(&rule.synthesis, original, candidate, &identity_slug, attempt))
            .find(|v| {
                NaturalKey::from_text(v)
                    .map(|k| !seen.secondary_contains(&rule.column, &k))
                    .unwrap_or(false)
            })
            .unwrap_or_default();

        rewrites.push(FieldRewrite {
            column: rule.column.clone(),
            original: Some(original.to_string()),
            value,
        });
        reasons.push(&rule.reason);
    }

    if rewrites.is_empty() {
        ConflictDecision::Accept
    } else {
        ConflictDecision::Rewrite {
            rewrites,
            reason: reasons.join("; "),
        }
    }
}

/// Build the `attempt`-th candidate value; attempts after the first carry a
/// `_N` counter ahead of any suffix.
fn synthesize(
    synthesis: &Synthesis,
    original: &str,
    candidate: &NormalizedRecord,
    identity_slug: &str,
    attempt: u32,
) -> String {
    let counter = if attempt > 1 {
        format!("_{}", attempt)
    } else {
        String::new()
    };
    match synthesis {
        Synthesis::Prefix(prefix) => format!("{}{}{}", prefix, original, counter),
        Synthesis::Suffix(suffix) => format!("{}{}{}", original, counter, suffix),
        Synthesis::FromIdentity {
            prefix,
            suffix,
            max_len,
        } => {
            let mut base = format!("{}{}", prefix, identity_slug);
            if let Some(max) = max_len {
                base = base.chars().take(*max).collect();
            }
            format!("{}{}{}", base, counter, suffix)
        }
        Synthesis::Placeholder {
            from_field,
            prefix,
            suffix,
        } => {
            let base = candidate
                .text(from_field)
                .map(str::to_string)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| identity_slug.to_string());
            format!("{}{}{}{}", prefix, base, counter, suffix)
        }
    }
}

/// Identity key as a file-name-like token: `Ana Diaz` -> `ana_diaz`.
pub fn identity_slug(identity: &str) -> String {
    slug(identity)
}

/// E-mail for a person without one: `dni.<dni>@<domain>`, or
/// `dni.<identity slug>@<domain>` when the national ID is missing too.
pub fn placeholder_email(dni: Option<&str>, identity: &str, domain: &str) -> String {
    match dni.map(str::trim).filter(|d| !d.is_empty()) {
        Some(dni) => format!("dni.{}@{}", dni, domain),
        None => format!("dni.{}@{}", identity_slug(identity), domain),
    }
}

/// National ID for a person without one: `dd_<identity slug>`, 12 chars max.
pub fn placeholder_national_id(identity: &str) -> String {
    format!("dd_{}", identity_slug(identity)).chars().take(12).collect()
}

/// Stateful wrapper: decides, applies rewrites, and remembers what was accepted.
#[derive(Debug)]
pub struct Deduplicator {
    policy: DedupPolicy,
    seen: SeenValues,
}

impl Deduplicator {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            policy,
            seen: SeenValues::default(),
        }
    }

    /// Seed the target-side sets from rows already in the destination table.
    pub async fn seed_from_target(&mut self, table: &str, target: &dyn TargetWriter) -> Result<()> {
        let columns = self.policy.seed_columns();
        let rows = target.fetch_columns(table, &columns).await?;
        let n_identity = self.policy.identity.len();
        for row in &rows {
            if let Some(key) = NaturalKey::from_parts(&row[..n_identity]) {
                self.seen.identity.target.insert(key);
            }
            for (rule, value) in self.policy.secondary.iter().zip(&row[n_identity..]) {
                if let Some(key) = NaturalKey::from_parts([value]) {
                    self.seen
                        .secondary
                        .entry(rule.column.clone())
                        .or_default()
                        .target
                        .insert(key);
                }
            }
        }
        debug!(
            "Seeded deduplicator from {} with {} existing rows",
            table,
            rows.len()
        );
        Ok(())
    }

    /// Decide on `candidate`, applying any rewrite in place. Skipped rows
    /// leave the seen sets untouched.
    pub fn process(&mut self, candidate: &mut NormalizedRecord) -> ConflictDecision {
        let decision = decide(&self.policy, candidate, &self.seen);
        if let ConflictDecision::Rewrite { rewrites, .. } = &decision {
            for rw in rewrites {
                candidate.set(rw.column.clone(), rw.value.clone());
            }
        }
        if !matches!(decision, ConflictDecision::Skip { .. }) {
            self.observe(candidate);
        }
        decision
    }

    fn observe(&mut self, accepted: &NormalizedRecord) {
        if let Some(key) = self.policy.identity_key(accepted) {
            self.seen.identity.batch.insert(key);
        }
        for rule in &self.policy.secondary {
            if let Some(key) = accepted.text(&rule.column).and_then(NaturalKey::from_text) {
                self.seen
                    .secondary
                    .entry(rule.column.clone())
                    .or_default()
                    .batch
                    .insert(key);
            }
        }
    }

    pub fn seen(&self) -> &SeenValues {
        &self.seen
    }
}

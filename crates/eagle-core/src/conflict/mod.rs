//! Cross-region conflict resolution.
//!
//! Resolution is a pure function of the conflict, the policy, the primary
//! region and a [`Stamp`] (record id and audit time). Every outcome, rejections included, becomes an
//! immutable [`ConflictRecord`]; persistence lives in [`log`].

pub mod log;

pub use log::ConflictLog;

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EagleError, Result};

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    LastWriteWins,
    MergeWithPriority,
    SourcePriority,
    ImmutableAppendOnly,
    FreshnessPriority,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::LastWriteWins,
        Strategy::MergeWithPriority,
        Strategy::SourcePriority,
        Strategy::ImmutableAppendOnly,
        Strategy::FreshnessPriority,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::LastWriteWins => "last-write-wins",
            Strategy::MergeWithPriority => "merge-with-priority",
            Strategy::SourcePriority => "source-priority",
            Strategy::ImmutableAppendOnly => "immutable-append-only",
            Strategy::FreshnessPriority => "freshness-priority",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = EagleError;

    fn from_str(s: &str) -> Result<Self> {
        Strategy::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<_> = Strategy::ALL.iter().map(|st| st.as_str()).collect();
                EagleError::InvalidStrategy(format!("'{s}' (expected one of: {})", known.join(", ")))
            })
    }
}

// ---------------------------------------------------------------------------
// Candidates and conflicts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub region: String,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
    /// Remaining time-to-live. Missing means already expired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_remaining_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub entity_id: String,
    /// Data category used to select the strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub candidates: Vec<Candidate>,
}

impl Conflict {
    pub fn validate(&self) -> Result<()> {
        if self.entity_id.trim().is_empty() {
            return Err(EagleError::InvalidConflict("entity id is empty".into()));
        }
        if self.candidates.len() < 2 {
            return Err(EagleError::InvalidConflict(format!(
                "'{}' needs at least two candidates, got {}",
                self.entity_id,
                self.candidates.len()
            )));
        }
        let mut seen = BTreeSet::new();
        for c in &self.candidates {
            if !seen.insert(c.region.as_str()) {
                return Err(EagleError::InvalidConflict(format!(
                    "'{}' has more than one candidate from region '{}'",
                    self.entity_id, c.region
                )));
            }
        }
        Ok(())
    }
}

/// Build a conflict only when the regions actually disagree.
pub fn detect(
    entity_id: impl Into<String>,
    category: Option<String>,
    candidates: Vec<Candidate>,
) -> Option<Conflict> {
    let first = candidates.first()?;
    if candidates.iter().all(|c| c.value == first.value) {
        return None;
    }
    Some(Conflict {
        entity_id: entity_id.into(),
        category,
        candidates,
    })
}

// ---------------------------------------------------------------------------
// ConflictRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Resolved {
        /// `None` when the value was merged from several regions.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        winner_region: Option<String>,
        value: Value,
        /// Field → region, for merged values.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        field_sources: BTreeMap<String, String>,
    },
    Rejected {
        reason: String,
    },
}

/// Identity and time given to a new audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub id: Uuid,
    pub at: DateTime<Utc>,
}

impl Stamp {
    pub fn new(id: Uuid, at: DateTime<Utc>) -> Self {
        Self { id, at }
    }

    /// A random id at the current time.
    pub fn fresh() -> Self {
        Self::new(Uuid::new_v4(), Utc::now())
    }
}

/// Audit entry. Never mutated once recorded; a rejected record is closed by
/// appending a settlement that references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: Uuid,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub strategy: Strategy,
    pub candidates: Vec<Candidate>,
    pub resolution: Resolution,
    pub requires_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settles: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
}

impl ConflictRecord {
    fn new(conflict: &Conflict, strategy: Strategy, resolution: Resolution, stamp: Stamp) -> Self {
        let requires_review = matches!(resolution, Resolution::Rejected { .. });
        Self {
            id: stamp.id,
            entity_id: conflict.entity_id.clone(),
            category: conflict.category.clone(),
            strategy,
            candidates: conflict.candidates.clone(),
            resolution,
            requires_review,
            settles: None,
            recorded_at: stamp.at,
        }
    }

    /// Manual decision for a record awaiting review: `region`'s candidate wins.
    pub fn settlement(open: &ConflictRecord, region: &str, stamp: Stamp) -> Result<Self> {
        if !open.requires_review || open.settles.is_some() {
            return Err(EagleError::InvalidConflict(format!(
                "record {} is not awaiting review",
                open.id
            )));
        }
        let chosen = open
            .candidates
            .iter()
            .find(|c| c.region == region)
            .ok_or_else(|| {
                EagleError::InvalidConflict(format!(
                    "record {} has no candidate from region '{region}'",
                    open.id
                ))
            })?;
        Ok(Self {
            id: stamp.id,
            entity_id: open.entity_id.clone(),
            category: open.category.clone(),
            strategy: open.strategy,
            candidates: open.candidates.clone(),
            resolution: Resolution::Resolved {
                winner_region: Some(chosen.region.clone()),
                value: chosen.value.clone(),
                field_sources: BTreeMap::new(),
            },
            requires_review: false,
            settles: Some(open.id),
            recorded_at: stamp.at,
        })
    }

    pub fn winner_region(&self) -> Option<&str> {
        match &self.resolution {
            Resolution::Resolved { winner_region, .. } => winner_region.as_deref(),
            Resolution::Rejected { .. } => None,
        }
    }

    /// The error reported to the operator for a rejected record.
    pub fn unresolved_error(&self) -> Option<EagleError> {
        self.requires_review.then(|| EagleError::ConflictUnresolved {
            entity: self.entity_id.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// ConflictPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictPolicy {
    #[serde(default = "default_strategy")]
    pub default_strategy: Strategy,
    /// Data category → strategy.
    #[serde(default)]
    pub categories: BTreeMap<String, Strategy>,
    /// Regions in descending trust order.
    #[serde(default)]
    pub source_ranking: Vec<String>,
    /// Field name → regions in descending priority, for merges.
    #[serde(default)]
    pub field_priority: BTreeMap<String, Vec<String>>,
}

fn default_strategy() -> Strategy {
    Strategy::LastWriteWins
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self {
            default_strategy: default_strategy(),
            categories: BTreeMap::new(),
            source_ranking: Vec::new(),
            field_priority: BTreeMap::new(),
        }
    }
}

impl ConflictPolicy {
    pub fn strategy_for(&self, category: Option<&str>) -> Strategy {
        category
            .and_then(|c| self.categories.get(c).copied())
            .unwrap_or(self.default_strategy)
    }

    /// Resolve using the strategy configured for the conflict's category.
    pub fn resolve(
        &self,
        conflict: &Conflict,
        primary_region: &str,
        stamp: Stamp,
    ) -> Result<ConflictRecord> {
        let strategy = self.strategy_for(conflict.category.as_deref());
        self.resolve_with(conflict, strategy, primary_region, stamp)
    }

    pub fn resolve_with(
        &self,
        conflict: &Conflict,
        strategy: Strategy,
        primary_region: &str,
        stamp: Stamp,
    ) -> Result<ConflictRecord> {
        conflict.validate()?;
        let ranking = Ranking {
            policy: self,
            primary: primary_region,
        };
        let candidates = &conflict.candidates;

        let resolution = match strategy {
            Strategy::LastWriteWins => winner(candidates.iter().max_by(|a, b| ranking.lww(a, b))),
            Strategy::SourcePriority => {
                winner(candidates.iter().min_by_key(|c| ranking.source_key(*c)))
            }
            Strategy::FreshnessPriority => winner(candidates.iter().max_by(|a, b| {
                let ttl = |c: &Candidate| c.ttl_remaining_seconds.unwrap_or(0);
                ttl(a).cmp(&ttl(b)).then_with(|| ranking.lww(a, b))
            })),
            Strategy::MergeWithPriority => ranking.merge(candidates),
            Strategy::ImmutableAppendOnly => Resolution::Rejected {
                reason: "immutable entity; all candidates retained for manual review".into(),
            },
        };

        let record = ConflictRecord::new(conflict, strategy, resolution, stamp);
        match &record.resolution {
            Resolution::Resolved { winner_region, .. } => tracing::debug!(
                entity = %record.entity_id,
                strategy = %strategy,
                winner = winner_region.as_deref().unwrap_or("merged"),
                "conflict resolved"
            ),
            Resolution::Rejected { reason } => tracing::warn!(
                entity = %record.entity_id,
                strategy = %strategy,
                reason = %reason,
                "conflict queued for review"
            ),
        }
        Ok(record)
    }
}

fn winner(candidate: Option<&Candidate>) -> Resolution {
    match candidate {
        Some(c) => Resolution::Resolved {
            winner_region: Some(c.region.clone()),
            value: c.value.clone(),
            field_sources: BTreeMap::new(),
        },
        None => Resolution::Rejected {
            reason: "no candidates".into(),
        },
    }
}

struct Ranking<'a> {
    policy: &'a ConflictPolicy,
    primary: &'a str,
}

impl Ranking<'_> {
    fn rank(&self, region: &str) -> usize {
        self.policy
            .source_ranking
            .iter()
            .position(|r| r == region)
            .unwrap_or(usize::MAX)
    }

    /// Greater is better: later timestamp, then primary, then better source
    /// rank, then smaller region id.
    fn lww(&self, a: &Candidate, b: &Candidate) -> Ordering {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| (a.region == self.primary).cmp(&(b.region == self.primary)))
            .then_with(|| self.rank(&b.region).cmp(&self.rank(&a.region)))
            .then_with(|| b.region.cmp(&a.region))
    }

    /// Smaller is better.
    fn source_key<'c>(&self, c: &'c Candidate) -> (usize, bool, &'c str) {
        (self.rank(&c.region), c.region != self.primary, c.region.as_str())
    }

    fn merge(&self, candidates: &[Candidate]) -> Resolution {
        let mut objects = Vec::with_capacity(candidates.len());
        for c in candidates {
            match c.value.as_object() {
                Some(map) => objects.push((c, map)),
                None => {
                    return Resolution::Rejected {
                        reason: format!(
                            "merge needs JSON objects; region '{}' holds a non-object value",
                            c.region
                        ),
                    }
                }
            }
        }

        let fields: BTreeSet<&String> = objects.iter().flat_map(|(_, m)| m.keys()).collect();
        let mut merged = serde_json::Map::new();
        let mut sources = BTreeMap::new();
        for field in fields {
            let order = self.policy.field_priority.get(field.as_str());
            let field_rank = |region: &str| {
                order
                    .and_then(|o| o.iter().position(|r| r == region))
                    .unwrap_or(usize::MAX)
            };
            let best = objects
                .iter()
                .filter_map(|(c, m)| m.get(field.as_str()).map(|v| (*c, v)))
                .min_by(|(a, _), (b, _)| {
                    field_rank(&a.region)
                        .cmp(&field_rank(&b.region))
                        .then_with(|| self.rank(&a.region).cmp(&self.rank(&b.region)))
                        .then_with(|| Reverse(a.timestamp).cmp(&Reverse(b.timestamp)))
                        .then_with(|| self.lww(b, a))
                });
            if let Some((c, v)) = best {
                merged.insert(field.clone(), v.clone());
                sources.insert(field.clone(), c.region.clone());
            }
        }

        Resolution::Resolved {
            winner_region: None,
            value: Value::Object(merged),
            field_sources: sources,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    model::{preprocessing::FlagPreprocessed, Clause},
    user::UserAttribute,
    Str, Versioned,
};

/// A feature flag: targeting configuration plus the list of variation
/// values it can serve.
///
/// Flags are created by deserializing inbound data (see
/// [`FeatureFlag::from_json`]) and are immutable afterwards. Variation
/// indexes referenced anywhere in the flag must be within
/// `0..variations.len()`; violations surface as
/// [`crate::ErrorKind::MalformedFlag`] results at evaluation time rather
/// than as parse failures, because other SDKs must behave the same way for
/// identical data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub(crate) key: Str,
    #[serde(default)]
    pub(crate) version: u64,
    #[serde(default)]
    pub(crate) on: bool,
    #[serde(default)]
    pub(crate) prerequisites: Vec<Prerequisite>,
    #[serde(default)]
    pub(crate) salt: String,
    #[serde(default)]
    pub(crate) targets: Vec<Target>,
    #[serde(default)]
    pub(crate) rules: Vec<Rule>,
    #[serde(default)]
    pub(crate) fallthrough: VariationOrRollout,
    #[serde(default)]
    pub(crate) off_variation: Option<i64>,
    #[serde(default)]
    pub(crate) variations: Vec<Value>,
    #[serde(default)]
    pub(crate) client_side: bool,
    #[serde(default)]
    pub(crate) track_events: bool,
    #[serde(default)]
    pub(crate) track_events_fallthrough: bool,
    #[serde(default)]
    pub(crate) debug_events_until_date: Option<u64>,
    #[serde(default)]
    pub(crate) deleted: bool,

    #[serde(skip)]
    pub(crate) preprocessed: Option<FlagPreprocessed>,
}

impl FeatureFlag {
    /// Deserialize a flag from its wire form and preprocess it.
    pub fn from_json(json: &str) -> crate::Result<FeatureFlag> {
        let mut flag: FeatureFlag = serde_json::from_str(json)?;
        flag.preprocess();
        Ok(flag)
    }

    /// Populate the flag's interned evaluation artifacts.
    ///
    /// Called once, immediately after deserialization, before the flag is
    /// shared. Evaluation also works on unpreprocessed flags (artifacts are
    /// then built per call), so skipping this step affects performance, not
    /// results.
    pub fn preprocess(&mut self) {
        for rule in &mut self.rules {
            for clause in &mut rule.clauses {
                clause.preprocess();
            }
        }
        self.preprocessed = Some(FlagPreprocessed::build(self));
    }

    /// The flag's key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether targeting is on. When off, the flag always serves its off
    /// variation.
    pub fn is_on(&self) -> bool {
        self.on
    }

    /// The flag's variation values, indexed by variation number.
    pub fn variations(&self) -> &[Value] {
        &self.variations
    }

    /// Whether the flag may be served to client-side SDKs.
    pub fn is_client_side(&self) -> bool {
        self.client_side
    }

    /// Whether every evaluation of this flag should produce a full analytics
    /// event.
    pub fn is_track_events(&self) -> bool {
        self.track_events
    }

    /// Timestamp (epoch milliseconds) until which evaluations are debugged,
    /// if debugging was requested.
    pub fn debug_events_until_date(&self) -> Option<u64> {
        self.debug_events_until_date
    }
}

impl Versioned for FeatureFlag {
    fn key(&self) -> &str {
        &self.key
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// A dependency on another flag producing a specific variation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prerequisite {
    pub(crate) key: Str,
    pub(crate) variation: i64,
}

/// An explicit list of user keys that receive a fixed variation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub(crate) values: HashSet<String>,
    pub(crate) variation: i64,
}

/// A set of AND-ed clauses, with either a fixed variation or a percent
/// rollout to serve when they all match. Rule order within a flag is
/// significant: the first matching rule wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub(crate) id: Str,
    #[serde(default)]
    pub(crate) clauses: Vec<Clause>,
    #[serde(flatten)]
    pub(crate) variation_or_rollout: VariationOrRollout,
    #[serde(default)]
    pub(crate) track_events: bool,
}

/// Either a fixed variation or a percent rollout.
///
/// Exactly one of the two must be present; anything else is a malformed
/// flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationOrRollout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) variation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) rollout: Option<Rollout>,
}

/// A weighted assignment of variations over the [0, 1) bucket space.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    #[serde(default)]
    pub(crate) kind: RolloutKind,
    #[serde(default)]
    pub(crate) variations: Vec<WeightedVariation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) bucket_by: Option<UserAttribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) seed: Option<i64>,
}

/// Distinguishes plain percentage rollouts from experiments, which
/// additionally mark their results for analytics sampling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloutKind {
    /// A plain percentage rollout.
    #[default]
    Rollout,
    /// An experiment: tracked variations report `inExperiment` in their
    /// reason.
    Experiment,
}

/// One slice of a rollout: a variation index and its weight in units of
/// 0.001% (100000 = 100%).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedVariation {
    pub(crate) variation: i64,
    pub(crate) weight: i64,
    /// Suppresses the `inExperiment` marker for this slice of an
    /// experiment, e.g. for the holdout remainder.
    #[serde(default)]
    pub(crate) untracked: bool,
}

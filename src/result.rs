//! Evaluation results and reasons.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{store::BigSegmentsStatus, Str};

/// Broad category for evaluations that could not produce a flag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The client facade was asked to evaluate before it received data.
    ///
    /// Never produced by the engine itself; part of the shared taxonomy so
    /// facades and the engine report errors in one vocabulary.
    ClientNotReady,
    /// The requested flag does not exist. Raised by the caller facade when
    /// its flag lookup comes up empty.
    FlagNotFound,
    /// The flag data is self-inconsistent: a variation index out of range,
    /// a rollout with no variations, a fallthrough with neither variation
    /// nor rollout, or a prerequisite cycle. Also produced when the engine
    /// traps an unexpected panic.
    MalformedFlag,
    /// The user had no key.
    UserNotSpecified,
    /// The caller facade trapped an exception outside the engine.
    Exception,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Why an evaluation produced its value.
///
/// Serialized reasons are part of the cross-SDK wire contract: the `kind`
/// spellings and camelCase field names below are normative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    /// The flag was off; the off variation (if any) was served.
    Off,
    /// The user's key was listed in one of the flag's targets.
    TargetMatch,
    /// A rule matched the user.
    #[serde(rename_all = "camelCase")]
    RuleMatch {
        /// Position of the matched rule within the flag.
        rule_index: usize,
        /// Id of the matched rule.
        rule_id: Str,
        /// True when the value came from an experiment rollout and the
        /// chosen variation is tracked.
        #[serde(default, skip_serializing_if = "is_false")]
        in_experiment: bool,
        /// Worst big segment store status observed, if big segments were
        /// consulted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        big_segments_status: Option<BigSegmentsStatus>,
    },
    /// A prerequisite flag did not produce the required variation.
    #[serde(rename_all = "camelCase")]
    PrerequisiteFailed {
        /// Key of the first prerequisite that failed.
        prerequisite_key: Str,
    },
    /// No target or rule matched; the fallthrough variation was served.
    #[serde(rename_all = "camelCase")]
    Fallthrough {
        /// True when the value came from an experiment rollout and the
        /// chosen variation is tracked.
        #[serde(default, skip_serializing_if = "is_false")]
        in_experiment: bool,
        /// Worst big segment store status observed, if big segments were
        /// consulted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        big_segments_status: Option<BigSegmentsStatus>,
    },
    /// The evaluation failed; see [`ErrorKind`].
    #[serde(rename_all = "camelCase")]
    Error {
        /// What went wrong.
        error_kind: ErrorKind,
    },
}

impl Reason {
    pub(crate) fn fallthrough(in_experiment: bool) -> Reason {
        Reason::Fallthrough {
            in_experiment,
            big_segments_status: None,
        }
    }

    pub(crate) fn rule_match(rule_index: usize, rule_id: Str, in_experiment: bool) -> Reason {
        Reason::RuleMatch {
            rule_index,
            rule_id,
            in_experiment,
            big_segments_status: None,
        }
    }

    /// True for experiment-rollout results whose chosen variation is
    /// tracked. Drives analytics sampling.
    pub fn is_in_experiment(&self) -> bool {
        match self {
            Reason::RuleMatch { in_experiment, .. } => *in_experiment,
            Reason::Fallthrough { in_experiment, .. } => *in_experiment,
            _ => false,
        }
    }

    /// The big segment store status attached to this reason, if any.
    pub fn big_segments_status(&self) -> Option<BigSegmentsStatus> {
        match self {
            Reason::RuleMatch {
                big_segments_status,
                ..
            }
            | Reason::Fallthrough {
                big_segments_status,
                ..
            } => *big_segments_status,
            _ => None,
        }
    }
}

/// The outcome of evaluating a flag for a user.
///
/// Equality is structural. When preprocessing is enabled the engine returns
/// interned `Arc<EvalResult>` handles for the common outcomes, so repeat
/// evaluations of the same branch are also pointer-equal; callers must not
/// rely on that, only on structural equality.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    value: Value,
    variation_index: Option<usize>,
    reason: Reason,
    #[serde(skip)]
    force_reason_tracking: bool,
}

impl EvalResult {
    pub(crate) fn new(value: Value, variation_index: usize, reason: Reason) -> EvalResult {
        EvalResult {
            value,
            variation_index: Some(variation_index),
            reason,
            force_reason_tracking: false,
        }
    }

    pub(crate) fn no_variation(reason: Reason) -> EvalResult {
        EvalResult {
            value: Value::Null,
            variation_index: None,
            reason,
            force_reason_tracking: false,
        }
    }

    /// An error outcome: null value, no variation index.
    pub fn error(error_kind: ErrorKind) -> EvalResult {
        EvalResult::no_variation(Reason::Error { error_kind })
    }

    pub(crate) fn with_force_reason_tracking(mut self, force: bool) -> EvalResult {
        self.force_reason_tracking = force;
        self
    }

    /// The flag value served to the user. Null when the evaluation errored
    /// or the flag is off with no off variation.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Index of the served variation, or `None` when no variation applied.
    pub fn variation_index(&self) -> Option<usize> {
        self.variation_index
    }

    /// Why this value was served.
    pub fn reason(&self) -> &Reason {
        &self.reason
    }

    /// True when the matched rule or fallthrough requests that the full
    /// reason be tracked in analytics events regardless of sampling.
    pub fn force_reason_tracking(&self) -> bool {
        self.force_reason_tracking
    }

    /// Copy of this result with the reason's big segment status set, when
    /// the reason kind carries one; otherwise the result is returned as-is.
    pub(crate) fn with_big_segments_status(&self, status: BigSegmentsStatus) -> Option<EvalResult> {
        let reason = match &self.reason {
            Reason::Fallthrough { in_experiment, .. } => Reason::Fallthrough {
                in_experiment: *in_experiment,
                big_segments_status: Some(status),
            },
            Reason::RuleMatch {
                rule_index,
                rule_id,
                in_experiment,
                ..
            } => Reason::RuleMatch {
                rule_index: *rule_index,
                rule_id: rule_id.clone(),
                in_experiment: *in_experiment,
                big_segments_status: Some(status),
            },
            _ => return None,
        };
        Some(EvalResult {
            value: self.value.clone(),
            variation_index: self.variation_index,
            reason,
            force_reason_tracking: self.force_reason_tracking,
        })
    }
}

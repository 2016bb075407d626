//! The evaluator core.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::{
    model::{FeatureFlag, VariationOrRollout},
    result::{ErrorKind, EvalResult},
    store::{BigSegmentProvider, BigSegmentsStatus, Store},
    user::User,
    Str,
};

use super::bucketing::rollout_outcome;

/// One prerequisite evaluation observed while evaluating a flag.
///
/// Events are delivered synchronously, in depth-first order matching the
/// order prerequisites are listed, before `evaluate` returns. Events emitted
/// before a failure (or a trapped panic) are kept.
#[derive(Debug)]
pub struct PrerequisiteEvent<'a> {
    /// The prerequisite flag that was evaluated.
    pub flag: &'a FeatureFlag,
    /// The flag that listed `flag` as a prerequisite.
    pub prerequisite_of_flag: &'a FeatureFlag,
    /// The user the evaluation was for.
    pub user: &'a User,
    /// The prerequisite flag's own evaluation result.
    pub result: Arc<EvalResult>,
}

/// Capability for observing prerequisite evaluations.
///
/// The engine knows nothing about the analytics pipeline; callers that want
/// prerequisite events pass a recorder per evaluation. Implementations must
/// be thread-safe if shared across evaluating threads.
pub trait PrerequisiteEventRecorder {
    /// Called once per prerequisite flag evaluation.
    fn record(&self, event: PrerequisiteEvent<'_>);
}

/// A recorder that discards all events.
pub struct NoopPrerequisiteEventRecorder;

impl PrerequisiteEventRecorder for NoopPrerequisiteEventRecorder {
    fn record(&self, _event: PrerequisiteEvent<'_>) {}
}

/// The flag evaluation engine.
///
/// An `Evaluator` borrows its data seams and holds no state of its own:
/// [`evaluate`](Evaluator::evaluate) is a pure function of the flag graph,
/// the user, and the big segment store snapshot, and is safe to call
/// concurrently from any number of threads.
pub struct Evaluator<'s> {
    pub(super) store: &'s dyn Store,
    pub(super) big_segments: Option<&'s dyn BigSegmentProvider>,
}

/// Per-evaluation scratch state, threaded down the recursion.
pub(super) struct EvalState<'r> {
    pub recorder: &'r dyn PrerequisiteEventRecorder,
    /// Flag keys on the current prerequisite chain, for cycle detection.
    pub prerequisite_chain: Vec<Str>,
    /// Segment keys currently being matched, for cycle detection.
    pub segment_chain: Vec<Str>,
    /// Worst big segment store status seen so far, if any were queried.
    pub big_segments_status: Option<BigSegmentsStatus>,
}

impl EvalState<'_> {
    pub fn note_big_segments_status(&mut self, status: BigSegmentsStatus) {
        self.big_segments_status = Some(match self.big_segments_status {
            Some(seen) => seen.max(status),
            None => status,
        });
    }
}

enum Branch {
    Fallthrough,
    Rule(usize),
}

impl<'s> Evaluator<'s> {
    /// A flag with this key makes `evaluate` fail internally (the failure is
    /// trapped and surfaces as a `MALFORMED_FLAG` error result). It exists
    /// so that callers can verify their own exception safety wrapping; no
    /// real flag will ever have this key.
    pub const FLAG_KEY_THAT_SIMULATES_AN_ERROR: &'static str =
        "$ flag key that simulates an error $";

    /// Create an evaluator over the given store, without big segment
    /// support. Unbounded segments will report
    /// [`BigSegmentsStatus::NotConfigured`].
    pub fn new(store: &'s dyn Store) -> Evaluator<'s> {
        Evaluator {
            store,
            big_segments: None,
        }
    }

    /// Create an evaluator with a big segment membership provider.
    pub fn with_big_segments(
        store: &'s dyn Store,
        big_segments: &'s dyn BigSegmentProvider,
    ) -> Evaluator<'s> {
        Evaluator {
            store,
            big_segments: Some(big_segments),
        }
    }

    /// Evaluate a flag for a user.
    ///
    /// Always returns exactly one result and never panics: unexpected
    /// internal failures are trapped and reported as
    /// [`ErrorKind::MalformedFlag`]. Prerequisite evaluations are reported
    /// through `recorder` before this returns.
    pub fn evaluate(
        &self,
        flag: &FeatureFlag,
        user: &User,
        recorder: &dyn PrerequisiteEventRecorder,
    ) -> Arc<EvalResult> {
        match catch_unwind(AssertUnwindSafe(|| self.evaluate_inner(flag, user, recorder))) {
            Ok(result) => result,
            Err(_) => {
                log::warn!(target: "switchboard",
                    flag_key = &*flag.key;
                    "unexpected panic while evaluating flag");
                Arc::new(EvalResult::error(ErrorKind::MalformedFlag))
            }
        }
    }

    fn evaluate_inner(
        &self,
        flag: &FeatureFlag,
        user: &User,
        recorder: &dyn PrerequisiteEventRecorder,
    ) -> Arc<EvalResult> {
        if flag.key() == Self::FLAG_KEY_THAT_SIMULATES_AN_ERROR {
            panic!("simulating an internal error for test instrumentation");
        }

        if user.key().is_none() {
            log::warn!(target: "switchboard",
                flag_key = &*flag.key;
                "user has no key; returning error result");
            return Arc::new(EvalResult::error(ErrorKind::UserNotSpecified));
        }

        let mut state = EvalState {
            recorder,
            prerequisite_chain: Vec::new(),
            segment_chain: Vec::new(),
            big_segments_status: None,
        };
        let result = self.evaluate_flag(flag, user, &mut state);

        match state.big_segments_status {
            Some(status) => match result.with_big_segments_status(status) {
                Some(updated) => Arc::new(updated),
                None => result,
            },
            None => result,
        }
    }

    pub(super) fn evaluate_flag(
        &self,
        flag: &FeatureFlag,
        user: &User,
        state: &mut EvalState,
    ) -> Arc<EvalResult> {
        if !flag.on {
            return flag.off_result();
        }

        if let Some(failed) = self.check_prerequisites(flag, user, state) {
            return failed;
        }

        if let Some(user_key) = user.key() {
            for (index, target) in flag.targets.iter().enumerate() {
                if target.values.contains(user_key) {
                    return flag.target_result(index);
                }
            }
        }

        for (index, rule) in flag.rules.iter().enumerate() {
            if self.rule_matches_user(rule, user, state) {
                return self.resolve_variation_or_rollout(
                    flag,
                    &rule.variation_or_rollout,
                    user,
                    Branch::Rule(index),
                );
            }
        }

        self.resolve_variation_or_rollout(flag, &flag.fallthrough, user, Branch::Fallthrough)
    }

    /// Walk the flag's prerequisites in order. Returns the short-circuit
    /// result for the first failure, or `None` when all are satisfied.
    fn check_prerequisites(
        &self,
        flag: &FeatureFlag,
        user: &User,
        state: &mut EvalState,
    ) -> Option<Arc<EvalResult>> {
        if flag.prerequisites.is_empty() {
            return None;
        }

        state.prerequisite_chain.push(flag.key.clone());
        let result = self.check_prerequisites_inner(flag, user, state);
        state.prerequisite_chain.pop();
        result
    }

    fn check_prerequisites_inner(
        &self,
        flag: &FeatureFlag,
        user: &User,
        state: &mut EvalState,
    ) -> Option<Arc<EvalResult>> {
        for (index, prerequisite) in flag.prerequisites.iter().enumerate() {
            if state.prerequisite_chain.contains(&prerequisite.key) {
                log::warn!(target: "switchboard",
                    flag_key = &*flag.key,
                    prerequisite_key = &*prerequisite.key;
                    "prerequisite relationship to itself or a circular reference; \
                     this is probably a temporary condition due to an incomplete update");
                return Some(Arc::new(EvalResult::error(ErrorKind::MalformedFlag)));
            }

            let Some(prerequisite_flag) = self.store.flag(&prerequisite.key) else {
                return Some(flag.prerequisite_failed_result(index));
            };

            let prerequisite_result = self.evaluate_flag(&prerequisite_flag, user, state);
            let required = usize::try_from(prerequisite.variation).ok();
            let satisfied = prerequisite_flag.on
                && required.is_some()
                && prerequisite_result.variation_index() == required;

            state.recorder.record(PrerequisiteEvent {
                flag: &prerequisite_flag,
                prerequisite_of_flag: flag,
                user,
                result: prerequisite_result,
            });

            if !satisfied {
                return Some(flag.prerequisite_failed_result(index));
            }
        }
        None
    }

    fn resolve_variation_or_rollout(
        &self,
        flag: &FeatureFlag,
        variation_or_rollout: &VariationOrRollout,
        user: &User,
        branch: Branch,
    ) -> Arc<EvalResult> {
        let (index, in_experiment) = match (
            variation_or_rollout.variation,
            &variation_or_rollout.rollout,
        ) {
            (Some(index), None) => (index, false),
            (None, Some(rollout)) => {
                match rollout_outcome(rollout, user, &flag.key, &flag.salt) {
                    Some(outcome) => (outcome.variation, outcome.in_experiment),
                    None => return self.malformed(flag, "rollout with no variations"),
                }
            }
            _ => return self.malformed(flag, "expected exactly one of variation or rollout"),
        };

        match branch {
            Branch::Fallthrough => flag.fallthrough_result(index, in_experiment),
            Branch::Rule(rule_index) => flag.rule_result(rule_index, index, in_experiment),
        }
    }

    fn malformed(&self, flag: &FeatureFlag, detail: &str) -> Arc<EvalResult> {
        log::warn!(target: "switchboard",
            flag_key = &*flag.key,
            detail;
            "malformed flag configuration");
        Arc::new(EvalResult::error(ErrorKind::MalformedFlag))
    }
}

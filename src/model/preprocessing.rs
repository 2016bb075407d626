//! Interned evaluation artifacts.
//!
//! Flags are evaluated far more often than they change, so everything about
//! a result that depends only on the flag itself is computed once, right
//! after deserialization: the result served for each (section, variation)
//! pair, the reason objects embedded in them, and parsed forms of clause
//! values (compiled regexes, timestamps, versions, lookup sets).
//!
//! Every builder in this module also has to work at evaluation time,
//! because preprocessing can be skipped (`FeatureFlag::preprocess` not
//! called): the evaluator falls back to building the same artifacts on
//! demand, producing structurally identical results.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use semver::Version;
use serde_json::Value;

use crate::{
    model::{FeatureFlag, Operator, Prerequisite},
    result::{ErrorKind, EvalResult, Reason},
};

/// Interned results for one flag, indexed by section and variation.
#[derive(Debug, Clone)]
pub(crate) struct FlagPreprocessed {
    pub off_result: Arc<EvalResult>,
    pub fallthrough: VariationResults,
    /// One "target match" result per target, in target order.
    pub targets: Box<[Arc<EvalResult>]>,
    /// One "prerequisite failed" result per prerequisite, in order.
    pub prerequisites: Box<[Arc<EvalResult>]>,
    /// Per-rule result tables, in rule order.
    pub rules: Box<[VariationResults]>,
}

impl FlagPreprocessed {
    pub fn build(flag: &FeatureFlag) -> FlagPreprocessed {
        FlagPreprocessed {
            off_result: Arc::new(off_result(flag)),
            fallthrough: VariationResults::build(flag, flag.track_events_fallthrough, |in_exp| {
                Reason::fallthrough(in_exp)
            }),
            targets: flag
                .targets
                .iter()
                .map(|target| {
                    Arc::new(result_for_variation(
                        flag,
                        target.variation,
                        Reason::TargetMatch,
                        false,
                    ))
                })
                .collect(),
            prerequisites: flag
                .prerequisites
                .iter()
                .map(|prerequisite| Arc::new(prerequisite_failed_result(flag, prerequisite)))
                .collect(),
            rules: flag
                .rules
                .iter()
                .enumerate()
                .map(|(index, rule)| {
                    VariationResults::build(flag, rule.track_events, |in_exp| {
                        Reason::rule_match(index, rule.id.clone(), in_exp)
                    })
                })
                .collect(),
        }
    }
}

/// Results for every variation of a flag, with and without the
/// `inExperiment` marker. Out-of-range indexes fall outside the table and
/// the lookup returns `None`.
#[derive(Debug, Clone)]
pub(crate) struct VariationResults {
    regular: Box<[Arc<EvalResult>]>,
    in_experiment: Box<[Arc<EvalResult>]>,
}

impl VariationResults {
    fn build(
        flag: &FeatureFlag,
        force_reason_tracking: bool,
        reason: impl Fn(bool) -> Reason,
    ) -> VariationResults {
        let table = |in_experiment: bool| -> Box<[Arc<EvalResult>]> {
            (0..flag.variations.len() as i64)
                .map(|index| {
                    Arc::new(result_for_variation(
                        flag,
                        index,
                        reason(in_experiment),
                        force_reason_tracking,
                    ))
                })
                .collect()
        };
        VariationResults {
            regular: table(false),
            in_experiment: table(true),
        }
    }

    pub fn get(&self, index: i64, in_experiment: bool) -> Option<Arc<EvalResult>> {
        let table = if in_experiment {
            &self.in_experiment
        } else {
            &self.regular
        };
        usize::try_from(index).ok().and_then(|i| table.get(i).cloned())
    }
}

/// Build the result served for a specific variation index, folding an
/// out-of-range index into a malformed-flag error.
pub(crate) fn result_for_variation(
    flag: &FeatureFlag,
    index: i64,
    reason: Reason,
    force_reason_tracking: bool,
) -> EvalResult {
    match usize::try_from(index).ok().and_then(|i| flag.variations.get(i)) {
        Some(value) => EvalResult::new(value.clone(), index as usize, reason)
            .with_force_reason_tracking(force_reason_tracking),
        None => {
            log::warn!(target: "switchboard",
                flag_key = &*flag.key,
                variation_index = index;
                "variation index out of range");
            EvalResult::error(ErrorKind::MalformedFlag)
        }
    }
}

pub(crate) fn off_result(flag: &FeatureFlag) -> EvalResult {
    match flag.off_variation {
        None => EvalResult::no_variation(Reason::Off),
        Some(index) => result_for_variation(flag, index, Reason::Off, false),
    }
}

pub(crate) fn prerequisite_failed_result(
    flag: &FeatureFlag,
    prerequisite: &Prerequisite,
) -> EvalResult {
    let reason = Reason::PrerequisiteFailed {
        prerequisite_key: prerequisite.key.clone(),
    };
    match flag.off_variation {
        None => EvalResult::no_variation(reason),
        Some(index) => result_for_variation(flag, index, reason, false),
    }
}

impl FeatureFlag {
    pub(crate) fn off_result(&self) -> Arc<EvalResult> {
        match &self.preprocessed {
            Some(p) => p.off_result.clone(),
            None => Arc::new(off_result(self)),
        }
    }

    pub(crate) fn target_result(&self, target_index: usize) -> Arc<EvalResult> {
        match &self.preprocessed {
            Some(p) => p.targets[target_index].clone(),
            None => {
                let target = &self.targets[target_index];
                Arc::new(result_for_variation(
                    self,
                    target.variation,
                    Reason::TargetMatch,
                    false,
                ))
            }
        }
    }

    pub(crate) fn prerequisite_failed_result(&self, prerequisite_index: usize) -> Arc<EvalResult> {
        match &self.preprocessed {
            Some(p) => p.prerequisites[prerequisite_index].clone(),
            None => Arc::new(prerequisite_failed_result(
                self,
                &self.prerequisites[prerequisite_index],
            )),
        }
    }

    pub(crate) fn fallthrough_result(&self, index: i64, in_experiment: bool) -> Arc<EvalResult> {
        match &self.preprocessed {
            Some(p) => p
                .fallthrough
                .get(index, in_experiment)
                .unwrap_or_else(|| Arc::new(out_of_range_result(self, index))),
            None => Arc::new(result_for_variation(
                self,
                index,
                Reason::fallthrough(in_experiment),
                self.track_events_fallthrough,
            )),
        }
    }

    pub(crate) fn rule_result(
        &self,
        rule_index: usize,
        index: i64,
        in_experiment: bool,
    ) -> Arc<EvalResult> {
        match &self.preprocessed {
            Some(p) => p.rules[rule_index]
                .get(index, in_experiment)
                .unwrap_or_else(|| Arc::new(out_of_range_result(self, index))),
            None => {
                let rule = &self.rules[rule_index];
                Arc::new(result_for_variation(
                    self,
                    index,
                    Reason::rule_match(rule_index, rule.id.clone(), in_experiment),
                    rule.track_events,
                ))
            }
        }
    }
}

fn out_of_range_result(flag: &FeatureFlag, index: i64) -> EvalResult {
    log::warn!(target: "switchboard",
        flag_key = &*flag.key,
        variation_index = index;
        "variation index out of range");
    EvalResult::error(ErrorKind::MalformedFlag)
}

/// Parsed forms of a clause's values, built once per clause.
#[derive(Debug, Clone)]
pub(crate) struct ClausePreprocessed {
    /// Parallel to the clause's `values`; entries hold whatever parsed form
    /// the clause's operator consumes.
    pub values: Box<[ClauseValueParsed]>,
    /// For `in` clauses whose values are all strings: the values as a set.
    /// `None` when any value is a non-string (the general scan applies).
    pub string_values: Option<HashSet<String>>,
}

/// Parsed form of one clause value. At most one field is populated,
/// depending on the clause's operator.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClauseValueParsed {
    pub regex: Option<Regex>,
    pub date: Option<DateTime<Utc>>,
    pub version: Option<Version>,
}

impl ClausePreprocessed {
    pub fn build(op: Operator, values: &[Value]) -> ClausePreprocessed {
        let parsed = |f: fn(&Value) -> ClauseValueParsed| -> Box<[ClauseValueParsed]> {
            values.iter().map(f).collect()
        };
        let (values, string_values) = match op {
            Operator::Matches => (
                parsed(|v| ClauseValueParsed {
                    regex: v.as_str().and_then(|s| Regex::new(s).ok()),
                    ..ClauseValueParsed::default()
                }),
                None,
            ),
            Operator::Before | Operator::After => (
                parsed(|v| ClauseValueParsed {
                    date: parse_date(v),
                    ..ClauseValueParsed::default()
                }),
                None,
            ),
            Operator::SemVerEqual | Operator::SemVerLessThan | Operator::SemVerGreaterThan => (
                parsed(|v| ClauseValueParsed {
                    version: v.as_str().and_then(parse_semver),
                    ..ClauseValueParsed::default()
                }),
                None,
            ),
            Operator::In => {
                let set: Option<HashSet<String>> = values
                    .iter()
                    .map(|v| v.as_str().map(str::to_owned))
                    .collect();
                (Box::default(), set)
            }
            _ => (Box::default(), None),
        };
        ClausePreprocessed {
            values,
            string_values,
        }
    }
}

/// Parse a clause or attribute value as a date: epoch milliseconds or an
/// RFC 3339 string.
pub(crate) fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => DateTime::from_timestamp_millis(n.as_f64()? as i64),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        _ => None,
    }
}

/// Parse a semantic version, tolerating the shortened `"1"` and `"1.2"`
/// forms by padding missing components ahead of any pre-release or build
/// suffix.
pub(crate) fn parse_semver(s: &str) -> Option<Version> {
    if let Ok(version) = Version::parse(s) {
        return Some(version);
    }
    let (numeric, suffix) = match s.find(|c| c == '-' || c == '+') {
        Some(i) => s.split_at(i),
        None => (s, ""),
    };
    let dots = numeric.bytes().filter(|b| *b == b'.').count();
    if dots >= 2 {
        return None;
    }
    let padded = format!("{}{}{}", numeric, ".0".repeat(2 - dots), suffix);
    Version::parse(&padded).ok()
}

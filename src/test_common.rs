//! Builders and fakes shared by the crate's tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::{
    model::{
        Clause, FeatureFlag, Operator, Prerequisite, Rollout, Rule, Segment, SegmentRule, Target,
        VariationOrRollout, WeightedVariation,
    },
    store::{BigSegmentMembership, BigSegmentProvider, BigSegmentsStatus, Store},
    user::UserAttribute,
    EvalResult, PrerequisiteEvent, PrerequisiteEventRecorder,
};

pub fn clause(attribute: UserAttribute, op: Operator, value: Value) -> Clause {
    clause_with_values(attribute, op, vec![value])
}

pub fn clause_with_values(attribute: UserAttribute, op: Operator, values: Vec<Value>) -> Clause {
    let mut clause = Clause {
        attribute,
        op,
        values,
        negate: false,
        preprocessed: None,
    };
    clause.preprocess();
    clause
}

pub fn clause_matching_user_key(key: &str) -> Clause {
    clause(UserAttribute::Key, Operator::In, Value::String(key.into()))
}

pub fn weighted_variation(variation: i64, weight: i64) -> WeightedVariation {
    WeightedVariation {
        variation,
        weight,
        untracked: false,
    }
}

pub fn flag_builder(key: &str) -> FlagBuilder {
    FlagBuilder {
        flag: FeatureFlag {
            key: key.into(),
            version: 1,
            on: false,
            prerequisites: vec![],
            salt: String::new(),
            targets: vec![],
            rules: vec![],
            fallthrough: VariationOrRollout::default(),
            off_variation: None,
            variations: vec![],
            client_side: false,
            track_events: false,
            track_events_fallthrough: false,
            debug_events_until_date: None,
            deleted: false,
            preprocessed: None,
        },
    }
}

/// Builds a flag with three variations ("off", "fall", "match"), on, with
/// off variation 0 and fallthrough variation 1, so tests can tell the off,
/// fallthrough, and match paths apart at a glance.
pub fn three_way_flag_builder(key: &str) -> FlagBuilder {
    flag_builder(key)
        .on(true)
        .variations(vec!["off".into(), "fall".into(), "match".into()])
        .off_variation(0)
        .fallthrough_variation(1)
}

pub struct FlagBuilder {
    flag: FeatureFlag,
}

impl FlagBuilder {
    pub fn on(mut self, on: bool) -> FlagBuilder {
        self.flag.on = on;
        self
    }

    pub fn salt(mut self, salt: &str) -> FlagBuilder {
        self.flag.salt = salt.to_owned();
        self
    }

    pub fn variations(mut self, variations: Vec<Value>) -> FlagBuilder {
        self.flag.variations = variations;
        self
    }

    pub fn off_variation(mut self, variation: i64) -> FlagBuilder {
        self.flag.off_variation = Some(variation);
        self
    }

    pub fn no_off_variation(mut self) -> FlagBuilder {
        self.flag.off_variation = None;
        self
    }

    pub fn fallthrough_variation(mut self, variation: i64) -> FlagBuilder {
        self.flag.fallthrough = VariationOrRollout {
            variation: Some(variation),
            rollout: None,
        };
        self
    }

    pub fn fallthrough_rollout(mut self, rollout: Rollout) -> FlagBuilder {
        self.flag.fallthrough = VariationOrRollout {
            variation: None,
            rollout: Some(rollout),
        };
        self
    }

    pub fn fallthrough(mut self, fallthrough: VariationOrRollout) -> FlagBuilder {
        self.flag.fallthrough = fallthrough;
        self
    }

    pub fn prerequisite(mut self, key: &str, variation: i64) -> FlagBuilder {
        self.flag.prerequisites.push(Prerequisite {
            key: key.into(),
            variation,
        });
        self
    }

    pub fn target(mut self, variation: i64, keys: &[&str]) -> FlagBuilder {
        self.flag.targets.push(Target {
            values: keys.iter().map(|k| (*k).to_owned()).collect(),
            variation,
        });
        self
    }

    pub fn rule(mut self, rule: Rule) -> FlagBuilder {
        self.flag.rules.push(rule);
        self
    }

    pub fn track_events_fallthrough(mut self, track: bool) -> FlagBuilder {
        self.flag.track_events_fallthrough = track;
        self
    }

    pub fn build(self) -> FeatureFlag {
        let mut flag = self.flag;
        flag.preprocess();
        flag
    }

    /// Build without the preprocessing step, to exercise the on-demand
    /// artifact path.
    pub fn build_unpreprocessed(self) -> FeatureFlag {
        self.flag
    }
}

pub fn rule_builder() -> RuleBuilder {
    RuleBuilder {
        rule: Rule {
            id: "".into(),
            clauses: vec![],
            variation_or_rollout: VariationOrRollout::default(),
            track_events: false,
        },
    }
}

pub struct RuleBuilder {
    rule: Rule,
}

impl RuleBuilder {
    pub fn id(mut self, id: &str) -> RuleBuilder {
        self.rule.id = id.into();
        self
    }

    pub fn clause(mut self, clause: Clause) -> RuleBuilder {
        self.rule.clauses.push(clause);
        self
    }

    pub fn variation(mut self, variation: i64) -> RuleBuilder {
        self.rule.variation_or_rollout = VariationOrRollout {
            variation: Some(variation),
            rollout: None,
        };
        self
    }

    pub fn rollout(mut self, rollout: Rollout) -> RuleBuilder {
        self.rule.variation_or_rollout = VariationOrRollout {
            variation: None,
            rollout: Some(rollout),
        };
        self
    }

    pub fn track_events(mut self, track: bool) -> RuleBuilder {
        self.rule.track_events = track;
        self
    }

    pub fn build(self) -> Rule {
        self.rule
    }
}

pub fn segment_builder(key: &str) -> SegmentBuilder {
    SegmentBuilder {
        segment: Segment {
            key: key.into(),
            version: 1,
            included: Default::default(),
            excluded: Default::default(),
            salt: String::new(),
            rules: vec![],
            unbounded: false,
            generation: None,
            deleted: false,
        },
    }
}

pub struct SegmentBuilder {
    segment: Segment,
}

impl SegmentBuilder {
    pub fn included(mut self, keys: &[&str]) -> SegmentBuilder {
        self.segment.included = keys.iter().map(|k| (*k).to_owned()).collect();
        self
    }

    pub fn excluded(mut self, keys: &[&str]) -> SegmentBuilder {
        self.segment.excluded = keys.iter().map(|k| (*k).to_owned()).collect();
        self
    }

    pub fn salt(mut self, salt: &str) -> SegmentBuilder {
        self.segment.salt = salt.to_owned();
        self
    }

    pub fn rule(
        mut self,
        clauses: Vec<Clause>,
        weight: Option<i64>,
        bucket_by: Option<UserAttribute>,
    ) -> SegmentBuilder {
        self.segment.rules.push(SegmentRule {
            clauses,
            weight,
            bucket_by,
        });
        self
    }

    pub fn unbounded(mut self, generation: i64) -> SegmentBuilder {
        self.segment.unbounded = true;
        self.segment.generation = Some(generation);
        self
    }

    pub fn build(self) -> Segment {
        let mut segment = self.segment;
        segment.preprocess();
        segment
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct TestStore {
    flags: HashMap<String, Arc<FeatureFlag>>,
    segments: HashMap<String, Arc<Segment>>,
}

impl TestStore {
    pub fn new() -> TestStore {
        TestStore::default()
    }

    pub fn with_flag(mut self, flag: FeatureFlag) -> TestStore {
        self.flags.insert(flag.key.to_string(), Arc::new(flag));
        self
    }

    pub fn with_segment(mut self, segment: Segment) -> TestStore {
        self.segments
            .insert(segment.key.to_string(), Arc::new(segment));
        self
    }
}

impl Store for TestStore {
    fn flag(&self, key: &str) -> Option<Arc<FeatureFlag>> {
        self.flags.get(key).cloned()
    }

    fn segment(&self, key: &str) -> Option<Arc<Segment>> {
        self.segments.get(key).cloned()
    }
}

/// Big segment provider with a fixed status and membership list.
pub struct FixedBigSegments {
    status: BigSegmentsStatus,
    members: HashMap<(String, String), bool>,
}

impl FixedBigSegments {
    pub fn new(status: BigSegmentsStatus) -> FixedBigSegments {
        FixedBigSegments {
            status,
            members: HashMap::new(),
        }
    }

    pub fn with_member(mut self, segment_key: &str, user_key: &str) -> FixedBigSegments {
        self.members
            .insert((segment_key.to_owned(), user_key.to_owned()), true);
        self
    }
}

impl BigSegmentProvider for FixedBigSegments {
    fn membership(
        &self,
        segment_key: &str,
        _generation: i64,
        user_key: &str,
    ) -> BigSegmentMembership {
        BigSegmentMembership {
            included: self
                .members
                .get(&(segment_key.to_owned(), user_key.to_owned()))
                .copied(),
            status: self.status,
        }
    }
}

/// A recorded prerequisite event, reduced to owned data for assertions.
pub struct RecordedPrerequisite {
    pub flag_key: String,
    pub prerequisite_of_flag_key: String,
    pub result: Arc<EvalResult>,
}

/// Recorder that remembers every prerequisite event.
#[derive(Default)]
pub struct RecordingPrerequisiteEventRecorder {
    pub events: RefCell<Vec<RecordedPrerequisite>>,
}

impl PrerequisiteEventRecorder for RecordingPrerequisiteEventRecorder {
    fn record(&self, event: PrerequisiteEvent<'_>) {
        self.events.borrow_mut().push(RecordedPrerequisite {
            flag_key: event.flag.key().to_owned(),
            prerequisite_of_flag_key: event.prerequisite_of_flag.key().to_owned(),
            result: event.result,
        });
    }
}

/// Recorder that fails the test if any prerequisite event is recorded.
pub struct ExpectNoPrerequisiteEvents;

impl PrerequisiteEventRecorder for ExpectNoPrerequisiteEvents {
    fn record(&self, event: PrerequisiteEvent<'_>) {
        panic!(
            "did not expect any prerequisite events, got one for flag {:?}",
            event.flag.key()
        );
    }
}

//! Segment membership.

use crate::{
    model::{Segment, SegmentRule},
    store::BigSegmentsStatus,
    user::{User, UserAttribute},
};

use super::{
    bucketing::bucket_user,
    evaluator::{EvalState, Evaluator},
};

impl Evaluator<'_> {
    /// Whether the user belongs to the segment: excluded list, then
    /// included list, then the big segment store for unbounded segments,
    /// then matching rules.
    ///
    /// A segment already being matched higher up the stack never matches
    /// again (segment rules may reference other segments, so reference
    /// cycles are possible in partially updated data).
    pub(super) fn segment_contains_user(
        &self,
        segment: &Segment,
        user: &User,
        state: &mut EvalState,
    ) -> bool {
        if state.segment_chain.contains(&segment.key) {
            log::warn!(target: "switchboard",
                segment_key = &*segment.key;
                "segment rule referencing segment is circular; \
                 this is probably a temporary condition due to an incomplete update");
            return false;
        }

        state.segment_chain.push(segment.key.clone());
        let contained = self.segment_contains_user_inner(segment, user, state);
        state.segment_chain.pop();
        contained
    }

    fn segment_contains_user_inner(
        &self,
        segment: &Segment,
        user: &User,
        state: &mut EvalState,
    ) -> bool {
        let Some(user_key) = user.key() else {
            return false;
        };

        if segment.excluded.contains(user_key) {
            return false;
        }
        if segment.included.contains(user_key) {
            return true;
        }

        if segment.unbounded {
            return self.big_segment_contains_user(segment, user_key, state);
        }

        segment
            .rules
            .iter()
            .any(|rule| self.segment_rule_matches_user(segment, rule, user, state))
    }

    fn big_segment_contains_user(
        &self,
        segment: &Segment,
        user_key: &str,
        state: &mut EvalState,
    ) -> bool {
        let Some(provider) = self.big_segments else {
            state.note_big_segments_status(BigSegmentsStatus::NotConfigured);
            return false;
        };
        let Some(generation) = segment.generation else {
            // Membership is keyed by generation; without one the segment
            // cannot be queried.
            state.note_big_segments_status(BigSegmentsStatus::NotConfigured);
            return false;
        };

        let membership = provider.membership(&segment.key, generation, user_key);
        state.note_big_segments_status(membership.status);
        membership.included.unwrap_or(false)
    }

    fn segment_rule_matches_user(
        &self,
        segment: &Segment,
        rule: &SegmentRule,
        user: &User,
        state: &mut EvalState,
    ) -> bool {
        if !rule
            .clauses
            .iter()
            .all(|clause| self.clause_matches_user(clause, user, state))
        {
            return false;
        }

        // A rule with no weight includes everyone it matches.
        let Some(weight) = rule.weight else {
            return true;
        };

        let bucket_by = rule.bucket_by.clone().unwrap_or(UserAttribute::Key);
        let bucket = bucket_user(None, user, &segment.key, &bucket_by, &segment.salt);
        bucket < weight as f64 / 100_000.0
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        model::Operator,
        store::{BigSegmentMembership, BigSegmentsStatus},
        test_common::{clause, segment_builder, FixedBigSegments, TestStore},
        user::{User, UserAttribute},
        Evaluator, NoopPrerequisiteEventRecorder, Segment,
    };

    use super::super::evaluator::EvalState;

    fn contains(evaluator: &Evaluator, segment: &Segment, user: &User) -> (bool, Option<BigSegmentsStatus>) {
        let mut state = EvalState {
            recorder: &NoopPrerequisiteEventRecorder,
            prerequisite_chain: Vec::new(),
            segment_chain: Vec::new(),
            big_segments_status: None,
        };
        let contained = evaluator.segment_contains_user(segment, user, &mut state);
        (contained, state.big_segments_status)
    }

    #[test]
    fn explicit_lists_take_precedence() {
        let segment = segment_builder("seg")
            .included(&["in-user", "both-user"])
            .excluded(&["out-user", "both-user"])
            .build();
        let store = TestStore::new();
        let evaluator = Evaluator::new(&store);

        assert!(contains(&evaluator, &segment, &User::with_key("in-user")).0);
        assert!(!contains(&evaluator, &segment, &User::with_key("out-user")).0);
        // Excluded wins over included.
        assert!(!contains(&evaluator, &segment, &User::with_key("both-user")).0);
        assert!(!contains(&evaluator, &segment, &User::with_key("other")).0);
    }

    #[test]
    fn rules_match_when_all_clauses_match() {
        let segment = segment_builder("seg")
            .rule(
                vec![clause(UserAttribute::Email, Operator::EndsWith, json!("@example.com"))],
                None,
                None,
            )
            .build();
        let store = TestStore::new();
        let evaluator = Evaluator::new(&store);

        let matching = User::builder("u").email("a@example.com").build();
        let other = User::builder("u").email("a@other.com").build();
        assert!(contains(&evaluator, &segment, &matching).0);
        assert!(!contains(&evaluator, &segment, &other).0);
    }

    #[test]
    fn weighted_rule_includes_only_low_buckets() {
        // userKeyA buckets at 0.42157587 for ("hashKey", "saltyA").
        let build = |weight: i64| {
            segment_builder("hashKey")
                .salt("saltyA")
                .rule(
                    vec![clause(UserAttribute::Key, Operator::In, json!("userKeyA"))],
                    Some(weight),
                    None,
                )
                .build()
        };
        let store = TestStore::new();
        let evaluator = Evaluator::new(&store);
        let user = User::with_key("userKeyA");

        assert!(contains(&evaluator, &build(50000), &user).0);
        assert!(!contains(&evaluator, &build(30000), &user).0);
    }

    #[test]
    fn segment_referencing_segment_matches_through() {
        let inner = segment_builder("inner").included(&["u1"]).build();
        let outer = segment_builder("outer")
            .rule(
                vec![clause(UserAttribute::Key, Operator::SegmentMatch, json!("inner"))],
                None,
                None,
            )
            .build();
        let store = TestStore::new().with_segment(inner);
        let evaluator = Evaluator::new(&store);

        assert!(contains(&evaluator, &outer, &User::with_key("u1")).0);
        assert!(!contains(&evaluator, &outer, &User::with_key("u2")).0);
    }

    #[test]
    fn circular_segment_reference_does_not_recurse() {
        // a references b which references a again.
        let a = segment_builder("seg-a")
            .rule(
                vec![clause(UserAttribute::Key, Operator::SegmentMatch, json!("seg-b"))],
                None,
                None,
            )
            .build();
        let b = segment_builder("seg-b")
            .rule(
                vec![clause(UserAttribute::Key, Operator::SegmentMatch, json!("seg-a"))],
                None,
                None,
            )
            .build();
        let store = TestStore::new().with_segment(a.clone()).with_segment(b);
        let evaluator = Evaluator::new(&store);

        assert!(!contains(&evaluator, &a, &User::with_key("u1")).0);
    }

    #[test]
    fn unbounded_segment_uses_big_segment_store() {
        let segment = segment_builder("big").unbounded(7).build();
        let store = TestStore::new();

        let provider = FixedBigSegments::new(BigSegmentsStatus::Healthy).with_member("big", "u1");
        let evaluator = Evaluator::with_big_segments(&store, &provider);

        let (contained, status) = contains(&evaluator, &segment, &User::with_key("u1"));
        assert!(contained);
        assert_eq!(status, Some(BigSegmentsStatus::Healthy));

        let (contained, status) = contains(&evaluator, &segment, &User::with_key("u2"));
        assert!(!contained);
        assert_eq!(status, Some(BigSegmentsStatus::Healthy));
    }

    #[test]
    fn unbounded_segment_reports_store_status() {
        let segment = segment_builder("big").unbounded(7).build();
        let store = TestStore::new();

        for status in [BigSegmentsStatus::Stale, BigSegmentsStatus::StoreError] {
            let provider = FixedBigSegments::new(status).with_member("big", "u1");
            let evaluator = Evaluator::with_big_segments(&store, &provider);
            let (contained, seen) = contains(&evaluator, &segment, &User::with_key("u1"));
            assert!(contained);
            assert_eq!(seen, Some(status));
        }
    }

    #[test]
    fn unbounded_segment_without_provider_is_not_configured() {
        let segment = segment_builder("big").unbounded(7).build();
        let store = TestStore::new();
        let evaluator = Evaluator::new(&store);

        let (contained, status) = contains(&evaluator, &segment, &User::with_key("u1"));
        assert!(!contained);
        assert_eq!(status, Some(BigSegmentsStatus::NotConfigured));
    }

    #[test]
    fn unbounded_segment_without_generation_is_not_configured() {
        let mut segment = segment_builder("big").unbounded(7).build();
        segment.generation = None;
        let store = TestStore::new();
        let provider = FixedBigSegments::new(BigSegmentsStatus::Healthy).with_member("big", "u1");
        let evaluator = Evaluator::with_big_segments(&store, &provider);

        let (contained, status) = contains(&evaluator, &segment, &User::with_key("u1"));
        assert!(!contained);
        assert_eq!(status, Some(BigSegmentsStatus::NotConfigured));
    }

    #[test]
    fn provider_is_queried_with_segment_generation() {
        struct AssertingProvider;
        impl crate::BigSegmentProvider for AssertingProvider {
            fn membership(
                &self,
                segment_key: &str,
                generation: i64,
                user_key: &str,
            ) -> BigSegmentMembership {
                assert_eq!(segment_key, "big");
                assert_eq!(generation, 42);
                assert_eq!(user_key, "u1");
                BigSegmentMembership {
                    included: Some(true),
                    status: BigSegmentsStatus::Healthy,
                }
            }
        }

        let segment = segment_builder("big").unbounded(42).build();
        let store = TestStore::new();
        let provider = AssertingProvider;
        let evaluator = Evaluator::with_big_segments(&store, &provider);
        assert!(contains(&evaluator, &segment, &User::with_key("u1")).0);
    }
}

//! Clause and rule matching.

use serde_json::Value;

use crate::{
    model::{Clause, Operator, Rule},
    user::User,
};

use super::evaluator::{EvalState, Evaluator};

impl Evaluator<'_> {
    /// A rule matches when every one of its clauses matches. A rule with no
    /// clauses matches everyone.
    pub(super) fn rule_matches_user(
        &self,
        rule: &Rule,
        user: &User,
        state: &mut EvalState,
    ) -> bool {
        rule.clauses
            .iter()
            .all(|clause| self.clause_matches_user(clause, user, state))
    }

    pub(super) fn clause_matches_user(
        &self,
        clause: &Clause,
        user: &User,
        state: &mut EvalState,
    ) -> bool {
        if clause.op == Operator::SegmentMatch {
            return self.clause_matches_segments(clause, user, state);
        }

        // An absent attribute fails the clause outright; negation applies to
        // the operator outcome, not to attribute presence.
        let Some(attribute_value) = user.attribute(&clause.attribute) else {
            return false;
        };

        let matched = match &attribute_value {
            Value::Array(values) => values.iter().any(|value| clause_matches_value(clause, value)),
            single => clause_matches_value(clause, single),
        };
        matched != clause.negate
    }

    /// For segmentMatch, the clause values are segment keys and the clause
    /// matches when the user belongs to any of them. A missing segment never
    /// matches.
    fn clause_matches_segments(&self, clause: &Clause, user: &User, state: &mut EvalState) -> bool {
        let matched = clause.values.iter().any(|value| {
            let Some(segment_key) = value.as_str() else {
                return false;
            };
            match self.store.segment(segment_key) {
                Some(segment) => self.segment_contains_user(&segment, user, state),
                None => false,
            }
        });
        matched != clause.negate
    }
}

/// Test a single attribute value against the clause's values (OR).
fn clause_matches_value(clause: &Clause, attribute_value: &Value) -> bool {
    if clause.op == Operator::In {
        if let Some(set) = clause
            .preprocessed
            .as_ref()
            .and_then(|p| p.string_values.as_ref())
        {
            // All clause values are strings, so the set decides outright.
            return match attribute_value {
                Value::String(s) => set.contains(s),
                _ => false,
            };
        }
    }

    clause.values.iter().enumerate().any(|(index, clause_value)| {
        let parsed = clause
            .preprocessed
            .as_ref()
            .and_then(|p| p.values.get(index));
        clause.op.apply(attribute_value, clause_value, parsed)
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        model::Operator,
        test_common::{clause, clause_with_values, TestStore},
        user::{User, UserAttribute},
        Evaluator,
    };

    use super::super::evaluator::EvalState;
    use crate::NoopPrerequisiteEventRecorder;

    fn matches(clause: &crate::model::Clause, user: &User) -> bool {
        let store = TestStore::new();
        let evaluator = Evaluator::new(&store);
        let mut state = EvalState {
            recorder: &NoopPrerequisiteEventRecorder,
            prerequisite_chain: Vec::new(),
            segment_chain: Vec::new(),
            big_segments_status: None,
        };
        evaluator.clause_matches_user(clause, user, &mut state)
    }

    #[test]
    fn clause_can_match_builtin_attribute() {
        let clause = clause(UserAttribute::Name, Operator::In, json!("Bob"));
        let user = User::builder("key").name("Bob").build();
        assert!(matches(&clause, &user));
        assert!(!matches(&clause, &User::with_key("key")));
    }

    #[test]
    fn clause_matches_any_of_its_values() {
        let clause = clause_with_values(
            UserAttribute::Name,
            Operator::In,
            vec![json!("Bob"), json!("Carol")],
        );
        assert!(matches(&clause, &User::builder("k").name("Carol").build()));
        assert!(!matches(&clause, &User::builder("k").name("Dan").build()));
    }

    #[test]
    fn clause_matches_any_element_of_array_attribute() {
        let clause = clause(UserAttribute::Custom("pets".into()), Operator::In, json!("cat"));
        let user = User::builder("k").custom("pets", json!(["dog", "cat"])).build();
        assert!(matches(&clause, &user));
        let user = User::builder("k").custom("pets", json!(["dog", "fish"])).build();
        assert!(!matches(&clause, &user));
    }

    #[test]
    fn negated_clause_inverts_match() {
        let mut negated = clause(UserAttribute::Name, Operator::In, json!("Bob"));
        negated.negate = true;
        assert!(!matches(&negated, &User::builder("k").name("Bob").build()));
        assert!(matches(&negated, &User::builder("k").name("Carol").build()));
    }

    #[test]
    fn negated_clause_does_not_match_absent_attribute() {
        let mut negated = clause(UserAttribute::Name, Operator::In, json!("Bob"));
        negated.negate = true;
        // Absent attribute fails the clause before negation applies.
        assert!(!matches(&negated, &User::with_key("k")));
    }

    #[test]
    fn in_clause_matches_with_and_without_preprocessing() {
        let preprocessed = clause(UserAttribute::Name, Operator::In, json!("Bob"));
        let mut raw = preprocessed.clone();
        raw.preprocessed = None;

        let bob = User::builder("k").name("Bob").build();
        let carol = User::builder("k").name("Carol").build();
        for c in [&preprocessed, &raw] {
            assert!(matches(c, &bob));
            assert!(!matches(c, &carol));
        }
    }

    #[test]
    fn in_clause_with_mixed_value_types_matches_each_type() {
        let clause = clause_with_values(
            UserAttribute::Custom("x".into()),
            Operator::In,
            vec![json!("s"), json!(7)],
        );
        assert!(matches(&clause, &User::builder("k").custom("x", "s").build()));
        assert!(matches(&clause, &User::builder("k").custom("x", 7).build()));
        assert!(!matches(&clause, &User::builder("k").custom("x", "7").build()));
    }

    #[test]
    fn unknown_segment_reference_does_not_match() {
        let clause = clause(UserAttribute::Key, Operator::SegmentMatch, json!("no-such"));
        assert!(!matches(&clause, &User::with_key("k")));
    }
}

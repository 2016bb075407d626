use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{model::Clause, user::UserAttribute, Str, Versioned};

/// A reusable named set of users: explicit include/exclude lists plus
/// matching rules.
///
/// An `unbounded` segment ("big segment") keeps its membership in an
/// external store instead of the `included`/`excluded` lists; lookups there
/// are keyed by the segment's `generation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub(crate) key: Str,
    #[serde(default)]
    pub(crate) version: u64,
    #[serde(default)]
    pub(crate) included: HashSet<String>,
    #[serde(default)]
    pub(crate) excluded: HashSet<String>,
    #[serde(default)]
    pub(crate) salt: String,
    #[serde(default)]
    pub(crate) rules: Vec<SegmentRule>,
    #[serde(default)]
    pub(crate) unbounded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) generation: Option<i64>,
    #[serde(default)]
    pub(crate) deleted: bool,
}

impl Segment {
    /// Deserialize a segment from its wire form and preprocess it.
    pub fn from_json(json: &str) -> crate::Result<Segment> {
        let mut segment: Segment = serde_json::from_str(json)?;
        segment.preprocess();
        Ok(segment)
    }

    /// Populate the segment's interned evaluation artifacts. See
    /// [`crate::FeatureFlag::preprocess`].
    pub fn preprocess(&mut self) {
        for rule in &mut self.rules {
            for clause in &mut rule.clauses {
                clause.preprocess();
            }
        }
    }

    /// The segment's key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether membership lives in an external big segment store.
    pub fn is_unbounded(&self) -> bool {
        self.unbounded
    }
}

impl Versioned for Segment {
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

/// A segment matching rule: AND-ed clauses with an optional percentage
/// weight restricting how much of the matching population is included.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRule {
    #[serde(default)]
    pub(crate) clauses: Vec<Clause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) weight: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) bucket_by: Option<UserAttribute>,
}

#[cfg(test)]
mod tests {
    use super::Segment;

    #[test]
    fn segment_parses_from_wire_form() {
        let segment = Segment::from_json(
            r#"{
              "key": "beta-testers",
              "version": 3,
              "included": ["u1", "u2"],
              "excluded": ["u3"],
              "salt": "salty",
              "rules": [
                {
                  "clauses": [{"attribute": "email", "op": "endsWith", "values": ["@example.com"]}],
                  "weight": 25000,
                  "bucketBy": "email"
                }
              ]
            }"#,
        )
        .unwrap();

        assert_eq!(segment.key(), "beta-testers");
        assert!(segment.included.contains("u1"));
        assert!(segment.excluded.contains("u3"));
        assert_eq!(segment.rules[0].weight, Some(25000));
        assert!(segment.rules[0].clauses[0].preprocessed.is_some());
        assert!(!segment.is_unbounded());
        assert_eq!(segment.generation, None);
    }

    #[test]
    fn unbounded_segment_parses() {
        let segment =
            Segment::from_json(r#"{"key": "big", "unbounded": true, "generation": 7}"#).unwrap();
        assert!(segment.is_unbounded());
        assert_eq!(segment.generation, Some(7));
    }
}

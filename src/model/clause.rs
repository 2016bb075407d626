use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{model::preprocessing::ClausePreprocessed, user::UserAttribute};

/// A single matching condition: an attribute, an operator, and one or more
/// values to test against (OR within the clause).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clause {
    pub(crate) attribute: UserAttribute,
    pub(crate) op: Operator,
    #[serde(default)]
    pub(crate) values: Vec<Value>,
    #[serde(default)]
    pub(crate) negate: bool,

    #[serde(skip)]
    pub(crate) preprocessed: Option<ClausePreprocessed>,
}

impl Clause {
    pub(crate) fn preprocess(&mut self) {
        self.preprocessed = Some(ClausePreprocessed::build(self.op, &self.values));
    }
}

/// Clause operators.
///
/// The serialized names are the wire spellings. A clause value that does not
/// fit the operator (wrong type, unparseable regex/date/version) simply
/// fails to match; operators never error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    /// Exact equality against any of the clause values, preserving JSON
    /// types.
    In,
    /// String suffix match.
    EndsWith,
    /// String prefix match.
    StartsWith,
    /// Regular expression search. Clause value must be a regex string.
    Matches,
    /// Substring match.
    Contains,
    /// Numeric less-than.
    LessThan,
    /// Numeric less-than-or-equal.
    LessThanOrEqual,
    /// Numeric greater-than.
    GreaterThan,
    /// Numeric greater-than-or-equal.
    GreaterThanOrEqual,
    /// Date comparison; values may be epoch milliseconds or RFC 3339
    /// strings.
    Before,
    /// Date comparison; values may be epoch milliseconds or RFC 3339
    /// strings.
    After,
    /// Semantic version equality. Shortened versions (`"1"`, `"1.2"`) are
    /// padded with zeroes.
    SemVerEqual,
    /// Semantic version less-than.
    SemVerLessThan,
    /// Semantic version greater-than.
    SemVerGreaterThan,
    /// Membership in any of the referenced segments; clause values are
    /// segment keys.
    SegmentMatch,
}

//! Clause operator implementations.

use regex::Regex;
use serde_json::Value;

use crate::model::{
    preprocessing::{parse_date, parse_semver, ClauseValueParsed},
    Operator,
};

impl Operator {
    /// Test one attribute value against one clause value. Returns `false`
    /// whenever the operator does not apply (wrong types, unparseable
    /// clause value); operators never error.
    ///
    /// `parsed` is the preprocessed form of the clause value, when the
    /// clause was preprocessed; otherwise the same parsing happens here.
    pub(crate) fn apply(
        self,
        attribute: &Value,
        clause_value: &Value,
        parsed: Option<&ClauseValueParsed>,
    ) -> bool {
        self.try_apply(attribute, clause_value, parsed)
            .unwrap_or(false)
    }

    fn try_apply(
        self,
        attribute: &Value,
        clause_value: &Value,
        parsed: Option<&ClauseValueParsed>,
    ) -> Option<bool> {
        match self {
            Operator::In => Some(attribute == clause_value),

            Operator::StartsWith => {
                Some(attribute.as_str()?.starts_with(clause_value.as_str()?))
            }
            Operator::EndsWith => Some(attribute.as_str()?.ends_with(clause_value.as_str()?)),
            Operator::Contains => Some(attribute.as_str()?.contains(clause_value.as_str()?)),

            Operator::Matches => {
                let s = attribute.as_str()?;
                match parsed {
                    Some(parsed) => Some(parsed.regex.as_ref()?.is_match(s)),
                    None => {
                        let regex = Regex::new(clause_value.as_str()?).ok()?;
                        Some(regex.is_match(s))
                    }
                }
            }

            Operator::LessThan
            | Operator::LessThanOrEqual
            | Operator::GreaterThan
            | Operator::GreaterThanOrEqual => {
                let a = attribute.as_f64()?;
                let c = clause_value.as_f64()?;
                Some(match self {
                    Operator::LessThan => a < c,
                    Operator::LessThanOrEqual => a <= c,
                    Operator::GreaterThan => a > c,
                    _ => a >= c,
                })
            }

            Operator::Before | Operator::After => {
                let a = parse_date(attribute)?;
                let c = match parsed {
                    Some(parsed) => parsed.date?,
                    None => parse_date(clause_value)?,
                };
                Some(if self == Operator::Before { a < c } else { a > c })
            }

            Operator::SemVerEqual | Operator::SemVerLessThan | Operator::SemVerGreaterThan => {
                let a = parse_semver(attribute.as_str()?)?;
                let c = match parsed {
                    Some(parsed) => parsed.version.clone()?,
                    None => parse_semver(clause_value.as_str()?)?,
                };
                Some(match self {
                    Operator::SemVerEqual => a == c,
                    Operator::SemVerLessThan => a < c,
                    _ => a > c,
                })
            }

            // Segment references are resolved by the clause matcher, not
            // against literal values.
            Operator::SegmentMatch => None,
        }
    }
}

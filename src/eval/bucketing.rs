//! Deterministic user bucketing.
//!
//! The bucket value must match every other SDK in the family to 7 decimal
//! places for the same inputs: SHA-1 over the hash input, first 15 hex
//! characters parsed as a 60-bit integer, scaled into [0, 1). The constants
//! here are normative; see the consistency tests at the bottom.

use std::fmt::Write;

use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::{
    model::{Rollout, RolloutKind, WeightedVariation},
    user::{User, UserAttribute},
};

/// 2^60 - 1, the largest value representable in 15 hex characters.
const LONG_SCALE: f64 = 1152921504606846975.0;

/// Compute the user's bucket value in [0, 1).
///
/// With a seed the hash input is `"{seed}.{attr}"`; without one it is
/// `"{key}.{salt}.{attr}"`, plus `".{secondary}"` if the user has a
/// secondary key. A missing or non-bucketable attribute buckets to 0.0.
pub(crate) fn bucket_user(
    seed: Option<i64>,
    user: &User,
    key: &str,
    bucket_by: &UserAttribute,
    salt: &str,
) -> f64 {
    let Some(id_hash) = bucketable_value(user, bucket_by) else {
        return 0.0;
    };

    let mut input = match seed {
        Some(seed) => format!("{seed}.{id_hash}"),
        None => format!("{key}.{salt}.{id_hash}"),
    };
    if seed.is_none() {
        if let Some(secondary) = user.secondary() {
            input.push('.');
            input.push_str(secondary);
        }
    }

    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let hex = digest.iter().fold(String::with_capacity(40), |mut acc, byte| {
        let _ = write!(acc, "{byte:02x}");
        acc
    });
    // 15 hex characters always parse into a u64.
    let hash_value = u64::from_str_radix(&hex[..15], 16).unwrap();

    hash_value as f64 / LONG_SCALE
}

/// Attribute values usable for bucketing: strings, and integers rendered in
/// decimal. Everything else (bool, float, object, array, null) is not
/// bucketable.
fn bucketable_value(user: &User, attribute: &UserAttribute) -> Option<String> {
    match user.attribute(attribute)? {
        Value::String(s) => Some(s),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else {
                n.as_u64().map(|u| u.to_string())
            }
        }
        _ => None,
    }
}

/// The variation a rollout assigns to a user, plus whether that assignment
/// counts as experiment exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RolloutOutcome {
    pub variation: i64,
    pub in_experiment: bool,
}

/// Select the weighted variation owning the user's bucket. Returns `None`
/// only for an empty rollout (a malformed flag).
///
/// Weights are in units of 0.001%. When they sum to less than 100% the
/// overflow bucket belongs to the last variation, which also covers users
/// whose bucket-by attribute was not bucketable.
pub(crate) fn rollout_outcome(
    rollout: &Rollout,
    user: &User,
    key: &str,
    salt: &str,
) -> Option<RolloutOutcome> {
    let last = rollout.variations.last()?;

    let bucket_by = rollout.bucket_by.clone().unwrap_or(UserAttribute::Key);
    let bucket = bucket_user(rollout.seed, user, key, &bucket_by, salt);

    let mut sum = 0.0;
    for weighted in &rollout.variations {
        sum += weighted.weight as f64 / 100_000.0;
        if bucket < sum {
            return Some(outcome(rollout, weighted));
        }
    }
    Some(outcome(rollout, last))
}

fn outcome(rollout: &Rollout, weighted: &WeightedVariation) -> RolloutOutcome {
    RolloutOutcome {
        variation: weighted.variation,
        in_experiment: rollout.kind == RolloutKind::Experiment && !weighted.untracked,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{bucket_user, rollout_outcome};
    use crate::{
        model::{Rollout, RolloutKind, WeightedVariation},
        test_common::weighted_variation,
        user::{User, UserAttribute},
    };

    fn assert_bucket(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 0.0000001,
            "bucket {actual} not within 1e-7 of {expected}"
        );
    }

    // These values are shared across all SDKs in the family. Do not change
    // them unless they are also changed everywhere else.
    #[test]
    fn bucket_user_by_key() {
        let bucket = |key: &str| {
            bucket_user(
                None,
                &User::with_key(key),
                "hashKey",
                &UserAttribute::Key,
                "saltyA",
            )
        };
        assert_bucket(bucket("userKeyA"), 0.42157587);
        assert_bucket(bucket("userKeyB"), 0.67084850);
        assert_bucket(bucket("userKeyC"), 0.10343106);
    }

    #[test]
    fn bucket_user_with_seed() {
        let bucket = |key: &str| {
            bucket_user(
                Some(61),
                &User::with_key(key),
                "hashKey",
                &UserAttribute::Key,
                "saltyA",
            )
        };
        assert_bucket(bucket("userKeyA"), 0.09801207);
        assert_bucket(bucket("userKeyB"), 0.14483777);
        assert_bucket(bucket("userKeyC"), 0.92426410);
    }

    #[test]
    fn bucket_by_integer_attribute_matches_string_form() {
        let as_int = User::builder("userkey").custom("intAttr", 33333).build();
        let as_string = User::builder("userkey").custom("stringAttr", "33333").build();
        let attr_int = UserAttribute::Custom("intAttr".into());
        let attr_string = UserAttribute::Custom("stringAttr".into());

        let bucket_int = bucket_user(None, &as_int, "hashKey", &attr_int, "saltyA");
        let bucket_string = bucket_user(None, &as_string, "hashKey", &attr_string, "saltyA");
        assert!(bucket_int > 0.0);
        assert_eq!(bucket_int, bucket_string);
    }

    #[test]
    fn non_bucketable_attributes_bucket_to_zero() {
        for value in [json!(33.5), json!(true), json!(null), json!(["x"]), json!({"a": 1})] {
            let user = User::builder("userkey").custom("attr", value.clone()).build();
            let bucket = bucket_user(
                None,
                &user,
                "hashKey",
                &UserAttribute::Custom("attr".into()),
                "saltyA",
            );
            assert_eq!(bucket, 0.0, "value {value} should not be bucketable");
        }
    }

    #[test]
    fn missing_attribute_buckets_to_zero() {
        let bucket = bucket_user(
            None,
            &User::with_key("userkey"),
            "hashKey",
            &UserAttribute::Email,
            "saltyA",
        );
        assert_eq!(bucket, 0.0);
    }

    #[test]
    fn secondary_key_changes_unseeded_bucket_only() {
        let plain = User::with_key("userKeyA");
        let with_secondary = User::builder("userKeyA").secondary("mySecondary").build();

        let unseeded = |user: &User| bucket_user(None, user, "hashKey", &UserAttribute::Key, "saltyA");
        assert_ne!(unseeded(&plain), unseeded(&with_secondary));

        let seeded =
            |user: &User| bucket_user(Some(61), user, "hashKey", &UserAttribute::Key, "saltyA");
        assert_eq!(seeded(&plain), seeded(&with_secondary));
    }

    #[test]
    fn rollout_assigns_by_accumulated_weight() {
        // userKeyA with seed 61 buckets at 0.09801207.
        let rollout = Rollout {
            kind: RolloutKind::Rollout,
            variations: vec![
                weighted_variation(0, 10000),
                weighted_variation(1, 20000),
                weighted_variation(2, 70000),
            ],
            bucket_by: None,
            seed: Some(61),
        };
        let user = User::with_key("userKeyA");
        let outcome = rollout_outcome(&rollout, &user, "hashKey", "saltyA").unwrap();
        assert_eq!(outcome.variation, 0);
        assert!(!outcome.in_experiment);

        // userKeyB buckets at 0.14483777, past the first 10% slice.
        let user = User::with_key("userKeyB");
        let outcome = rollout_outcome(&rollout, &user, "hashKey", "saltyA").unwrap();
        assert_eq!(outcome.variation, 1);
    }

    #[test]
    fn underfilled_rollout_assigns_last_variation() {
        // userKeyC with seed 61 buckets at 0.92426410, past both slices.
        let rollout = Rollout {
            kind: RolloutKind::Rollout,
            variations: vec![weighted_variation(0, 10000), weighted_variation(1, 20000)],
            bucket_by: None,
            seed: Some(61),
        };
        let user = User::with_key("userKeyC");
        let outcome = rollout_outcome(&rollout, &user, "hashKey", "saltyA").unwrap();
        assert_eq!(outcome.variation, 1);
    }

    #[test]
    fn empty_rollout_has_no_outcome() {
        let rollout = Rollout {
            kind: RolloutKind::Rollout,
            variations: vec![],
            bucket_by: None,
            seed: None,
        };
        assert_eq!(
            rollout_outcome(&rollout, &User::with_key("userkey"), "hashKey", "saltyA"),
            None
        );
    }

    #[test]
    fn experiment_marks_tracked_variations_only() {
        let experiment = Rollout {
            kind: RolloutKind::Experiment,
            variations: vec![
                weighted_variation(0, 10000),
                weighted_variation(1, 20000),
                WeightedVariation {
                    variation: 0,
                    weight: 70000,
                    untracked: true,
                },
            ],
            bucket_by: None,
            seed: Some(61),
        };

        // userKeyA -> slice 0 (tracked), userKeyC -> slice 2 (untracked).
        let outcome =
            rollout_outcome(&experiment, &User::with_key("userKeyA"), "hashKey", "saltyA").unwrap();
        assert_eq!(outcome.variation, 0);
        assert!(outcome.in_experiment);

        let outcome =
            rollout_outcome(&experiment, &User::with_key("userKeyC"), "hashKey", "saltyA").unwrap();
        assert_eq!(outcome.variation, 0);
        assert!(!outcome.in_experiment);
    }
}

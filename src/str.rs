//! Some string type helpers.
//!
//! Moved into a separate module, so we could experiment with different
//! representations.

use std::sync::Arc;

/// `Str` is a string that can be cloned cheaply.
///
/// Flag keys, rule ids, and segment keys are held in interned evaluation
/// reasons, so they get cloned on every evaluation that returns them.
pub type Str = Arc<str>;

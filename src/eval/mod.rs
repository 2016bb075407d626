//! The evaluation engine.

mod bucketing;
mod clauses;
mod evaluator;
mod operators;
mod segments;

pub use evaluator::{
    Evaluator, NoopPrerequisiteEventRecorder, PrerequisiteEvent, PrerequisiteEventRecorder,
};

//! Pure scheduling model: identifiers, objects, schedules, evaluation,
//! ownership and policy.

pub mod clock;
pub mod evaluator;
pub mod object;
pub mod ownership;
pub mod policy;
pub mod schedule;
pub mod types;

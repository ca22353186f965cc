//! Step primitives for long-running, resumable pipelines
//!
//! A pipeline is a plain `Vec<Step>`. The [`Runner`] executes it top to
//! bottom: Actions run once, Conditions poll until ready or timed out, and
//! the first error aborts the run after best-effort diagnostics.
//!
//! Steps hold no state of their own. Anything that must survive a crash
//! lives in the workflow document or in the cloud resources themselves, so
//! every Action is written to converge when re-run from the top of its phase.

mod refreshing;
mod runner;
mod step;

pub use refreshing::Authorizer;
pub use runner::{Diagnostics, Runner, StepTimings};
pub use step::{ActionFn, ConditionFn, Step, DEFAULT_POLL_INTERVAL};

#[cfg(test)]
pub use refreshing::MockAuthorizer;
#[cfg(test)]
pub use runner::MockDiagnostics;

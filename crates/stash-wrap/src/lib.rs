//! The wrapper contract and the lookup/commit driver.
//!
//! A *wrapper* teaches the cache about one build program: how to enumerate
//! its outputs, which arguments and environment variables affect them, how to
//! run its preprocessor, and how to execute it on a miss. The *driver* turns
//! a wrapper plus an invocation into fingerprints, probes the cache tiers,
//! and either replays a hit or runs the program and commits the result.

mod capabilities;
mod driver;
mod error;
mod gcc;
mod wrapper;

pub use capabilities::{Capabilities, Capability};
pub use driver::{Driver, Outcome};
pub use error::{Result, WrapError};
pub use gcc::GccWrapper;
pub use wrapper::{Invocation, ProgramWrapper, RunResult};

/// Picks the wrapper that can handle `invocation`, if any.
pub fn select_wrapper(invocation: &Invocation) -> Option<Box<dyn ProgramWrapper>> {
    if GccWrapper::can_handle(invocation) {
        return Some(Box::new(GccWrapper::new(invocation.clone())));
    }
    None
}

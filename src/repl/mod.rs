//! The child-process worker and its CPU/RSS sampler. See SPEC_FULL.md §4.2.

mod sampler;
mod worker;

pub use sampler::Sampler;
pub use worker::{Diagnostics, SendOutcome, Worker, WorkerId};

pub mod backoff;
pub(crate) mod controller;
pub(crate) mod polling;
pub(crate) mod streaming;
pub mod supervisor_sm;

pub use backoff::{Backoff, jitter_wait};

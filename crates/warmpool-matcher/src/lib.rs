//! warmpool-matcher — hands out warm instances for inbound requests.
//!
//! The matcher normalizes a request's image/machine-type/network shape
//! into the canonical pool name, pops a record from that pool's queue,
//! verifies the underlying instance still exists, relabels it as allocated
//! (`warmth: cooled`), and returns it. It carries no retry or orphan logic
//! of its own; it is a thin consumer of the queues the instance checker
//! maintains.

pub mod error;
pub mod matcher;

pub use error::{MatcherError, MatcherResult};
pub use matcher::{InstanceRequest, Matcher};

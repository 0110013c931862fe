//! Adaptive-streaming support for elements without native manifest playback
//!
//! - `adapter`: binds at most one software streaming client to an element and
//!   turns its error signals into absorb/recover/fallback/surface decisions
//! - `fallback`: derives ordered direct-file alternatives for manifests served
//!   from recognized hosts
//!
//! # Recovery policy
//!
//! 1. Non-fatal fragment errors with retries left are absorbed
//! 2. Non-fatal buffer stalls become a transient loading state
//! 3. Fatal load errors on a recognized host switch (once) to direct files
//! 4. Fatal media errors get a single built-in recovery attempt
//! 5. Everything else is surfaced to the caller

mod adapter;
mod fallback;

pub use adapter::{StreamOutcome, StreamingAdapter, StreamingClient, StreamingClientFactory};
pub use fallback::{FallbackPlanner, FallbackRule, default_rules};

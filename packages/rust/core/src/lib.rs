//! Core pipeline orchestration for listingscout.
//!
//! This crate ties together link discovery, page stabilization and record
//! extraction into one end-to-end run ([`Harvester::run`]).

pub mod pipeline;

pub use pipeline::{HarvestReport, Harvester, LinkFailure, ProgressReporter, SilentProgress};

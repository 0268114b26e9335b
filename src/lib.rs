//! policyd library
//!
//! Exposes the host pieces around the policy decision engine for integration testing

pub mod cli;
pub mod fixture;
pub mod metrics;

pub use fixture::{FileCanonicalSource, PolicyFixture};

//! Common test utilities for sopsfile-provider
//!
//! - Mock key resolvers and master keys
//! - age key fixtures and plaintext fixture files
//! - A decrypt helper for round-trip assertions

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;

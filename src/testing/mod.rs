//! Testing utilities and mock implementations
//!
//! Lets the session be exercised without a broker or TLS stack.

pub mod mocks;

pub use mocks::*;

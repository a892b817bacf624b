//! Testing utilities and mock implementations
//!
//! Lets the pump be exercised without a running AMQP broker.

pub mod mocks;

pub use mocks::*;

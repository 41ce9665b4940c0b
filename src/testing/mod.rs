//! Test support
//!
//! Fake broker connector and link used to exercise the session lifecycle
//! without a real MQTT broker.

pub mod mocks;

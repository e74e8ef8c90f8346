//! Scenario tests for the helper layer.
//!
//! Each test runs on its own harness thread, so attaching inside a test never
//! collides with another test's thread-local slot.

mod common;

mod barrier_scenarios;
mod frame_scenarios;
mod thread_scenarios;

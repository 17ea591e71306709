#![allow(dead_code)]
//! # Common Test Utilities
//!
//! Shared setup for the integration tests: loads `.env` and installs the
//! tracing subscriber exactly once per test binary, so pipeline logs are
//! visible when running tests with `RUST_LOG` set.

use dotenvy::dotenv;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes the tracing subscriber and loads .env for tests.
pub fn setup_tracing() {
    INIT.call_once(|| {
        dotenv().ok();
        tracing_subscriber::fmt::init();
    });
}

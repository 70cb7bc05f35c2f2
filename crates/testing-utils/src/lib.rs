//! # Orchestrator Testing Utils
//!
//! Shared test doubles for the orchestrator workspace:
//!
//! - **Mock native proxy**: scripted play results, release accounting, remote close
//! - **Recording model executor**: captures hand-offs and stop requests
//! - **Callback server**: real HTTP endpoint with scripted responses
//! - **Builders**: heartbeats, submission requests, callback targets
//!
//! ```toml
//! [dev-dependencies]
//! orchestrator-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;

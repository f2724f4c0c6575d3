//! # Conference Test Utilities
//!
//! Shared test utilities for the Conference Controller.
//!
//! ## Modules
//!
//! - `fixtures` - Join request and subscription builders, tagged offers
//! - `harness` - [`TestConference`], a controller wired to mock collaborators
//! - `mocks` - the controller's recording collaborator doubles, re-exported
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conference_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let conference = TestConference::new();
//!     let alice = conference.join("call-a", "alpha").await;
//!     alice.inject_chat("hello").await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod harness;

/// Recording signaling and media transport doubles.
pub mod mocks {
    pub use conference_controller::collaborators::mock::*;
}

pub use fixtures::*;
pub use harness::TestConference;

use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a test-writer tracing subscriber once per test binary.
///
/// Filtered by `RUST_LOG`, silent by default.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "off".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::mocks::{MockMediaTransport, MockSignaling};

    #[test]
    fn test_mocks_available_through_feature() {
        let signaling = MockSignaling::new();
        assert!(signaling.calls().is_empty());
        let transport = MockMediaTransport::new();
        assert_eq!(transport.open_count(), 0);
        assert!(transport.sessions().is_empty());
    }
}

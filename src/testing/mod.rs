//! Testing utilities for passkey-rp
//!
//! - [`SoftAuthenticator`] - software platform authenticator producing
//!   browser-shaped registration and authentication responses
//! - [`TestFixtures`] - pre-built settings and relying parties
//!
//! ```ignore
//! use passkey_rp::testing::{SoftAuthenticator, TestFixtures, TEST_ORIGIN};
//!
//! let rp = TestFixtures::relying_party();
//! let mut authenticator = SoftAuthenticator::new(TEST_ORIGIN);
//!
//! let options = rp.begin_registration("alice").unwrap();
//! let response = authenticator.create(&options).unwrap();
//! assert!(rp.complete_registration("alice", &response).is_ok());
//! ```

mod authenticator;
mod fixtures;

pub use authenticator::{AttestationMode, SoftAuthenticator};
pub use fixtures::TestFixtures;

/// Origin the test relying party allows
pub const TEST_ORIGIN: &str = "http://localhost:3000";

/// Relying party ID used by test settings
pub const TEST_RP_ID: &str = "localhost";

#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![deny(warnings)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the passkey-rp application
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod handlers;
pub mod sequencing;
pub mod settings;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod webauthn;

/// Re-export commonly used items
pub use handlers::configure_services;
pub use sequencing::{sign_in_or_register, PlatformAuthenticator, SignInOutcome};
pub use settings::RpSettings;
pub use webauthn::{RelyingParty, WebAuthnSettings};

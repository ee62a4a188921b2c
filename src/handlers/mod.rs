// HTTP request handlers for the passkey relying party
pub mod health;
pub mod passkey;

use actix_web::web;

// Re-export the main handler functions
pub use health::ping;
pub use passkey::{authentication_options, register, registration_options, verify};

/// Mount the `/api/auth` routes; expects `web::Data<RelyingParty>` in app data
pub fn configure_services(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/auth")
            .route("/ping", web::get().to(ping))
            .route("/register-options", web::get().to(registration_options))
            .route("/register", web::post().to(register))
            .route("/challenge", web::get().to(authentication_options))
            .route("/verify", web::post().to(verify)),
    );
}

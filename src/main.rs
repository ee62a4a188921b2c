#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![deny(warnings)]
#![allow(clippy::multiple_crate_versions)]

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use passkey_rp::{configure_services, RelyingParty, RpSettings, VERSION};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration from Settings.toml and environment variables
    // This also loads .env file and initializes the logger
    let settings = RpSettings::load()
        .map_err(|e| std::io::Error::other(format!("Failed to load settings: {e:#}")))?;

    let relying_party = RelyingParty::new(settings.webauthn.clone())
        .map_err(|e| std::io::Error::other(format!("Invalid relying party settings: {e}")))?;

    start_server(relying_party, settings).await
}

/// Start the HTTP server
///
/// # Errors
///
/// Returns an error if:
/// - Server binding fails
/// - Server fails to start
async fn start_server(relying_party: RelyingParty, settings: RpSettings) -> std::io::Result<()> {
    let bind_address = settings.get_bind_address();
    print_startup_info(&bind_address, &settings);

    let relying_party = web::Data::new(relying_party);

    let cors_origins = settings.webauthn.allowed_origins.clone();

    HttpServer::new(move || {
        let cors_origins = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _| {
                cors_origins
                    .iter()
                    .any(|allowed| allowed == origin.to_str().unwrap_or(""))
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec!["Content-Type", "Accept"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(relying_party.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .configure(configure_services)
    })
    .bind(&bind_address)?
    .run()
    .await
}

fn print_startup_info(bind_address: &str, settings: &RpSettings) {
    println!("Starting passkey-rp {VERSION} on http://{bind_address}");
    println!(
        "Relying party: {} ({})",
        settings.webauthn.rp_name, settings.webauthn.rp_id
    );
    println!("Allowed origins:");
    for origin in &settings.webauthn.allowed_origins {
        println!("  {origin}");
    }
    println!();
    println!("Passkey endpoints:");
    println!("  GET  /api/auth/register-options?username= - Start passkey registration");
    println!("  POST /api/auth/register                    - Complete passkey registration");
    println!("  GET  /api/auth/challenge?username=         - Start passkey authentication");
    println!("  POST /api/auth/verify                      - Complete passkey authentication");
    println!();
    println!("System endpoints:");
    println!("  GET  /api/auth/ping - Health check");
}

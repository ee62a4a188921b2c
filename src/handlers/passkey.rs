//! Passkey request handlers
//!
//! Thin adapters from HTTP to the [`RelyingParty`]. Ceremony failures are
//! logged with their reason code by the engines and reported to clients
//! only as a generic denial.

use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::webauthn::{AuthError, AuthenticationResponse, RegistrationResponse, RelyingParty};

const MAX_USERNAME_LEN: usize = 64;

/// `?username=` query for the options endpoints
#[derive(Debug, Deserialize)]
pub struct UsernameQuery {
    pub username: String,
}

/// Body of `POST /register`
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub credential: RegistrationResponse,
}

/// Body of `POST /verify`
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub username: String,
    pub credential: AuthenticationResponse,
}

fn error_response(status: StatusCode, error: &str, message: &str) -> HttpResponse {
    HttpResponse::build(status).json(json!({
        "success": false,
        "error": error,
        "message": message
    }))
}

fn internal_error() -> HttpResponse {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "An internal error occurred",
    )
}

/// Trimmed username, or a 400 response
fn validate_username(username: &str) -> Result<&str, HttpResponse> {
    let username = username.trim();
    if username.is_empty()
        || username.chars().count() > MAX_USERNAME_LEN
        || username.chars().any(char::is_control)
    {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "A username of 1 to 64 printable characters is required",
        ));
    }
    Ok(username)
}

/// The request's `Origin` header, or a 403 if it is absent or not allow-listed
fn check_origin<'a>(req: &'a HttpRequest, rp: &RelyingParty) -> Result<&'a str, HttpResponse> {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());

    match origin {
        Some(origin) if rp.is_allowed_origin(origin) => Ok(origin),
        _ => {
            log::warn!("Rejected {} from origin {origin:?}", req.path());
            Err(error_response(
                StatusCode::FORBIDDEN,
                "invalid_origin",
                "Invalid origin",
            ))
        }
    }
}

/// `GET /register-options?username=` - creation options for a new passkey
pub async fn registration_options(
    query: web::Query<UsernameQuery>,
    rp: web::Data<RelyingParty>,
) -> HttpResponse {
    let username = match validate_username(&query.username) {
        Ok(username) => username,
        Err(response) => return response,
    };

    match rp.begin_registration(username) {
        Ok(options) => HttpResponse::Ok().json(options),
        Err(e) => {
            log::error!("Failed to issue registration options: {e}");
            internal_error()
        }
    }
}

/// `POST /register` - verify and store a new passkey
pub async fn register(
    req: HttpRequest,
    body: web::Json<RegisterRequest>,
    rp: web::Data<RelyingParty>,
) -> HttpResponse {
    let origin = match check_origin(&req, &rp) {
        Ok(origin) => origin,
        Err(response) => return response,
    };
    let username = match validate_username(&body.username) {
        Ok(username) => username,
        Err(response) => return response,
    };

    match rp.complete_registration_from(username, origin, &body.credential) {
        Ok(_) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(_) => error_response(
            StatusCode::BAD_REQUEST,
            "registration_failed",
            "Registration verification failed",
        ),
    }
}

/// `GET /challenge?username=` - request options for an existing passkey
pub async fn authentication_options(
    query: web::Query<UsernameQuery>,
    rp: web::Data<RelyingParty>,
) -> HttpResponse {
    let username = match validate_username(&query.username) {
        Ok(username) => username,
        Err(response) => return response,
    };

    match rp.begin_authentication(username) {
        Ok(options) => HttpResponse::Ok().json(options),
        Err(AuthError::NoCredentialRegistered) => error_response(
            StatusCode::NOT_FOUND,
            "no_credential",
            "No credential registered yet",
        ),
        Err(e) => {
            log::error!("Failed to issue authentication options: {e}");
            internal_error()
        }
    }
}

/// `POST /verify` - verify an assertion
pub async fn verify(
    req: HttpRequest,
    body: web::Json<VerifyRequest>,
    rp: web::Data<RelyingParty>,
) -> HttpResponse {
    let origin = match check_origin(&req, &rp) {
        Ok(origin) => origin,
        Err(response) => return response,
    };
    let username = match validate_username(&body.username) {
        Ok(username) => username,
        Err(response) => return response,
    };

    match rp.complete_authentication_from(username, origin, &body.credential) {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(_) => error_response(
            StatusCode::UNAUTHORIZED,
            "authentication_failed",
            "Authentication failed",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::configure_services;
    use crate::testing::{SoftAuthenticator, TestFixtures, TEST_ORIGIN};
    use crate::webauthn::{AuthenticationOptions, RegistrationOptions};
    use actix_web::{test as actix_test, App};
    use serde_json::Value;

    macro_rules! app {
        ($rp:expr) => {
            actix_test::init_service(
                App::new()
                    .app_data($rp.clone())
                    .configure(configure_services),
            )
            .await
        };
    }

    fn relying_party() -> web::Data<RelyingParty> {
        web::Data::new(TestFixtures::relying_party())
    }

    #[test]
    fn test_username_validation() {
        assert_eq!(validate_username("  alice ").ok(), Some("alice"));
        assert!(validate_username("").is_err());
        assert!(validate_username("   ").is_err());
        assert!(validate_username("a\u{0}b").is_err());
        assert!(validate_username(&"x".repeat(65)).is_err());
        assert!(validate_username(&"x".repeat(64)).is_ok());
    }

    #[actix_web::test]
    async fn test_registration_then_authentication() {
        let rp = relying_party();
        let app = app!(rp);
        let mut authenticator = SoftAuthenticator::new(TEST_ORIGIN);

        let req = actix_test::TestRequest::get()
            .uri("/api/auth/register-options?username=alice")
            .to_request();
        let options: RegistrationOptions = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(options.user.name, "alice");

        let credential = authenticator.create(&options).unwrap();
        let req = actix_test::TestRequest::post()
            .uri("/api/auth/register")
            .insert_header((header::ORIGIN, TEST_ORIGIN))
            .set_json(json!({ "username": "alice", "credential": credential }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = actix_test::TestRequest::get()
            .uri("/api/auth/challenge?username=alice")
            .to_request();
        let options: AuthenticationOptions = actix_test::call_and_read_body_json(&app, req).await;

        let credential = authenticator.get(&options).unwrap();
        let req = actix_test::TestRequest::post()
            .uri("/api/auth/verify")
            .insert_header((header::ORIGIN, TEST_ORIGIN))
            .set_json(json!({ "username": "alice", "credential": credential }))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
    }

    #[actix_web::test]
    async fn test_challenge_without_credential_is_404() {
        let rp = relying_party();
        let app = app!(rp);

        let req = actix_test::TestRequest::get()
            .uri("/api/auth/challenge?username=nobody")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"], "no_credential");
    }

    #[actix_web::test]
    async fn test_post_requires_allowed_origin() {
        let rp = relying_party();
        let app = app!(rp);
        let options = rp.begin_registration("alice").unwrap();
        let credential = SoftAuthenticator::new(TEST_ORIGIN).create(&options).unwrap();
        let body = json!({ "username": "alice", "credential": credential });

        let req = actix_test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(&body)
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = actix_test::TestRequest::post()
            .uri("/api/auth/register")
            .insert_header((header::ORIGIN, "http://evil.example"))
            .set_json(&body)
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let json: Value = actix_test::read_body_json(resp).await;
        assert_eq!(json["message"], "Invalid origin");

        // The pending challenge was never touched
        assert!(rp.credential("alice").is_none());
        let req = actix_test::TestRequest::post()
            .uri("/api/auth/register")
            .insert_header((header::ORIGIN, TEST_ORIGIN))
            .set_json(&body)
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_client_data_origin_must_match_request_origin() {
        const OTHER_ORIGIN: &str = "http://localhost:5173";
        let rp = web::Data::new(
            RelyingParty::new(crate::webauthn::WebAuthnSettings {
                allowed_origins: vec![TEST_ORIGIN.to_string(), OTHER_ORIGIN.to_string()],
                ..TestFixtures::webauthn_settings()
            })
            .unwrap(),
        );
        let app = app!(rp);
        let options = rp.begin_registration("alice").unwrap();
        let credential = SoftAuthenticator::new(OTHER_ORIGIN).create(&options).unwrap();
        let body = json!({ "username": "alice", "credential": credential });

        // Both origins are allowed, but the response was made for the other one
        let req = actix_test::TestRequest::post()
            .uri("/api/auth/register")
            .insert_header((header::ORIGIN, TEST_ORIGIN))
            .set_json(&body)
            .to_request();
        assert_eq!(
            actix_test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );
        assert!(rp.credential("alice").is_none());

        let req = actix_test::TestRequest::post()
            .uri("/api/auth/register")
            .insert_header((header::ORIGIN, OTHER_ORIGIN))
            .set_json(&body)
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_failures_are_reported_generically() {
        let rp = relying_party();
        let app = app!(rp);
        let mut authenticator = SoftAuthenticator::new(TEST_ORIGIN);
        let options = rp.begin_registration("alice").unwrap();
        rp.complete_registration("alice", &authenticator.create(&options).unwrap())
            .unwrap();

        // Replay of a consumed challenge and a bad signature look the same
        let options = rp.begin_authentication("alice").unwrap();
        let credential = authenticator.get(&options).unwrap();
        rp.complete_authentication("alice", &credential).unwrap();

        let req = actix_test::TestRequest::post()
            .uri("/api/auth/verify")
            .insert_header((header::ORIGIN, TEST_ORIGIN))
            .set_json(json!({ "username": "alice", "credential": credential }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(
            body,
            json!({
                "success": false,
                "error": "authentication_failed",
                "message": "Authentication failed"
            })
        );
    }

    #[actix_web::test]
    async fn test_invalid_username_is_rejected() {
        let rp = relying_party();
        let app = app!(rp);
        let req = actix_test::TestRequest::get()
            .uri("/api/auth/register-options?username=%20%20")
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = actix_test::TestRequest::get()
            .uri("/api/auth/register-options")
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}

use actix_web::HttpResponse;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub message: String,
}

/// Liveness check
pub async fn ping() -> HttpResponse {
    HttpResponse::Ok().json(PingResponse {
        message: "pong from authRoutes".to_string(),
    })
}

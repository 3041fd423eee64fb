//! HTTP control surface (spec §6): component C7.
//!
//! Grounded in `examples/mrecords121-ephyr`'s `server::run` entrypoint
//! (bind `actix_web::HttpServer` over a shared `web::Data` state) and its
//! per-domain handler module layout under `api/`.

pub mod mix;
pub mod recording;
pub mod screenshot;

use crate::config::Config;
use crate::task::{Method, TaskManager};
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use serde::Serialize;
use std::sync::Arc;

/// Shared state handed to every request handler.
pub struct AppState {
    pub tasks: TaskManager,
    pub config: Arc<Config>,
}

/// The `{code, message}` envelope every endpoint replies with (spec §6).
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub code: u32,
    pub message: String,
}

impl ApiResponse {
    pub const SUCCESS: u32 = 1000;
    pub const QUEUED: u32 = 1001;
    pub const INVALID_REQUEST: u32 = 2001;
    pub const INVALID_JSON: u32 = 2002;

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            code: Self::SUCCESS,
            message: message.into(),
        }
    }

    pub fn queued(message: impl Into<String>) -> Self {
        Self {
            code: Self::QUEUED,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: Self::INVALID_REQUEST,
            message: message.into(),
        }
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self {
            code: Self::INVALID_JSON,
            message: message.into(),
        }
    }

    fn status(&self) -> actix_web::http::StatusCode {
        match self.code {
            Self::SUCCESS | Self::QUEUED => actix_web::http::StatusCode::OK,
            _ => actix_web::http::StatusCode::BAD_REQUEST,
        }
    }
}

impl Responder for ApiResponse {
    type Body = actix_web::body::BoxBody;

    fn respond_to(self, _req: &HttpRequest) -> HttpResponse {
        HttpResponse::build(self.status()).json(&self)
    }
}

/// Parses a JSON request body, mapping malformed JSON to the
/// `invalid_json` response code rather than the generic `invalid_request`
/// one (spec §6 distinguishes the two).
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiResponse> {
    serde_json::from_slice(body).map_err(|e| ApiResponse::invalid_json(e.to_string()))
}

#[derive(Debug, serde::Deserialize)]
pub struct StopRequest {
    pub target: String,
    pub method: String,
}

/// The consolidated `POST /stop` endpoint (spec §6): any task kind can be
/// stopped by `(target, method)`, independent of which domain endpoint
/// started it.
pub async fn stop(state: web::Data<AppState>, body: web::Bytes) -> ApiResponse {
    let req: StopRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let method = match parse_method(&req.method) {
        Some(m) => m,
        None => return ApiResponse::invalid_request(format!("unknown method {}", req.method)),
    };
    if state.tasks.remove(&req.target, &method) {
        ApiResponse::success("stopped")
    } else {
        ApiResponse::invalid_request("no matching task")
    }
}

/// Maps the wire-format method string onto [`Method`]; shared by all three
/// domain handlers and `stop`.
pub(crate) fn parse_method(s: &str) -> Option<Method> {
    match s {
        "interval" => Some(Method::Interval),
        "percentage" => Some(Method::Percentage),
        "immediate" => Some(Method::Immediate),
        "specific_time" => Some(Method::SpecificTime),
        "mp4" => Some(Method::Mp4),
        "hls" => Some(Method::Hls),
        "mix" => Some(Method::Mix),
        _ => None,
    }
}

fn app_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/screenshot").route(web::post().to(screenshot::handle)))
        .service(web::resource("/recording").route(web::post().to(recording::handle)))
        .service(web::resource("/mix").route(web::post().to(mix::handle)))
        .service(web::resource("/stop").route(web::post().to(stop)));
}

/// Binds and runs the HTTP control surface until the process is shut down,
/// mirroring ephyr's `server::run`.
pub async fn run(state: AppState) -> std::io::Result<()> {
    let host = state.config.http_host.clone();
    let port = state.config.http_port;
    let data = web::Data::new(state);

    slog_scope::info!("starting HTTP control surface"; "host" => %host, "port" => port);

    HttpServer::new(move || App::new().app_data(data.clone()).configure(app_config))
        .bind((host.as_str(), port))?
        .run()
        .await
}

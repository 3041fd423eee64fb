//! `POST /screenshot` (spec §6).

use super::{parse_method, ApiResponse, AppState};
use crate::policy::screenshot::{ScreenshotSession, Variant};
use crate::session::{SessionRunnable, TimeoutConfig};
use crate::task::{Kind, Method, TaskId};
use actix_web::web;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ScreenshotRequest {
    pub stream_url: String,
    pub method: String,
    pub action: String,
    pub output_dir: Option<String>,
    pub filename_prefix: Option<String>,
    pub interval: Option<u32>,
    pub time_second: Option<u32>,
    pub percentage: Option<u32>,
}

fn default_name(url: &str) -> String {
    url.rsplit('/')
        .find(|segment| !segment.is_empty())
        .map(|segment| segment.split('.').next().unwrap_or(segment).to_owned())
        .unwrap_or_else(|| "stream".to_owned())
}

pub async fn handle(state: web::Data<AppState>, body: web::Bytes) -> ApiResponse {
    let req: ScreenshotRequest = match super::parse_body(&body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let method = match parse_method(&req.method) {
        Some(m) => m,
        None => return ApiResponse::invalid_request(format!("unknown method {}", req.method)),
    };

    if req.action == "stop" {
        return if state.tasks.remove(&req.stream_url, &method) {
            ApiResponse::success("stopped")
        } else {
            ApiResponse::invalid_request("no matching task")
        };
    }
    if req.action != "start" {
        return ApiResponse::invalid_request(format!("unknown action {}", req.action));
    }

    let variant = match build_variant(&method, &req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let is_live = req.stream_url.starts_with("rtmp://");
    if variant.requires_live_stream() && !is_live {
        return ApiResponse::invalid_request("this method requires a live rtmp:// input");
    }
    if variant.requires_file_input() && is_live {
        return ApiResponse::invalid_request("this method requires a file input");
    }

    let name = default_name(&req.stream_url);
    let output_dir = req.output_dir.unwrap_or_else(|| name.clone());
    let prefix = req.filename_prefix.unwrap_or(name);

    let id = TaskId {
        kind: Kind::Screenshot,
        target: req.stream_url.clone(),
        method,
    };
    let session = ScreenshotSession::new(req.stream_url.clone(), output_dir, prefix, variant);
    let runnable = SessionRunnable::new(
        req.stream_url,
        Box::new(session),
        TimeoutConfig::from(state.config.timeout),
    );

    match state.tasks.add(id, Box::new(runnable)) {
        crate::task::AddOutcome::Started => ApiResponse::success("started"),
        crate::task::AddOutcome::Queued => ApiResponse::queued("queued"),
        crate::task::AddOutcome::AlreadyRunning => {
            ApiResponse::invalid_request("a task for this stream/method is already running")
        }
        crate::task::AddOutcome::QueueFull => ApiResponse::invalid_request("task queue is full"),
    }
}

fn build_variant(method: &Method, req: &ScreenshotRequest) -> Result<Variant, ApiResponse> {
    match method {
        Method::Interval => {
            let seconds = req
                .interval
                .filter(|&s| s > 0)
                .ok_or_else(|| ApiResponse::invalid_request("interval requires interval > 0"))?;
            Ok(Variant::Interval {
                seconds: f64::from(seconds),
            })
        }
        Method::Percentage => {
            let pct = req
                .percentage
                .filter(|&p| (1..=100).contains(&p))
                .ok_or_else(|| ApiResponse::invalid_request("percentage requires 1..=100"))?;
            Ok(Variant::Percentage { pct: f64::from(pct) })
        }
        Method::Immediate => Ok(Variant::Immediate),
        Method::SpecificTime => {
            let seconds = req
                .time_second
                .ok_or_else(|| ApiResponse::invalid_request("specific_time requires time_second"))?;
            Ok(Variant::SpecificTime {
                target_seconds: f64::from(seconds),
            })
        }
        _ => Err(ApiResponse::invalid_request("not a screenshot method")),
    }
}

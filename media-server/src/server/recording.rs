//! `POST /recording` (spec §6).

use super::{parse_method, ApiResponse, AppState};
use crate::policy::recording::{RecordingSession, Variant};
use crate::session::{SessionRunnable, TimeoutConfig};
use crate::task::{Kind, Method, TaskId};
use actix_web::web;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct RecordingRequest {
    pub stream_url: String,
    pub method: String,
    pub action: String,
    pub filename_name: String,
    pub output_dir: Option<String>,
    pub segment_duration: Option<u32>,
}

pub async fn handle(state: web::Data<AppState>, body: web::Bytes) -> ApiResponse {
    let req: RecordingRequest = match super::parse_body(&body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let method = match parse_method(&req.method) {
        Some(m @ (Method::Mp4 | Method::Hls)) => m,
        Some(_) => return ApiResponse::invalid_request("recording method must be mp4 or hls"),
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

    if !req.stream_url.starts_with("rtmp://") {
        return ApiResponse::invalid_request("recording requires a live rtmp:// input");
    }

    let variant = match method {
        Method::Mp4 => {
            if !req.filename_name.ends_with(".mp4") {
                return ApiResponse::invalid_request("mp4 recording requires a .mp4 filename");
            }
            Variant::Mp4
        }
        Method::Hls => {
            if !req.filename_name.ends_with(".m3u8") {
                return ApiResponse::invalid_request("hls recording requires a .m3u8 filename");
            }
            let segment_duration = match req.segment_duration {
                Some(d) if d > 0 => d,
                _ => return ApiResponse::invalid_request("hls requires segment_duration > 0"),
            };
            Variant::Hls { segment_duration }
        }
        _ => unreachable!("validated above"),
    };

    let dir = req.output_dir.clone().unwrap_or_else(|| ".".to_owned());
    let output_path = Path::new(&dir).join(&req.filename_name);

    let id = TaskId {
        kind: Kind::Recording,
        target: req.stream_url.clone(),
        method,
    };
    let session = RecordingSession::new(req.stream_url.clone(), output_path, variant);
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

//! `POST /mix` (spec §6).

use super::{ApiResponse, AppState};
use crate::mix::state::MixStream;
use crate::mix::MixSession;
use crate::task::{Kind, Method, TaskId};
use actix_web::web;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct MixRequest {
    pub output_url: String,
    pub action: String,
    #[serde(default)]
    pub streams: Vec<MixStreamRequest>,
    pub resolution: Resolution,
    pub background_image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// All fields optional on the wire: elements missing any are silently
/// skipped rather than rejecting the whole request (spec §6 `/mix`).
#[derive(Debug, Deserialize)]
pub struct MixStreamRequest {
    pub id: Option<String>,
    pub url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    #[serde(rename = "z-index")]
    pub z_index: Option<i32>,
}

impl MixStreamRequest {
    fn into_stream(self) -> Option<MixStream> {
        Some(MixStream {
            id: self.id?,
            url: self.url.filter(|u| u.starts_with("rtmp://"))?,
            width: self.width?,
            height: self.height?,
            x: self.x?,
            y: self.y?,
            z_index: self.z_index?,
        })
    }
}

pub async fn handle(state: web::Data<AppState>, body: web::Bytes) -> ApiResponse {
    let req: MixRequest = match super::parse_body(&body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    if !req.output_url.starts_with("rtmp://") {
        return ApiResponse::invalid_request("mix output_url must be rtmp://");
    }
    if req.resolution.width == 0 || req.resolution.height == 0 {
        return ApiResponse::invalid_request("mix resolution must be nonzero");
    }

    let streams: Vec<MixStream> = req
        .streams
        .into_iter()
        .filter_map(MixStreamRequest::into_stream)
        .collect();

    match req.action.as_str() {
        "start" => {
            let id = TaskId {
                kind: Kind::Mixing,
                target: req.output_url.clone(),
                method: Method::Mix,
            };
            let session = MixSession::new(
                req.output_url,
                req.background_image,
                req.resolution.width,
                req.resolution.height,
                streams,
            );
            match state.tasks.add(id, Box::new(session)) {
                crate::task::AddOutcome::Started => ApiResponse::success("started"),
                crate::task::AddOutcome::Queued => ApiResponse::queued("queued"),
                crate::task::AddOutcome::AlreadyRunning => {
                    ApiResponse::invalid_request("a mix is already running for this output")
                }
                crate::task::AddOutcome::QueueFull => {
                    ApiResponse::invalid_request("task queue is full")
                }
            }
        }
        "update" => {
            let params = serde_json::to_value(&streams).expect("Vec<MixStream> is serializable");
            if state.tasks.update(&req.output_url, &Method::Mix, params) {
                ApiResponse::success("updated")
            } else {
                ApiResponse::invalid_request("no running mix for this output")
            }
        }
        other => ApiResponse::invalid_request(format!("unknown action {other}")),
    }
}

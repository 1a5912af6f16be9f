use crate::config::BridgeConfig;
use crate::error::BridgeResult;
use crate::io_struct::{ChatCompletionResponse, ChatRequest};
use crate::reconcile::reconcile_response;
use crate::request_transform::transform_tool_request;
use crate::sse::decode_events;
use crate::stream_reconcile::reconcile_stream;
use crate::tool_result_fold::fold_tool_results;
use crate::upstream::{ByteStream, HttpUpstream, Upstream};
use actix_web::HttpResponse;
use bytes::Bytes;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Tools were offered: grammar injected, reply reconciled.
    ToolCalling,
    /// Tool results folded into a user turn.
    ToolResults,
    PassThrough,
}

impl Route {
    pub fn reconciles(self) -> bool {
        matches!(self, Route::ToolCalling)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub route: Route,
    pub body: ChatRequest,
}

/// Picks the transformation for a request. This is the only dispatch point.
pub fn prepare(req: &ChatRequest) -> BridgeResult<PreparedRequest> {
    if req.ends_with_tool_result() {
        return Ok(PreparedRequest {
            route: Route::ToolResults,
            body: fold_tool_results(req)?,
        });
    }
    if req.has_function_tools() {
        return Ok(PreparedRequest {
            route: Route::ToolCalling,
            body: transform_tool_request(req)?,
        });
    }
    let mut body = req.clone();
    body.strip_tools();
    Ok(PreparedRequest {
        route: Route::PassThrough,
        body,
    })
}

pub enum BridgeResponse {
    Json(Bytes),
    Stream(ByteStream),
}

impl From<BridgeResponse> for HttpResponse {
    fn from(resp: BridgeResponse) -> Self {
        match resp {
            BridgeResponse::Json(body) => HttpResponse::Ok()
                .content_type("application/json")
                .body(body),
            BridgeResponse::Stream(body) => HttpResponse::Ok()
                .content_type("text/event-stream")
                .insert_header(("Cache-Control", "no-cache"))
                .streaming(body),
        }
    }
}

#[derive(Clone)]
pub struct BridgeState {
    pub upstream: Arc<dyn Upstream>,
    pub upstream_model: Option<String>,
}

impl BridgeState {
    pub fn new(config: &BridgeConfig) -> anyhow::Result<Self> {
        let upstream = HttpUpstream::new(config)?;
        log::info!("Forwarding to upstream {}", upstream.url());
        Ok(Self::with_upstream(
            Arc::new(upstream),
            config.upstream_model.clone(),
        ))
    }

    pub fn with_upstream(upstream: Arc<dyn Upstream>, upstream_model: Option<String>) -> Self {
        Self {
            upstream,
            upstream_model,
        }
    }

    pub async fn chat_completions(&self, req: ChatRequest) -> BridgeResult<BridgeResponse> {
        let PreparedRequest { route, mut body } = prepare(&req)?;
        if let Some(model) = &self.upstream_model {
            body.model = Some(model.clone());
        }
        log::info!(
            "Chat completion: route={:?} stream={} messages={}",
            route,
            body.stream,
            body.messages.len()
        );
        let payload = serde_json::to_value(&body)?;
        log::debug!("Upstream payload: {}", payload);

        if body.stream {
            let upstream = self.upstream.complete_stream(&payload).await?;
            let stream = if route.reconciles() {
                reconcile_stream(decode_events(upstream))
            } else {
                upstream
            };
            return Ok(BridgeResponse::Stream(stream));
        }

        let raw = self.upstream.complete(&payload).await?;
        if !route.reconciles() {
            return Ok(BridgeResponse::Json(raw));
        }
        let resp: ChatCompletionResponse = serde_json::from_slice(&raw)?;
        let resp = reconcile_response(resp);
        Ok(BridgeResponse::Json(Bytes::from(serde_json::to_vec(&resp)?)))
    }
}

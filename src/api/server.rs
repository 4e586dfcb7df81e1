//! HTTP server and chat-completion handler.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use tower_http::trace::TraceLayer;

use super::types::{
    ChatChoice, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
    ChunkChoice, ErrorBody, ErrorResponse, MessageDelta, ModelObject, ModelsResponse, Usage,
};
use super::SERVED_MODEL_ID;
use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::util::truncate_for_log;

/// Response header carrying the run identifier for log correlation.
const RUN_ID_HEADER: &str = "x-jgo-run-id";

/// Fixed remediation message for the agent-not-authenticated condition.
const LOGIN_REMEDIATION: &str =
    "The coding agent is not logged in on the execution host. Run `codex login` there, then retry the request.";

pub struct AppState {
    pub orchestrator: Orchestrator,
}

/// Start the HTTP server on the configured listen address.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = config.listen_addr.clone();
    let state = Arc::new(AppState {
        orchestrator: Orchestrator::new(config),
    });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "jgo server listening");
    axum::serve(listener, routes(state)).await?;
    Ok(())
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_models() -> Json<ModelsResponse> {
    Json(ModelsResponse {
        object: "list",
        data: vec![ModelObject {
            id: SERVED_MODEL_ID,
            object: "model",
            created: 0,
            owned_by: "jgo",
        }],
    })
}

async fn chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let run_id = state.orchestrator.next_run_id();

    let req: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(run_id = %run_id, error = %e, "request rejected: invalid JSON body");
            return with_run_id(
                error_response(
                    StatusCode::BAD_REQUEST,
                    format!("invalid JSON body: {e} (run_id={run_id})"),
                ),
                &run_id,
            );
        }
    };

    tracing::info!(
        run_id = %run_id,
        model = %req.model.trim(),
        stream = req.stream,
        messages = req.messages.len(),
        "incoming chat request"
    );

    let model = req.model.trim();
    if !model.is_empty() && model != SERVED_MODEL_ID {
        tracing::warn!(run_id = %run_id, model = %model, "request rejected: unsupported model");
        return with_run_id(
            error_response(
                StatusCode::BAD_REQUEST,
                format!("unsupported model {model:?}; use {SERVED_MODEL_ID:?} (run_id={run_id})"),
            ),
            &run_id,
        );
    }

    let Some(instruction) = extract_instruction(&req.messages) else {
        tracing::warn!(run_id = %run_id, "request rejected: missing user instruction");
        return with_run_id(
            error_response(
                StatusCode::BAD_REQUEST,
                format!("missing user instruction in messages (run_id={run_id})"),
            ),
            &run_id,
        );
    };
    tracing::info!(
        run_id = %run_id,
        preview = %truncate_for_log(&instruction, 160),
        "instruction extracted"
    );

    let response = match state.orchestrator.run(&run_id, &instruction).await {
        Err(err) if err.is_auth_required() => {
            tracing::warn!(run_id = %run_id, error = %err, "automation blocked: login required");
            completion_response(req.stream, LOGIN_REMEDIATION.to_string())
        }
        Err(err) => {
            tracing::warn!(run_id = %run_id, error = %err, "automation failed");
            error_response(
                StatusCode::BAD_REQUEST,
                format!("{err} (run_id={run_id})"),
            )
        }
        Ok(result) => {
            let content = shape_content(&result.output, &result.branch);
            tracing::info!(
                run_id = %run_id,
                stream = req.stream,
                branch = %result.branch,
                content_len = content.len(),
                "request completed"
            );
            completion_response(req.stream, content)
        }
    };
    with_run_id(response, &run_id)
}

/// The instruction is the last non-empty `user` message.
fn extract_instruction(messages: &[ChatMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .filter(|m| m.role.trim().eq_ignore_ascii_case("user"))
        .map(|m| m.content.trim())
        .find(|content| !content.is_empty())
        .map(str::to_string)
}

/// Assistant content for a finished run: the tagged stage outputs, plus the
/// branch trailer; a bare status object when the agent printed nothing.
fn shape_content(output: &str, branch: &str) -> String {
    let content = output.trim();
    if content.is_empty() {
        return format!(r#"{{"status":"ok","branch":"{branch}"}}"#);
    }
    if branch.is_empty() {
        content.to_string()
    } else {
        format!("{content}\n\n[branch] {branch}")
    }
}

fn completion_response(stream: bool, content: String) -> Response {
    if stream {
        streaming_response(content)
    } else {
        (
            StatusCode::OK,
            Json(build_completion(SERVED_MODEL_ID, content)),
        )
            .into_response()
    }
}

fn build_completion(model: &str, content: String) -> ChatCompletionResponse {
    let now = Utc::now();
    ChatCompletionResponse {
        id: format!("chatcmpl-{}", now.format("%Y%m%d%H%M%S")),
        object: "chat.completion",
        created: now.timestamp(),
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content,
            },
            finish_reason: "stop",
        }],
        usage: Usage::default(),
    }
}

fn streaming_response(content: String) -> Response {
    let frames: Vec<Result<Bytes, std::io::Error>> = sse_frames(SERVED_MODEL_ID, content)
        .into_iter()
        .map(Ok)
        .collect();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(futures::stream::iter(frames)))
        .unwrap_or_else(|_| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to build streaming response".to_string(),
            )
        })
}

/// The full SSE sequence for one completion: an assistant-role delta, one
/// content delta, a closing chunk with `finish_reason: "stop"`, and the
/// `[DONE]` terminator.
fn sse_frames(model: &str, content: String) -> Vec<Bytes> {
    let now = Utc::now();
    let chat_id = format!("chatcmpl-{}", now.format("%Y%m%d%H%M%S"));
    let created = now.timestamp();

    let chunk = |delta: MessageDelta, finish_reason: Option<&'static str>| ChatCompletionChunk {
        id: chat_id.clone(),
        object: "chat.completion.chunk",
        created,
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
    };

    let mut frames = Vec::with_capacity(4);
    for chunk in [
        chunk(
            MessageDelta {
                role: Some("assistant"),
                content: None,
            },
            None,
        ),
        chunk(
            MessageDelta {
                role: None,
                content: Some(content),
            },
            None,
        ),
        chunk(MessageDelta::default(), Some("stop")),
    ] {
        if let Ok(payload) = serde_json::to_string(&chunk) {
            frames.push(Bytes::from(format!("data: {payload}\n\n")));
        }
    }
    frames.push(Bytes::from("data: [DONE]\n\n"));
    frames
}

fn error_response(status: StatusCode, message: String) -> Response {
    let body = ErrorResponse {
        error: ErrorBody {
            message,
            r#type: "invalid_request_error",
        },
    };
    (status, Json(body)).into_response()
}

fn with_run_id(mut response: Response, run_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(run_id) {
        response.headers_mut().insert(RUN_ID_HEADER, value);
    }
    response
}

use super::assemble;
use super::types::*;
use crate::relay::ImageRelay;
use crate::scheduler::BatchScheduler;
use crate::upstream::{GenerationParams, SeedSpec};
use crate::{Error, config::Config};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{
        IntoResponse, Json, Response,
        sse::{Event, Sse},
    },
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scheduler: Arc<BatchScheduler>,
    pub relay: Arc<ImageRelay>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorBody {
                message: message.into(),
                error_type: "api_error".to_string(),
                code: code.to_string(),
            },
        }),
    )
}

fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let api_key = &state.config.server.api_key;
    if api_key.is_empty() {
        return Ok(());
    }

    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {api_key}"));

    if authorized {
        Ok(())
    } else {
        Err(api_error(
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "unauthorized",
        ))
    }
}

/// Origin clients should use to reach this service, for rewriting media URLs.
fn public_origin(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(origin) = &state.config.server.public_origin {
        return origin.trim_end_matches('/').to_string();
    }
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|host| format!("http://{host}"))
        .unwrap_or_else(|| {
            format!(
                "http://{}:{}",
                state.config.server.host, state.config.server.port
            )
        })
}

pub async fn models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = check_auth(&state, &headers) {
        return e.into_response();
    }

    let created = chrono::Utc::now().timestamp();
    let list = ModelList {
        object: "list".to_string(),
        data: state
            .config
            .generation
            .models
            .iter()
            .map(|id| ModelInfo {
                id: id.clone(),
                object: "model".to_string(),
                created,
                owned_by: "z-image".to_string(),
            })
            .collect(),
    };

    Json(list).into_response()
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    check_auth(&state, &headers)?;

    let request_id = format!("req-{}", Uuid::new_v4());
    let prompt = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .ok_or_else(|| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "No user message found",
                "internal_error",
            )
        })?;

    info!(%request_id, stream = request.stream, "received chat completion request");

    let defaults = &state.config.generation;
    let mut params = GenerationParams {
        prompt,
        width: defaults.default_width,
        height: defaults.default_height,
        steps: defaults.default_steps,
    };
    let mut seed = -1i64;
    let mut n = defaults.default_batch;

    // The prompt itself may be a JSON object overriding generation parameters
    if params.prompt.trim_start().starts_with('{') {
        if let Ok(overrides) = serde_json::from_str::<PromptOverride>(&params.prompt) {
            if let Some(prompt) = overrides.prompt {
                params.prompt = prompt;
                params.width = overrides.width.unwrap_or(params.width);
                params.height = overrides.height.unwrap_or(params.height);
                params.steps = overrides.steps.unwrap_or(params.steps);
                seed = overrides.seed.unwrap_or(seed);
                n = overrides.n.unwrap_or(n);
            }
        }
    }

    let n = state.scheduler.clamp(n);
    let seed = SeedSpec::from_request(seed);
    let model = request
        .model
        .unwrap_or_else(|| defaults.default_model.clone());
    let origin = public_origin(&state, &headers);

    if request.stream {
        let (tx, rx) = mpsc::channel::<std::result::Result<Event, Infallible>>(16);
        let scheduler = Arc::clone(&state.scheduler);
        tokio::spawn(async move {
            stream_generation(scheduler, request_id, model, params, seed, n, origin, tx).await;
        });
        return Ok(Sse::new(ReceiverStream::new(rx)).into_response());
    }

    match state.scheduler.run(&params, seed, n).await {
        Ok(results) => {
            info!(%request_id, results = results.len(), "batch completed");
            let content = assemble::markdown_gallery(&results, &origin);
            Ok(Json(assemble::chat_response(&request_id, &model, content)).into_response())
        }
        Err(e) => {
            error!(%request_id, "batch failed: {}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Generation failed: {e}"),
                "internal_error",
            ))
        }
    }
}

/// Progressive emitter: scheduling notices up front, the full gallery only
/// once the whole batch resolves, then the [DONE] terminator. The stream
/// terminates cleanly on both success and failure.
#[allow(clippy::too_many_arguments)]
async fn stream_generation(
    scheduler: Arc<BatchScheduler>,
    request_id: String,
    model: String,
    params: GenerationParams,
    seed: SeedSpec,
    n: usize,
    origin: String,
    tx: mpsc::Sender<std::result::Result<Event, Infallible>>,
) {
    send_chunk(
        &tx,
        &request_id,
        &model,
        format!("🚀 Queued {n} generation task(s)...\n"),
    )
    .await;

    if n > 1 {
        let mut notice = String::new();
        for i in 1..n {
            notice.push_str(&format!("\n- Task {}: staggered start", i + 1));
        }
        notice.push_str("\n\n");
        send_chunk(&tx, &request_id, &model, notice).await;
    }

    match scheduler.run(&params, seed, n).await {
        Ok(results) => {
            let content = assemble::markdown_gallery(&results, &origin);
            send_chunk(&tx, &request_id, &model, content).await;
        }
        Err(e) => {
            error!(%request_id, "streamed batch failed: {}", e);
            send_chunk(&tx, &request_id, &model, format!("\n\n❌ Generation failed: {e}")).await;
        }
    }

    let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
}

async fn send_chunk(
    tx: &mpsc::Sender<std::result::Result<Event, Infallible>>,
    request_id: &str,
    model: &str,
    content: String,
) {
    let chunk = assemble::chat_chunk(request_id, model, content);
    match serde_json::to_string(&chunk) {
        // A send error just means the client went away
        Ok(json) => {
            let _ = tx.send(Ok(Event::default().data(json))).await;
        }
        Err(e) => warn!("failed to serialize stream chunk: {}", e),
    }
}

pub async fn image_generations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ImageGenerationRequest>,
) -> Result<Response, ApiError> {
    check_auth(&state, &headers)?;

    let defaults = &state.config.generation;
    let mut width = defaults.default_width;
    let mut height = defaults.default_height;

    if let Some(size) = &request.size {
        if let Some((w, h)) = size.split_once('x') {
            if let (Ok(w), Ok(h)) = (w.parse(), h.parse()) {
                width = w;
                height = h;
            }
        }
    }

    let params = GenerationParams {
        prompt: request.prompt,
        width,
        height,
        steps: defaults.default_steps,
    };
    let n = request.n.unwrap_or(1);
    let seed = SeedSpec::from_request(request.seed.unwrap_or(-1));
    let origin = public_origin(&state, &headers);

    match state.scheduler.run(&params, seed, n).await {
        Ok(results) => Ok(Json(assemble::image_list(&results, &origin)).into_response()),
        Err(e) => {
            error!("image generation batch failed: {}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Generation failed: {e}"),
                "generation_failed",
            ))
        }
    }
}

/// Relays upstream media with hot-link-safe request headers and a sanitized
/// response: no CSP or frame-blocking headers, long-lived public caching,
/// cross-origin reads allowed. Other upstream headers (content type, etag,
/// last-modified) pass through untouched.
pub async fn proxy_image(
    State(state): State<AppState>,
    Query(query): Query<RelayQuery>,
) -> Response {
    match state.relay.fetch(&query.url).await {
        Ok(upstream) => {
            let status =
                StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::OK);
            let mut builder = Response::builder()
                .status(status)
                .header(header::CACHE_CONTROL, "public, max-age=31536000")
                .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");

            // Forward upstream headers except the frame/CSP blockers, the
            // ones we override above, and hop-by-hop transport headers
            let stripped = [
                header::CONTENT_SECURITY_POLICY,
                header::X_FRAME_OPTIONS,
                header::CACHE_CONTROL,
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                header::TRANSFER_ENCODING,
                header::CONNECTION,
            ];
            for (name, value) in upstream.headers() {
                if stripped.contains(name) {
                    continue;
                }
                builder = builder.header(name, value);
            }

            builder
                .body(Body::from_stream(upstream.bytes_stream()))
                .unwrap_or_else(|e| {
                    error!("failed to build relay response: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                })
        }
        Err(Error::RelayFetchFailed { status }) => {
            warn!(status, url = %query.url, "upstream media fetch rejected");
            (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                format!("Image relay failed: {status}"),
            )
                .into_response()
        }
        Err(e) => {
            error!("image relay error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Image relay error").into_response()
        }
    }
}

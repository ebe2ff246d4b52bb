//! Question answering: JSON and SSE streaming variants.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use activekg_core::retrieval::AskRequest;
use activekg_core::Telemetry;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::response::Response;
use axum::Json;
use futures::stream::Stream;
use tokio::sync::mpsc;

use crate::error::ApiResult;
use crate::rate_limit::InflightSlot;
use crate::state::AppState;

/// `POST /ask`
pub async fn ask(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<AskRequest>,
) -> ApiResult<Response> {
    let guarded = state.guard("ask", &headers, Some("search:read"), true).await?;
    state.note_cross_tenant(&guarded.ctx, body.tenant_id.as_deref(), "cross_tenant_body");

    let response = state
        .retrieval
        .ask(&guarded.ctx, body)
        .await
        .map_err(|e| state.err("ask", e))?;
    Ok(guarded.respond(Json(response)))
}

struct TokenStreamState {
    tokens: mpsc::Receiver<String>,
    started: Instant,
    first_recorded: bool,
    done: bool,
    telemetry: Telemetry,
    score_type: &'static str,
    /// Held until the stream finishes so the concurrency slot covers the
    /// whole response, not just the handler
    _slot: Option<InflightSlot>,
}

fn sse_stream(state: TokenStreamState) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(state, |mut st| async move {
        if st.done {
            st.telemetry
                .histogram_with(
                    "ask_latency_seconds",
                    &[("score_type", st.score_type), ("reranked", "false")],
                )
                .observe(st.started.elapsed());
            return None;
        }
        match st.tokens.recv().await {
            Some(token) => {
                if !st.first_recorded {
                    st.first_recorded = true;
                    st.telemetry
                        .histogram_with(
                            "ask_first_chunk_seconds",
                            &[("score_type", st.score_type)],
                        )
                        .observe(st.started.elapsed());
                }
                Some((Ok(Event::default().data(token)), st))
            }
            None => {
                st.done = true;
                Some((Ok(Event::default().data("[DONE]")), st))
            }
        }
    })
}

/// `POST /ask/stream`: SSE token stream terminated by `[DONE]`.
pub async fn ask_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<AskRequest>,
) -> ApiResult<Response> {
    let mut guarded = state
        .guard("ask_stream", &headers, Some("search:read"), true)
        .await?;
    state.note_cross_tenant(&guarded.ctx, body.tenant_id.as_deref(), "cross_tenant_body");

    let stream = state
        .retrieval
        .ask_stream(&guarded.ctx, body)
        .await
        .map_err(|e| state.err("ask_stream", e))?;

    let sse = Sse::new(sse_stream(TokenStreamState {
        tokens: stream.tokens,
        started: Instant::now(),
        first_recorded: false,
        done: false,
        telemetry: state.telemetry.clone(),
        score_type: stream.metadata.gating_score_type.as_str(),
        _slot: guarded.slot.take(),
    }));
    Ok(guarded.respond(sse))
}

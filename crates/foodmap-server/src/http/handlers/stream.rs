//! Stream-mode handler: run a job and push its events over SSE.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use foodmap_core::OptimizationRequest;
use futures_util::stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::gateway::ConsumptionMode;
use crate::http::responses::ApiError;
use crate::multiplexer::{ClientMessage, ClientStream};
use crate::state::AppState;

/// GET /api/optimize/stream - Run a job and stream its events.
pub async fn stream_job(
    State(state): State<Arc<AppState>>,
    query: Result<Query<OptimizationRequest>, QueryRejection>,
) -> Response {
    let req = match query {
        Ok(Query(req)) => req,
        Err(rejection) => {
            warn!(error = %rejection, "Invalid query string");
            return ApiError::InvalidQuery {
                message: rejection.body_text(),
            }
            .into_response();
        }
    };

    let valid = match state.gateway.validate(&req) {
        Ok(valid) => valid,
        Err(e) => {
            warn!(error = %e, "Rejected optimization request");
            return ApiError::from(e).into_response();
        }
    };

    info!(
        domain = %valid.domain,
        budget = valid.budget,
        relay = state.gateway.is_relay(),
        "Opening optimization stream"
    );
    let source = state.gateway.source(&valid, ConsumptionMode::Stream);
    let client = state.multiplexer.attach(source).await;

    Sse::new(sse_events(client)).into_response()
}

/// Map client messages to SSE frames: events as JSON `data:` lines,
/// keepalives as comments.
fn sse_events(client: ClientStream) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    client.into_stream().map(|message| {
        let event = match message {
            ClientMessage::Event(event) => match Event::default().json_data(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, message_type = event.kind(), "Failed to encode event");
                    Event::default().comment("encoding error")
                }
            },
            ClientMessage::KeepAlive => Event::default().comment("keepalive"),
        };
        Ok(event)
    })
}

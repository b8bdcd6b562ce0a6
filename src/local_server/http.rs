use std::sync::{Arc, Mutex};

use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    response::{Html, IntoResponse},
};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{AuthorizationResult, CallbackParams};

type ResultSender = oneshot::Sender<AuthorizationResult>;
pub(super) type SharedResultSender = Arc<Mutex<Option<ResultSender>>>;

#[derive(Clone)]
pub(super) struct CaptureState {
    pub(super) expected_state: Option<String>,
    pub(super) success_html: String,
    pub(super) error_html: String,
    pub(super) result_tx: SharedResultSender,
}

fn take_sender(result_tx: &SharedResultSender) -> Option<ResultSender> {
    result_tx.lock().ok().and_then(|mut guard| guard.take())
}

pub(super) async fn callback_handler(
    State(state): State<CaptureState>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    let CaptureState {
        expected_state,
        success_html,
        error_html,
        result_tx,
    } = state;

    let Some(sender) = take_sender(&result_tx) else {
        debug!("ignoring callback after capture completed");
        return (StatusCode::GONE, Html(error_html));
    };

    let params = CallbackParams::from_query(query.as_deref().unwrap_or_default());
    let result = params.into_result(expected_state.as_deref());

    let response = match &result {
        AuthorizationResult::Code(_) => {
            debug!("authorization code captured");
            (StatusCode::OK, Html(success_html))
        }
        AuthorizationResult::Error(reason) => {
            warn!(%reason, "authorization callback carried no code");
            (StatusCode::BAD_REQUEST, Html(error_html))
        }
        AuthorizationResult::StateMismatch { .. } => {
            warn!("authorization callback state did not match");
            (StatusCode::BAD_REQUEST, Html(error_html))
        }
        AuthorizationResult::TimedOut => (StatusCode::BAD_REQUEST, Html(error_html)),
    };

    let _ = sender.send(result);
    response
}

pub(super) async fn fallback_handler(State(state): State<CaptureState>) -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Html(state.error_html))
}

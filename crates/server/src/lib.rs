//! Guideline RAG Server
//!
//! Axum HTTP surface and the streaming session proxy that turns
//! generation output into a supervised SSE session.

pub mod http;
pub mod metrics;
pub mod proxy;
pub mod session;
pub mod sse;
pub mod state;

pub use http::create_router;
pub use metrics::{init_metrics, record_request, record_sse_event};
pub use proxy::ErrorKind;
pub use session::{ChatSession, SessionManager};
pub use sse::{FrameParser, ParsedFrame, SseEvent};
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Session(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Persistence(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

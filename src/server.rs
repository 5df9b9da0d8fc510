//! HTTP front end.
//!
//! Every path is handled by one fallback handler: the path names the account,
//! and the response is the rewritten feed in the configured format.

use crate::account::{AccountError, AccountPath};
use crate::feed::{self, BuildOptions, FeedFetcher, RenderedFeed};
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Shared per-process state handed to every request.
pub struct AppState {
    pub fetcher: FeedFetcher,
    pub build: BuildOptions,
    /// Bound on one request across all instance attempts.
    pub deadline: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AppError {
    #[error("Only GET supported")]
    MethodNotAllowed,
    #[error("Not found")]
    NotFound,
    #[error("Invalid user")]
    InvalidAccount,
    /// Every instance failed, or the request deadline passed.
    #[error("Couldn't get feed from any instances")]
    Unavailable,
}

impl From<AccountError> for AppError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::Favicon => AppError::NotFound,
            AccountError::Invalid => AppError::InvalidAccount,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::InvalidAccount => StatusCode::BAD_REQUEST,
            AppError::Unavailable => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, format!("{}\n", self)).into_response()
    }
}

/// Fetches and renders the feed named by `path`.
///
/// Shared by the HTTP handler and the one-shot command-line mode.
pub async fn fetch_account(state: &AppState, path: &str) -> Result<RenderedFeed, AppError> {
    let account = AccountPath::extract(path)?;
    let options = &state.build;

    let fetch = state.fetcher.fetch(&account, |_, bytes| {
        feed::process(&bytes, &account, options)
    });

    match tokio::time::timeout(state.deadline, fetch).await {
        Ok(Ok(outcome)) => Ok(outcome.value),
        Ok(Err(e)) => {
            tracing::warn!(account = %account, error = %e, "Couldn't get feed");
            Err(AppError::Unavailable)
        }
        Err(_) => {
            tracing::warn!(
                account = %account,
                deadline = ?state.deadline,
                "Request deadline exceeded"
            );
            Err(AppError::Unavailable)
        }
    }
}

async fn handle(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
) -> Result<Response, AppError> {
    tracing::debug!(method = %method, path = %uri.path(), "Request");
    if method != Method::GET {
        return Err(AppError::MethodNotAllowed);
    }

    let rendered = fetch_account(&state, uri.path()).await?;
    Ok((
        [(header::CONTENT_TYPE, rendered.content_type)],
        rendered.body,
    )
        .into_response())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().fallback(handle).with_state(state)
}

/// Serves on an already-bound listener until `shutdown` turns true (or its
/// sender is dropped). In-flight requests are allowed to finish.
pub async fn serve_on(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "Listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            // An Err means the sender is gone, which is shutdown too.
            let _ = shutdown.wait_for(|&stop| stop).await;
            tracing::info!("Server shutting down");
        })
        .await
}

pub async fn serve(
    addr: &str,
    state: Arc<AppState>,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, state, shutdown).await
}

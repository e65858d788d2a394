// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ripple demo service: streams a server-rendered page, then out-of-band
//! updates, over one chunked HTTP response.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use futures_util::stream;
use ripple_config::{ConfigService, FsConfigStore, ServicePrefs, SERVICE_PREFS_KEY};
use ripple_core::{framing, CoordinatorOptions, FlushCoordinator};
use ripple_proto::{ENHANCED_NAV_HEADER, FRAMING_HEADER};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod demo;

use demo::{DemoEngine, Outcome, ROOT};

/// Pipe capacity between the coordinator and the response body.
const PIPE_BYTES: usize = 16 * 1024;

#[derive(Parser, Debug)]
#[command(author, version, about = "Ripple streaming render demo service")]
struct Args {
    /// TCP listener (overrides the saved prefs)
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// Put the full error chain into error frames
    #[arg(long)]
    verbose_diagnostics: bool,
    /// Delay before the demo table resolves, in milliseconds
    #[arg(long)]
    update_delay_ms: Option<u64>,
    /// Ignore the saved prefs file
    #[arg(long)]
    no_config: bool,
    /// Write the effective settings back to the prefs file
    #[arg(long)]
    save_prefs: bool,
}

impl Args {
    /// Command-line flags take precedence over saved prefs.
    fn apply(&self, mut prefs: ServicePrefs) -> ServicePrefs {
        if let Some(listen) = self.listen {
            prefs.listen = listen.to_string();
        }
        if self.verbose_diagnostics {
            prefs.verbose_diagnostics = true;
        }
        if let Some(delay) = self.update_delay_ms {
            prefs.update_delay_ms = delay;
        }
        prefs
    }
}

#[derive(Debug, Clone)]
struct AppState {
    update_delay: Duration,
    options: CoordinatorOptions,
}

impl AppState {
    fn from_prefs(prefs: &ServicePrefs) -> Self {
        Self {
            update_delay: Duration::from_millis(prefs.update_delay_ms),
            options: CoordinatorOptions {
                verbose_diagnostics: prefs.verbose_diagnostics,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    #[serde(default)]
    outcome: Outcome,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = if args.no_config {
        None
    } else {
        match FsConfigStore::new() {
            Ok(store) => {
                debug!(dir = %store.base().display(), "config store ready");
                Some(ConfigService::new(store))
            }
            Err(err) => {
                warn!(%err, "config store unavailable; using defaults");
                None
            }
        }
    };
    let saved: ServicePrefs = config
        .as_ref()
        .map_or_else(ServicePrefs::default, |svc| {
            svc.load_or_default(SERVICE_PREFS_KEY)
        });
    let prefs = args.apply(saved);
    if args.save_prefs {
        if let Some(svc) = &config {
            svc.save(SERVICE_PREFS_KEY, &prefs)
                .context("save service prefs")?;
            info!("prefs saved");
        }
    }

    let addr: SocketAddr = prefs
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {:?}", prefs.listen))?;
    let app = router(AppState::from_prefs(&prefs));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, delay_ms = prefs.update_delay_ms, "ripple service listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("ripple service stopped");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(page))
        .with_state(Arc::new(state))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
}

async fn page(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
) -> Response {
    let enhanced = framing::is_enhanced_request(
        headers
            .get(ENHANCED_NAV_HEADER)
            .and_then(|v| v.to_str().ok()),
    );
    let token = framing::negotiate(enhanced);

    let engine = match DemoEngine::new() {
        Ok(engine) => engine,
        Err(err) => {
            error!(%err, "demo tree rejected");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let mut coordinator = FlushCoordinator::new(state.options);
    if let Err(err) = coordinator.arm(Some(token.clone())) {
        error!(%err, "coordinator refused to arm");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let (writer, reader) = tokio::io::duplex(PIPE_BYTES);
    let (tx, rx) = mpsc::channel(8);
    let delay = state.update_delay;
    let outcome = query.outcome;
    tokio::spawn(async move {
        let streaming = coordinator.begin_streaming(writer, &engine, ROOT, rx);
        let (result, ()) = tokio::join!(streaming, engine.drive(tx, delay, outcome));
        match result {
            Ok(termination) => info!(?termination, "response finished"),
            Err(err) => warn!(%err, "response ended with error"),
        }
    });

    let mut response = Response::new(Body::from_stream(body_chunks(reader)));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    if !token.is_empty() {
        if let Ok(value) = HeaderValue::from_str(token.as_str()) {
            response.headers_mut().insert(FRAMING_HEADER, value);
        }
    }
    response
}

/// Turns the read half of the pipe into body chunks, one per read.
fn body_chunks<R>(reader: R) -> impl futures_util::Stream<Item = io::Result<Bytes>> + Send
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = vec![0u8; PIPE_BYTES];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(reader)))
            }
            Err(err) => Some((Err(err), None)),
        }
    })
}

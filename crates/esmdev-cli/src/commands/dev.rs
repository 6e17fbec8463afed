//! `esmdev dev` command implementation.
//!
//! Serves ES modules on demand through the dev context, static files from
//! the project root, and HMR payloads over a WebSocket:
//!
//! ```text
//! GET /__hmr          → WebSocket: connected, reload, update, error
//! GET /src/App.js     → resolve → load → transform → rewrite
//! GET /logo.svg       → static file
//! ```

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use esmdev_core::{error_module, DevConfig, DevContext, HmrPayload, HMR_SOCKET_PATH};
use miette::{IntoDiagnostic, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

type AppState = Arc<DevContext>;

/// Run the dev server until Ctrl-C.
pub async fn run(config: DevConfig) -> Result<()> {
    let ctx = Arc::new(DevContext::new(config, Vec::new()).into_diagnostic()?);
    let config = ctx.config().clone();

    let (change_tx, mut change_rx) = mpsc::channel::<Vec<PathBuf>>(16);
    let watcher = if config.hmr {
        Some(crate::watch::spawn(ctx.root(), config.out_dir(), change_tx)?)
    } else {
        None
    };

    let change_ctx = ctx.clone();
    tokio::spawn(async move {
        while let Some(changed) = change_rx.recv().await {
            for path in changed {
                println!(
                    "  File changed: {}",
                    crate::display_relative(change_ctx.root(), &path)
                );
                change_ctx.on_file_change(&path);
            }
        }
    });

    let mut app = Router::new()
        .route(HMR_SOCKET_PATH, get(hmr_websocket))
        .fallback(serve)
        .with_state(ctx.clone());
    if config.cors {
        app = app.layer(CorsLayer::permissive());
    }

    let host_ip = if config.host == "localhost" {
        "127.0.0.1"
    } else {
        config.host.as_str()
    };
    let addr: SocketAddr = format!("{host_ip}:{}", config.port)
        .parse()
        .into_diagnostic()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;

    let url = format!("http://{}:{}", config.host, config.port);
    println!();
    println!("  Dev server running at {url}");
    if config.hmr {
        println!("  Hot Module Replacement enabled");
    }
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    if config.open_browser {
        if let Err(e) = open_browser(&url) {
            warn!(error = %e, "failed to open browser");
        }
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;

    drop(watcher);
    for e in ctx.close().await {
        warn!(error = %e, "close hook failed");
    }
    info!("dev server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Request URL the dev context should serve; `/` is the index page.
fn module_url(uri: &Uri) -> String {
    let path = if uri.path() == "/" {
        "/index.html"
    } else {
        uri.path()
    };
    match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    }
}

/// Serve a module through the pipeline, falling back to static files.
async fn serve(State(ctx): State<AppState>, request: Request) -> Response {
    let url = module_url(request.uri());
    match ctx.serve_module(&url).await {
        Ok(Some(module)) => (
            [
                (header::CONTENT_TYPE, module.content_type()),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            module.contents,
        )
            .into_response(),
        Ok(None) => match ServeDir::new(ctx.root()).try_call(request).await {
            Ok(response) => response.into_response(),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        },
        Err(e) => {
            ctx.report_error(&url, &e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "application/javascript")],
                error_module(&e),
            )
                .into_response()
        }
    }
}

async fn hmr_websocket(ws: WebSocketUpgrade, State(ctx): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_hmr_socket(socket, ctx))
}

/// Forward broadcasts to one client and apply its messages.
async fn handle_hmr_socket(mut socket: WebSocket, ctx: AppState) {
    let mut rx = ctx.hmr().subscribe();
    if socket
        .send(Message::Text(HmrPayload::Connected.to_json()))
        .await
        .is_err()
    {
        return;
    }
    debug!(clients = ctx.hmr().client_count(), "hmr client connected");

    loop {
        tokio::select! {
            payload = rx.recv() => {
                let payload = match payload {
                    Ok(payload) => payload,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "hmr client fell behind, reloading it");
                        HmrPayload::Reload
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Err(e) = socket.send(Message::Text(payload.to_json())).await {
                    debug!(error = %e, "hmr client went away");
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => ctx.handle_client_message(&text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "hmr socket error");
                    break;
                }
            },
        }
    }
}

fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", url])
            .spawn()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_url() {
        assert_eq!(module_url(&Uri::from_static("/")), "/index.html");
        assert_eq!(module_url(&Uri::from_static("/src/a.js?t=1")), "/src/a.js?t=1");
        assert_eq!(
            module_url(&Uri::from_static("/fs?namespace=node-builtins")),
            "/fs?namespace=node-builtins"
        );
    }

    #[tokio::test]
    async fn test_serves_modules_and_static_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.js"), "import './b.js';").unwrap();
        std::fs::write(dir.path().join("src/b.js"), "export {}").unwrap();
        std::fs::write(dir.path().join("logo.svg"), "<svg/>").unwrap();

        let mut config = DevConfig::new(dir.path().to_path_buf());
        config.entries = vec!["src/a.js".into()];
        let ctx = Arc::new(DevContext::new(config, Vec::new()).unwrap());

        let module = serve(
            State(ctx.clone()),
            Request::builder()
                .uri("/src/a.js")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(module.status(), StatusCode::OK);
        assert_eq!(
            module.headers()[header::CONTENT_TYPE],
            "application/javascript; charset=utf-8"
        );

        let asset = serve(
            State(ctx.clone()),
            Request::builder()
                .uri("/logo.svg")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(asset.status(), StatusCode::OK);

        let missing = serve(
            State(ctx),
            Request::builder()
                .uri("/nope.png")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_failed_module_is_500_and_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("src/a.js"), "import 'pkg';").unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "export {}").unwrap();

        let mut config = DevConfig::new(dir.path().to_path_buf());
        config.entries = vec!["src/a.js".into()];
        config.prebundle.esbuild = dir.path().join("no-esbuild").display().to_string();
        let ctx = Arc::new(DevContext::new(config, Vec::new()).unwrap());
        let mut rx = ctx.hmr().subscribe();

        let response = serve(
            State(ctx),
            Request::builder()
                .uri("/src/a.js")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(rx.recv().await.unwrap(), HmrPayload::Error { .. }));
    }
}

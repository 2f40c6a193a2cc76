// Canned HTTP endpoints for adapter tests

use axum::{extract::Request, http::header::CONTENT_TYPE, http::StatusCode, response::IntoResponse, Router};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}

/// Answer every request with `status` and `body`; the handle yields the
/// first request's method, path and headers
pub async fn respond_once(status: u16, body: &str) -> (SocketAddr, JoinHandle<String>) {
    let (tx, rx) = oneshot::channel();
    let tx = Arc::new(Mutex::new(Some(tx)));
    let status = StatusCode::from_u16(status).unwrap();
    let body = body.to_string();

    let app = Router::new().fallback(move |request: Request| async move {
        let mut head = format!("{} {}", request.method(), request.uri().path());
        for (name, value) in request.headers() {
            head.push_str(&format!("\n{}: {}", name, value.to_str().unwrap_or("")));
        }
        if let Some(tx) = tx.lock().unwrap().take() {
            let _ = tx.send(head);
        }
        (status, [(CONTENT_TYPE, "application/json")], body).into_response()
    });

    let addr = serve(app).await;
    (addr, tokio::spawn(async move { rx.await.unwrap_or_default() }))
}

/// Accepts requests and never answers in time
pub async fn silent() -> (SocketAddr, JoinHandle<()>) {
    let app = Router::new().fallback(|| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        StatusCode::OK
    });
    let addr = serve(app).await;
    (addr, tokio::spawn(async {}))
}

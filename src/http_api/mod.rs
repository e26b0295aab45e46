//! ヘルスチェック + メトリクス HTTP API
//!
//! エンドポイント:
//! - `GET /`            認証不要のヘルスチェック
//! - `GET /health`      Bearerトークン必須。バックエンド名と稼働セッション数を返す
//! - `GET /auth/test`   Bearerトークン必須。検証済みユーザ情報を返す
//! - `GET <scrape_path>` Prometheus テキスト形式
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::service::Service;
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::Identity;
use crate::session::{timestamp_now, BridgeContext};

const SERVICE_NAME: &str = "transcription-bridge";

#[derive(Clone)]
struct App {
    context: Arc<BridgeContext>,
    scrape_path: Arc<str>,
}

impl App {
    fn new(context: Arc<BridgeContext>, scrape_path: &str) -> Self {
        Self {
            context,
            scrape_path: Arc::from(scrape_path),
        }
    }
}

impl Service<Request<Body>> for App {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let app = self.clone();
        async move { Ok(route(app, req).await) }.boxed()
    }
}

async fn route(app: App, req: Request<Body>) -> Response<Body> {
    if *req.method() != Method::GET {
        return json_response(StatusCode::NOT_FOUND, json!({ "error": "not found" }));
    }

    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string);
    let path = req.uri().path().to_string();

    match path.as_str() {
        "/" => handle_root(&app),
        "/health" => match authenticate(&app, token).await {
            Ok(identity) => handle_health(&app, &identity),
            Err(resp) => resp,
        },
        "/auth/test" => match authenticate(&app, token).await {
            Ok(identity) => handle_auth_test(&identity),
            Err(resp) => resp,
        },
        p if p == &*app.scrape_path => handle_metrics(&app),
        _ => json_response(StatusCode::NOT_FOUND, json!({ "error": "not found" })),
    }
}

fn handle_root(app: &App) -> Response<Body> {
    json_response(
        StatusCode::OK,
        json!({
            "status": "healthy",
            "service": SERVICE_NAME,
            "features": {
                "websocket": true,
                "authentication": true,
                "recognition_backend": app.context.backend.name(),
            },
            "timestamp": timestamp_now(),
        }),
    )
}

fn handle_health(app: &App, identity: &Identity) -> Response<Body> {
    json_response(
        StatusCode::OK,
        json!({
            "status": "healthy",
            "service": SERVICE_NAME,
            "backend": app.context.backend.name(),
            "active_sessions": app.context.metrics.sessions_active.get(),
            "authenticated_user": identity.email,
            "timestamp": timestamp_now(),
        }),
    )
}

fn handle_auth_test(identity: &Identity) -> Response<Body> {
    json_response(
        StatusCode::OK,
        json!({
            "message": "Authentication successful",
            "user": {
                "uid": identity.uid,
                "email": identity.email,
                "name": identity.name,
            },
        }),
    )
}

fn handle_metrics(app: &App) -> Response<Body> {
    match app.context.metrics.render() {
        Ok(text) => {
            let mut resp = Response::new(Body::from(text));
            resp.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"));
            resp
        }
        Err(e) => {
            error!(error = %e, "failed to render metrics");
            json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "metrics unavailable" }))
        }
    }
}

/// `Authorization: Bearer <token>` を検証
async fn authenticate(app: &App, token: Option<String>) -> Result<Identity, Response<Body>> {
    let token = token.ok_or_else(|| {
        json_response(
            StatusCode::UNAUTHORIZED,
            json!({ "error": "Missing or invalid authorization header" }),
        )
    })?;

    app.context.verifier.verify(&token).await.map_err(|e| {
        warn!(error = %e, "http authentication failed");
        json_response(StatusCode::UNAUTHORIZED, json!({ "error": "Invalid or unauthorized token" }))
    })
}

fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn json_response(status: StatusCode, body: Value) -> Response<Body> {
    let mut resp = Response::new(Body::from(body.to_string()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

/// 指定アドレスへHTTPサーバをバインドして起動
pub async fn serve_http(
    bind_addr: &str,
    context: Arc<BridgeContext>,
    scrape_path: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = App::new(context, scrape_path);
    let make_svc = hyper::service::make_service_fn(move |_| {
        let app = app.clone();
        async move { Ok::<_, Infallible>(app) }
    });
    let addr: SocketAddr = bind_addr.parse()?;
    info!(%addr, "HTTP API listening");
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}

/// 既存の `TcpListener` を用いてHTTPサーバを起動
pub async fn serve_http_with_listener(
    listener: TcpListener,
    context: Arc<BridgeContext>,
    scrape_path: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = App::new(context, scrape_path);
    let make_svc = hyper::service::make_service_fn(move |_| {
        let app = app.clone();
        async move { Ok::<_, Infallible>(app) }
    });
    let local = listener.local_addr()?;
    info!(%local, "HTTP API listening");
    Server::from_tcp(listener.into_std()?)?.serve(make_svc).await?;
    Ok(())
}

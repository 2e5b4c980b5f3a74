//! HTTP surface for the LabControl daemon.
//!
//! A thin hyper service in front of the dispatcher. The path-style API under
//! [`API_PREFIX`](crate::dispatch::API_PREFIX) answers with a JSON envelope
//! (`{"result": "success", "data": ...}` or `{"result": "fail", "message":
//! ...}`); the legacy form endpoint at `/lcserver` keeps its original
//! plain-text `OK`/`FAIL` framing.
//!
//! Each request is handled in its own task so a panicking handler produces a
//! generic failure response instead of tearing down the connection. Panics
//! and internal (storage, config, serialization) faults are appended to the
//! fault log under the data dir.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use lc_core::error::LcError;
use lc_core::stamp;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use crate::dispatch::{self, API_PREFIX};
use crate::{auth, legacy, AppContext};

/// Bind and serve until a shutdown signal arrives.
pub async fn serve(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let addr = SocketAddr::new(ctx.settings.bind_address, ctx.settings.port);

    let make_svc = make_service_fn(move |_conn| {
        let ctx = ctx.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let ctx = ctx.clone();
                async move { Ok::<_, Infallible>(entry(ctx, req).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    tracing::info!(%addr, "labcontrol daemon listening");

    server
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

/// Per-request entry point. Runs the handler in a spawned task so that a
/// panic is contained to one request.
pub async fn entry(ctx: Arc<AppContext>, req: Request<Body>) -> Response<Body> {
    let fault_log = ctx.settings.fault_log_path();
    match tokio::spawn(handle(ctx, req)).await {
        Ok(response) => response,
        Err(join_err) => {
            append_fault(&fault_log, &format!("request handler panicked: {}", join_err)).await;
            json_fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error while processing request",
            )
        }
    }
}

async fn handle(ctx: Arc<AppContext>, req: Request<Body>) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let body = match hyper::body::to_bytes(body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return json_fail(
                StatusCode::BAD_REQUEST,
                &format!("failed to read request body: {}", e),
            );
        }
    };

    let path = parts.uri.path().to_string();
    if path == "/lcserver" {
        return handle_legacy(&ctx, &parts.method, &body).await;
    }
    if path.starts_with(API_PREFIX) {
        return handle_api(&ctx, &parts, &path, &body).await;
    }
    json_fail(StatusCode::NOT_FOUND, &format!("unknown path '{}'", path))
}

async fn handle_api(
    ctx: &AppContext,
    parts: &hyper::http::request::Parts,
    path: &str,
    body: &[u8],
) -> Response<Body> {
    let method = match parts.method {
        hyper::Method::GET => dispatch::Method::Get,
        hyper::Method::POST => dispatch::Method::Post,
        ref other => {
            return json_fail(
                StatusCode::METHOD_NOT_ALLOWED,
                &format!("unsupported method '{}'", other),
            );
        }
    };

    let auth_header = parts
        .headers
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let caller = match auth::identify(&ctx.store, auth_header).await {
        Ok(caller) => caller,
        Err(e) => return error_response(ctx, &e).await,
    };

    match dispatch::dispatch(ctx, method, path, caller.as_deref(), body).await {
        Ok(data) => json_success(data),
        Err(e) => error_response(ctx, &e).await,
    }
}

async fn handle_legacy(
    ctx: &AppContext,
    method: &hyper::Method,
    body: &[u8],
) -> Response<Body> {
    if *method != hyper::Method::POST {
        return text_response("FAIL\nlegacy endpoint requires POST\n");
    }
    match legacy::handle(ctx, body).await {
        Ok(text) => text_response(&format!("OK\n{}", text)),
        Err(e) => {
            if is_internal(&e) {
                append_fault(&ctx.settings.fault_log_path(), &e.to_string()).await;
            }
            text_response(&format!("FAIL\n{}\n", e))
        }
    }
}

fn is_internal(err: &LcError) -> bool {
    matches!(
        err,
        LcError::Storage(_) | LcError::Json(_) | LcError::Config(_)
    )
}

fn status_for(err: &LcError) -> StatusCode {
    match err {
        LcError::Validation(_) => StatusCode::BAD_REQUEST,
        LcError::NotFound(_) => StatusCode::NOT_FOUND,
        LcError::Permission(_) => StatusCode::FORBIDDEN,
        LcError::Conflict(_) => StatusCode::CONFLICT,
        LcError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        LcError::Execution(_) | LcError::Storage(_) | LcError::Json(_) | LcError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn error_response(ctx: &AppContext, err: &LcError) -> Response<Body> {
    if is_internal(err) {
        append_fault(&ctx.settings.fault_log_path(), &err.to_string()).await;
    }
    json_fail(status_for(err), &err.to_string())
}

fn json_success(data: Value) -> Response<Body> {
    json_response(StatusCode::OK, &json!({ "result": "success", "data": data }))
}

fn json_fail(status: StatusCode, message: &str) -> Response<Body> {
    json_response(status, &json!({ "result": "fail", "message": message }))
}

fn json_response(status: StatusCode, value: &Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(value.to_string()))
        .unwrap_or_default()
}

fn text_response(text: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(text.to_string()))
        .unwrap_or_default()
}

/// Append one timestamped line to the fault log. Failures here are logged
/// and swallowed; the fault log must never take a request down with it.
async fn append_fault(path: &Path, message: &str) {
    let line = format!("{} {}\n", stamp::now(), message);
    match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
    {
        Ok(mut file) => {
            if let Err(e) = file.write_all(line.as_bytes()).await {
                tracing::error!(error = %e, "failed writing fault log");
            }
        }
        Err(e) => tracing::error!(error = %e, path = %path.display(), "failed opening fault log"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lc_core::config::Settings;
    use lc_core::model::EntityType;

    async fn test_ctx(dir: &std::path::Path) -> Arc<AppContext> {
        let settings = Settings {
            data_dir: dir.to_path_buf(),
            ..Settings::default()
        };
        let ctx = AppContext::new(settings).unwrap();
        ctx.store
            .save(
                EntityType::Board,
                "bbb",
                &json!({ "name": "bbb", "host": "lab1" }),
            )
            .await
            .unwrap();
        ctx
    }

    async fn body_json(response: Response<Body>) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn body_text(response: Response<Body>) -> (StatusCode, String) {
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn api_success_uses_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path()).await;

        let req = Request::get("/api/v0.2/devices")
            .body(Body::empty())
            .unwrap();
        let (status, value) = body_json(entry(ctx, req).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["result"], "success");
        assert_eq!(value["data"], json!(["bbb"]));
    }

    #[tokio::test]
    async fn unknown_board_maps_to_404() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path()).await;

        let req = Request::get("/api/v0.2/devices/ghost")
            .body(Body::empty())
            .unwrap();
        let (status, value) = body_json(entry(ctx, req).await).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(value["result"], "fail");
    }

    #[tokio::test]
    async fn gated_action_without_token_is_403() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path()).await;

        let req = Request::get("/api/v0.2/devices/bbb/assign")
            .body(Body::empty())
            .unwrap();
        let (status, value) = body_json(entry(ctx, req).await).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(value["result"], "fail");
    }

    #[tokio::test]
    async fn bad_token_is_403_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path()).await;

        let req = Request::get("/api/v0.2/devices")
            .header(hyper::header::AUTHORIZATION, "token wrong")
            .body(Body::empty())
            .unwrap();
        let (status, _) = body_json(entry(ctx, req).await).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path()).await;

        let req = Request::get("/totally/else").body(Body::empty()).unwrap();
        let (status, value) = body_json(entry(ctx, req).await).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(value["result"], "fail");
    }

    #[tokio::test]
    async fn unsupported_method_is_405() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path()).await;

        let req = Request::delete("/api/v0.2/devices")
            .body(Body::empty())
            .unwrap();
        let (status, _) = body_json(entry(ctx, req).await).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn legacy_keeps_plain_text_framing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path()).await;

        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("action", "get_board")
            .append_pair("board", "bbb")
            .finish();
        let req = Request::post("/lcserver").body(Body::from(form)).unwrap();
        let (status, text) = body_text(entry(ctx.clone(), req).await).await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.starts_with("OK\n"));

        // failures are framed, not surfaced as HTTP errors
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("action", "get_board")
            .append_pair("board", "ghost")
            .finish();
        let req = Request::post("/lcserver").body(Body::from(form)).unwrap();
        let (status, text) = body_text(entry(ctx, req).await).await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.starts_with("FAIL\n"));
    }
}

//! End-to-end exercises of the HTTP surface against a scratch data dir.
//!
//! These go through `http::entry` (the same code path the hyper service
//! runs), so envelope framing, auth, dispatch and storage are all covered
//! together without binding a socket.

use std::sync::Arc;

use hyper::{Body, Request, Response, StatusCode};
use lc_core::config::Settings;
use lc_core::model::EntityType;
use lc_server::{http, AppContext};
use serde_json::{json, Value};

async fn test_ctx(dir: &std::path::Path) -> Arc<AppContext> {
    let settings = Settings {
        data_dir: dir.to_path_buf(),
        run_timeout_secs: 5,
        stop_poll_interval_ms: 20,
        ..Settings::default()
    };
    let ctx = AppContext::new(settings).unwrap();

    ctx.store
        .save(
            EntityType::Board,
            "bbb",
            &json!({
                "name": "bbb",
                "host": "lab1",
                "power_controller": "pdu1",
                "run_cmd": "sh -c {command}"
            }),
        )
        .await
        .unwrap();
    ctx.store
        .save(
            EntityType::Resource,
            "pdu1",
            &json!({
                "name": "pdu1",
                "type": "power_controller",
                "board": "bbb",
                "commands": {
                    "status": "echo power-is-on",
                    "on": "echo turned-on",
                    "off": "echo turned-off",
                    "reboot": "echo rebooted"
                }
            }),
        )
        .await
        .unwrap();
    ctx.store
        .save(
            EntityType::Resource,
            "meter0",
            &json!({
                "name": "meter0",
                "type": "power_measurement",
                "board": "bbb",
                "commands": { "capture": "sleep 60" }
            }),
        )
        .await
        .unwrap();
    ctx.store
        .save(
            EntityType::User,
            "alice",
            &json!({ "name": "alice", "token": "s3cret" }),
        )
        .await
        .unwrap();
    ctx
}

async fn get(ctx: &Arc<AppContext>, path: &str, token: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::get(path);
    if let Some(token) = token {
        builder = builder.header(hyper::header::AUTHORIZATION, format!("token {}", token));
    }
    let req = builder.body(Body::empty()).unwrap();
    envelope(http::entry(ctx.clone(), req).await).await
}

async fn post(
    ctx: &Arc<AppContext>,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::post(path);
    if let Some(token) = token {
        builder = builder.header(hyper::header::AUTHORIZATION, format!("token {}", token));
    }
    let body = body.map(|v| Body::from(v.to_string())).unwrap_or_default();
    let req = builder.body(body).unwrap();
    envelope(http::entry(ctx.clone(), req).await).await
}

async fn envelope(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn device_listing_and_record() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx(dir.path()).await;

    let (status, value) = get(&ctx, "/api/v0.2/devices", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["data"], json!(["bbb"]));

    let (status, value) = get(&ctx, "/api/v0.2/devices/bbb", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["data"]["host"], "lab1");
}

#[tokio::test]
async fn reservation_lifecycle_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx(dir.path()).await;

    // anonymous assign is refused
    let (status, _) = get(&ctx, "/api/v0.2/devices/bbb/assign", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, value) = get(&ctx, "/api/v0.2/devices/bbb/assign", Some("s3cret")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["data"]["AssignedTo"], "alice");

    // mine reflects the reservation
    let (status, value) = get(&ctx, "/api/v0.2/devices/mine", Some("s3cret")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["data"], json!(["bbb"]));

    // double assign is refused, even for the holder
    let (status, _) = get(&ctx, "/api/v0.2/devices/bbb/assign", Some("s3cret")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, value) = get(&ctx, "/api/v0.2/devices/bbb/release", Some("s3cret")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["data"]["AssignedTo"], "nobody");
}

#[tokio::test]
async fn power_actions_resolve_and_execute() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx(dir.path()).await;

    let (status, value) = get(&ctx, "/api/v0.2/devices/bbb/power/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(value["data"]["output"]
        .as_str()
        .unwrap()
        .contains("power-is-on"));

    let (status, value) = get(&ctx, "/api/v0.2/devices/bbb/power/reboot", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(value["data"]["output"].as_str().unwrap().contains("rebooted"));

    let (status, _) = get(&ctx, "/api/v0.2/devices/bbb/power/explode", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn run_requires_post_auth_and_command() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx(dir.path()).await;

    let (status, _) = get(&ctx, "/api/v0.2/devices/bbb/run", Some("s3cret")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        &ctx,
        "/api/v0.2/devices/bbb/run",
        None,
        Some(json!({ "command": "true" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, value) = post(
        &ctx,
        "/api/v0.2/devices/bbb/run",
        Some("s3cret"),
        Some(json!({ "command": "echo ran-it" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(value["data"]["output"].as_str().unwrap().contains("ran-it"));
}

#[tokio::test]
async fn resource_lookup_by_kind() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx(dir.path()).await;

    let (status, value) = get(
        &ctx,
        "/api/v0.2/devices/bbb/get_resource/power_controller",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["data"]["resource"], "pdu1");

    let (status, _) = get(&ctx, "/api/v0.2/devices/bbb/get_resource/serial", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn capture_session_full_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx(dir.path()).await;

    let (status, value) = post(
        &ctx,
        "/api/v0.2/resources/meter0/power_measurement/start_capture",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = value["data"]["token"].as_str().unwrap().to_string();
    assert!(token.starts_with("meter0-"));

    // a second start on the same resource conflicts
    let (status, _) = post(
        &ctx,
        "/api/v0.2/resources/meter0/power_measurement/start_capture",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let stop_path = format!(
        "/api/v0.2/resources/meter0/power_measurement/stop_capture/{}",
        token
    );
    let (status, _) = post(&ctx, &stop_path, None, None).await;
    assert_eq!(status, StatusCode::OK);

    // simulate recorded samples, then check they come back normalized
    let log_path = dir
        .path()
        .join("captures")
        .join(format!("capture-{}.log", token));
    std::fs::write(&log_path, "1690000000,5000,250\n").unwrap();

    let data_path = format!(
        "/api/v0.2/resources/meter0/power_measurement/get-data/{}",
        token
    );
    let (status, value) = get(&ctx, &data_path, None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = value["data"].as_array().unwrap();
    assert_eq!(rows[0]["timestamp"], "1690000000");
    assert_eq!(rows[0]["voltage"], 5.0);
    assert_eq!(rows[0]["current"], 0.25);

    let delete_path = format!(
        "/api/v0.2/resources/meter0/power_measurement/delete/{}",
        token
    );
    let (status, _) = post(&ctx, &delete_path, None, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = get(&ctx, &data_path, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn kind_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx(dir.path()).await;

    // pdu1 is a power controller, not a serial resource
    let (status, _) = post(&ctx, "/api/v0.2/resources/pdu1/serial/start_capture", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

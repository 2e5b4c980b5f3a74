//! Action-path dispatcher.
//!
//! Parses a versioned path into `(entity type, entity name, action,
//! arguments)` and routes to the reservation manager, the command executor
//! or the capture manager. Actions are explicit enums with exhaustive
//! matches; an unknown entity type, unknown name, unknown action or missing
//! argument yields a structured failure, never a fault.

use std::time::Duration;

use lc_core::error::{LcError, LcResult};
use lc_core::model::{merged_attrs, Board, CommandKind, EntityType, Resource, ResourceKind};
use lc_core::template;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::capture::CaptureManager;
use crate::{auth, executor, reservation, AppContext};

/// Fixed API version prefix all dispatched paths share.
pub const API_PREFIX: &str = "/api/v0.2";

/// HTTP method, reduced to what the dispatcher distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Method {
    Get,
    Post,
}

/// Power sub-operations on a board's power controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum PowerOp {
    Status,
    On,
    Off,
    Reboot,
}

impl PowerOp {
    fn parse(s: &str) -> LcResult<Self> {
        match s {
            "status" => Ok(PowerOp::Status),
            "on" => Ok(PowerOp::On),
            "off" => Ok(PowerOp::Off),
            "reboot" => Ok(PowerOp::Reboot),
            other => Err(LcError::Validation(format!(
                "unknown power operation '{}'",
                other
            ))),
        }
    }

    fn command_kind(self) -> CommandKind {
        match self {
            PowerOp::Status => CommandKind::Status,
            PowerOp::On => CommandKind::On,
            PowerOp::Off => CommandKind::Off,
            PowerOp::Reboot => CommandKind::Reboot,
        }
    }
}

/// Actions addressable on a specific board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceAction {
    Power(PowerOp),
    Assign,
    Release { force: bool },
    Run,
    GetResource,
}

/// Kind-specific operations addressable on a specific resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceOp {
    StartCapture,
    StopCapture,
    GetData,
    Delete,
    PutData,
    SetConfig,
}

impl ResourceOp {
    fn parse(s: &str) -> LcResult<Self> {
        match s {
            "start_capture" => Ok(ResourceOp::StartCapture),
            "stop_capture" => Ok(ResourceOp::StopCapture),
            "get-data" => Ok(ResourceOp::GetData),
            "delete" => Ok(ResourceOp::Delete),
            "put-data" => Ok(ResourceOp::PutData),
            "set-config" => Ok(ResourceOp::SetConfig),
            other => Err(LcError::Validation(format!(
                "unknown resource operation '{}'",
                other
            ))),
        }
    }
}

/// Dispatch one API request. Returns the success `data` value; every failure
/// is an `LcError` converted to a structured response by the HTTP layer.
pub async fn dispatch(
    ctx: &AppContext,
    method: Method,
    path: &str,
    caller: Option<&str>,
    body: &[u8],
) -> LcResult<Value> {
    let rest = path
        .strip_prefix(API_PREFIX)
        .ok_or_else(|| LcError::NotFound(format!("unknown path '{}'", path)))?;
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    match segments.split_first() {
        Some((&"devices", tail)) => dispatch_devices(ctx, method, tail, caller, body).await,
        Some((&"resources", tail)) => dispatch_resources(ctx, method, tail, body).await,
        Some((&"requests", tail)) => dispatch_requests(ctx, tail).await,
        Some((other, _)) => Err(LcError::NotFound(format!(
            "unknown entity type '{}'",
            other
        ))),
        None => Err(LcError::Validation("empty request path".into())),
    }
}

fn require_post(method: Method, action: &str) -> LcResult<()> {
    if method != Method::Post {
        return Err(LcError::Validation(format!(
            "action '{}' requires POST",
            action
        )));
    }
    Ok(())
}

async fn dispatch_devices(
    ctx: &AppContext,
    method: Method,
    segments: &[&str],
    caller: Option<&str>,
    body: &[u8],
) -> LcResult<Value> {
    let (board_name, rest) = match segments.split_first() {
        None => {
            let names = ctx.store.list(EntityType::Board).await?;
            return Ok(json!(names));
        }
        Some((&"mine", _)) => {
            let user = auth::require(caller, "mine")?;
            let mut mine = Vec::new();
            for name in ctx.store.list(EntityType::Board).await? {
                let board: Board = match ctx.store.load(EntityType::Board, &name).await {
                    Ok(board) => board,
                    Err(_) => continue,
                };
                if board.assigned_to == user {
                    mine.push(name);
                }
            }
            return Ok(json!(mine));
        }
        Some((name, rest)) => (*name, rest),
    };

    let board: Board = ctx.store.load(EntityType::Board, board_name).await?;

    let (action_seg, args) = match rest.split_first() {
        None => return Ok(serde_json::to_value(&board)?),
        Some((seg, args)) => (*seg, args),
    };

    let action = match action_seg {
        "power" => {
            let op = args.first().ok_or_else(|| {
                LcError::Validation("power requires an operation argument".into())
            })?;
            DeviceAction::Power(PowerOp::parse(op)?)
        }
        "assign" => DeviceAction::Assign,
        "release" => DeviceAction::Release {
            force: args.first() == Some(&"force"),
        },
        "run" => DeviceAction::Run,
        "get_resource" => DeviceAction::GetResource,
        other => {
            return Err(LcError::Validation(format!("unknown action '{}'", other)));
        }
    };

    match action {
        DeviceAction::Power(op) => {
            let resource: Resource = ctx
                .store
                .load(EntityType::Resource, &board.power_controller)
                .await
                .map_err(|_| {
                    LcError::NotFound(format!(
                        "board '{}' has no registered power controller",
                        board.name
                    ))
                })?;
            let output = run_resource_command(ctx, &board, &resource, op.command_kind()).await?;
            Ok(json!({ "output": output }))
        }
        DeviceAction::Assign => {
            let user = auth::require(caller, "assign")?;
            let board = reservation::assign(&ctx.store, board_name, &user).await?;
            Ok(serde_json::to_value(&board)?)
        }
        DeviceAction::Release { force } => {
            let user = auth::require(caller, "release")?;
            let board = reservation::release(&ctx.store, board_name, &user, force).await?;
            Ok(serde_json::to_value(&board)?)
        }
        DeviceAction::Run => {
            require_post(method, "run")?;
            auth::require(caller, "run")?;
            let body: Value = serde_json::from_slice(body)
                .map_err(|_| LcError::Validation("run requires a JSON body".into()))?;
            let command = body
                .get("command")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    LcError::Validation("run body must carry a 'command' field".into())
                })?;
            if board.run_cmd.is_empty() {
                return Err(LcError::Validation(format!(
                    "board '{}' has no run command template",
                    board.name
                )));
            }
            let mut vars = board.attrs();
            vars.insert("command".into(), command.to_string());
            let argv = template::resolve(&board.run_cmd, &vars)?;
            let output =
                executor::run(&argv, Duration::from_secs(ctx.settings.run_timeout_secs)).await?;
            Ok(json!({ "output": output }))
        }
        DeviceAction::GetResource => {
            let kind_seg = args.first().ok_or_else(|| {
                LcError::Validation("get_resource requires a resource kind argument".into())
            })?;
            let kind = ResourceKind::from_str_opt(kind_seg).ok_or_else(|| {
                LcError::Validation(format!("unknown resource kind '{}'", kind_seg))
            })?;
            let feature = args.get(1).copied();
            find_board_resource(ctx, &board, kind, feature).await
        }
    }
}

/// Find the resource of a given kind (and optional feature tag) attached to
/// a board.
async fn find_board_resource(
    ctx: &AppContext,
    board: &Board,
    kind: ResourceKind,
    feature: Option<&str>,
) -> LcResult<Value> {
    for name in ctx.store.list(EntityType::Resource).await? {
        let resource: Resource = match ctx.store.load(EntityType::Resource, &name).await {
            Ok(resource) => resource,
            Err(_) => continue,
        };
        if resource.board != board.name || resource.kind != kind {
            continue;
        }
        if let Some(feature) = feature {
            if resource.feature.as_deref() != Some(feature) {
                continue;
            }
        }
        return Ok(json!({ "resource": resource.name }));
    }
    Err(LcError::NotFound(format!(
        "board '{}' has no {} resource{}",
        board.name,
        kind,
        feature
            .map(|f| format!(" with feature '{}'", f))
            .unwrap_or_default()
    )))
}

async fn dispatch_resources(
    ctx: &AppContext,
    method: Method,
    segments: &[&str],
    body: &[u8],
) -> LcResult<Value> {
    let (resource_name, rest) = match segments.split_first() {
        None => {
            let names = ctx.store.list(EntityType::Resource).await?;
            return Ok(json!(names));
        }
        Some((name, rest)) => (*name, rest),
    };

    let resource: Resource = ctx.store.load(EntityType::Resource, resource_name).await?;

    let (kind_seg, rest) = match rest.split_first() {
        None => return Ok(serde_json::to_value(&resource)?),
        Some((seg, rest)) => (*seg, rest),
    };

    let kind = ResourceKind::from_str_opt(kind_seg)
        .ok_or_else(|| LcError::Validation(format!("unknown resource kind '{}'", kind_seg)))?;
    if resource.kind != kind {
        return Err(LcError::Validation(format!(
            "resource '{}' is a {}, not a {}",
            resource.name, resource.kind, kind
        )));
    }

    let (op_seg, args) = rest.split_first().ok_or_else(|| {
        LcError::Validation(format!(
            "resource '{}' address needs an operation",
            resource.name
        ))
    })?;
    let op = ResourceOp::parse(op_seg)?;

    // Tokens embed their resource name, so a session can only be addressed
    // through the resource that owns it.
    let token_arg = || -> LcResult<&str> {
        let token = args.first().copied().ok_or_else(|| {
            LcError::Validation(format!("'{}' requires a capture token argument", op_seg))
        })?;
        if CaptureManager::resource_of_token(token) != Some(resource.name.as_str()) {
            return Err(LcError::Validation(format!(
                "token '{}' does not belong to resource '{}'",
                token, resource.name
            )));
        }
        Ok(token)
    };

    match op {
        ResourceOp::StartCapture => {
            require_post(method, "start_capture")?;
            let board: Board = ctx.store.load(EntityType::Board, &resource.board).await?;
            let token = ctx.captures.start(&board, &resource).await?;
            Ok(json!({ "token": token }))
        }
        ResourceOp::StopCapture => {
            require_post(method, "stop_capture")?;
            ctx.captures.stop(token_arg()?).await?;
            Ok(json!({ "token": token_arg()?, "state": "stopped" }))
        }
        ResourceOp::GetData => {
            let data = ctx.captures.fetch(token_arg()?, resource.kind).await?;
            Ok(data)
        }
        ResourceOp::Delete => {
            require_post(method, "delete")?;
            ctx.captures.delete(token_arg()?).await?;
            Ok(json!({ "token": token_arg()?, "state": "deleted" }))
        }
        ResourceOp::PutData => {
            require_post(method, "put-data")?;
            put_data(ctx, &resource, body).await
        }
        ResourceOp::SetConfig => {
            require_post(method, "set-config")?;
            set_config(ctx, &resource, body).await
        }
    }
}

/// Hand request-body data to the resource via its `put` command template.
/// The body is staged in a scratch file whose path substitutes `{datafile}`.
async fn put_data(ctx: &AppContext, resource: &Resource, body: &[u8]) -> LcResult<Value> {
    let template = resource.command_template(CommandKind::Put).ok_or_else(|| {
        LcError::Validation(format!("resource '{}' has no put command", resource.name))
    })?;
    let board: Board = ctx.store.load(EntityType::Board, &resource.board).await?;

    let scratch = ctx
        .captures
        .dir()
        .join(format!("put-{}.dat", Uuid::new_v4().simple()));
    tokio::fs::write(&scratch, body)
        .await
        .map_err(|e| LcError::storage("write put-data scratch file", e))?;

    let mut vars = merged_attrs(&board, resource);
    vars.insert("datafile".into(), scratch.display().to_string());
    let result = match template::resolve(template, &vars) {
        Ok(argv) => executor::run(&argv, Duration::from_secs(ctx.settings.run_timeout_secs)).await,
        Err(e) => Err(e),
    };
    let _ = tokio::fs::remove_file(&scratch).await;

    let output = result?;
    Ok(json!({ "output": output }))
}

/// Apply configuration fields to the resource via its `config` command
/// template, one execution per field with `{key}`/`{value}` substituted.
async fn set_config(ctx: &AppContext, resource: &Resource, body: &[u8]) -> LcResult<Value> {
    let template = resource.command_template(CommandKind::Config).ok_or_else(|| {
        LcError::Validation(format!("resource '{}' has no config command", resource.name))
    })?;
    let board: Board = ctx.store.load(EntityType::Board, &resource.board).await?;

    let fields: serde_json::Map<String, Value> = serde_json::from_slice(body)
        .map_err(|_| LcError::Validation("set-config requires a JSON object body".into()))?;
    if fields.is_empty() {
        return Err(LcError::Validation("set-config body is empty".into()));
    }

    let base_vars = merged_attrs(&board, resource);
    let mut outputs = serde_json::Map::new();
    for (key, value) in &fields {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let mut vars = base_vars.clone();
        vars.insert("key".into(), key.clone());
        vars.insert("value".into(), value);
        let argv = template::resolve(template, &vars)?;
        let output =
            executor::run(&argv, Duration::from_secs(ctx.settings.run_timeout_secs)).await?;
        outputs.insert(key.clone(), Value::String(output));
    }
    Ok(Value::Object(outputs))
}

async fn dispatch_requests(ctx: &AppContext, segments: &[&str]) -> LcResult<Value> {
    match segments.split_first() {
        None => {
            let names = ctx.store.list(EntityType::Request).await?;
            Ok(json!(names))
        }
        Some((name, _)) => {
            let record = ctx.store.load_value(EntityType::Request, name).await?;
            Ok(record)
        }
    }
}

/// Resolve and execute one of a resource's synchronous commands against the
/// merged board+resource attribute map.
async fn run_resource_command(
    ctx: &AppContext,
    board: &Board,
    resource: &Resource,
    kind: CommandKind,
) -> LcResult<String> {
    let template = resource.command_template(kind).ok_or_else(|| {
        LcError::Validation(format!(
            "resource '{}' has no {:?} command",
            resource.name, kind
        ))
    })?;
    let vars = merged_attrs(board, resource);
    let argv = template::resolve(template, &vars)?;
    executor::run(&argv, Duration::from_secs(ctx.settings.run_timeout_secs)).await
}

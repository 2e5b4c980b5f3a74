//! Legacy form-encoded surface.
//!
//! Older lab runners persist and query entities through a form-encoded
//! endpoint: an `action` field selects the operation, the remaining fields
//! are the payload, records land as `{type}-{name}.json` files. Responses
//! use the original plain-text `OK`/`FAIL` framing. Retained for backward
//! compatibility, not extended.

use lc_core::error::{LcError, LcResult};
use lc_core::model::{EntityType, ResourceKind};
use lc_core::{query, stamp};
use serde_json::{Map, Value};

use crate::AppContext;

/// Fields that must be present when registering each entity type.
fn required_put_fields(entity: EntityType) -> &'static [&'static str] {
    match entity {
        EntityType::Board => &["name", "host"],
        EntityType::Resource => &["name", "type", "board"],
        EntityType::Request => &["name", "requestor", "host", "board", "test_name"],
        EntityType::User => &["name", "token"],
    }
}

/// Fields the legacy update action may modify, per entity type.
fn allowed_update_fields(entity: EntityType) -> &'static [&'static str] {
    match entity {
        EntityType::Board => &["state", "kernel_version", "reservation"],
        EntityType::Request => &["state", "start_time", "done_time"],
        EntityType::Resource => &["state", "reservation", "command"],
        EntityType::User => &[],
    }
}

/// Parse an `application/x-www-form-urlencoded` body into field pairs.
pub fn parse_form(body: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

fn field<'a>(form: &'a [(String, String)], name: &str) -> Option<&'a str> {
    form.iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// Handle one legacy form request. Returns the plain-text body; failures
/// come back as `LcError` and are framed as `FAIL` lines by the HTTP layer.
pub async fn handle(ctx: &AppContext, body: &[u8]) -> LcResult<String> {
    let form = parse_form(body);
    let action = field(&form, "action")
        .ok_or_else(|| LcError::Validation("missing 'action' field in form data".into()))?
        .to_string();

    let (verb, type_name) = action
        .split_once('_')
        .ok_or_else(|| LcError::Validation(format!("unknown action '{}'", action)))?;

    if action == "query_objects" {
        return query_objects(ctx, &form).await;
    }

    let entity = EntityType::from_singular(type_name)
        .ok_or_else(|| LcError::Validation(format!("unknown action '{}'", action)))?;

    match verb {
        "add" => put_object(ctx, entity, &form).await,
        "update" => update_object(ctx, entity, &form).await,
        "remove" => remove_object(ctx, entity, &form).await,
        "get" => get_object(ctx, entity, &form).await,
        _ => Err(LcError::Validation(format!("unknown action '{}'", action))),
    }
}

async fn put_object(
    ctx: &AppContext,
    entity: EntityType,
    form: &[(String, String)],
) -> LcResult<String> {
    let mut name = field(form, "name")
        .ok_or_else(|| {
            LcError::Validation(format!("missing {} name in form data", entity))
        })?
        .to_string();

    for required in required_put_fields(entity) {
        if field(form, required).is_none() {
            return Err(LcError::Validation(format!(
                "missing required field '{}' in form data",
                required
            )));
        }
    }
    if entity == EntityType::Resource {
        let kind = field(form, "type").unwrap_or_default();
        if ResourceKind::from_str_opt(kind).is_none() {
            return Err(LcError::Validation(format!(
                "unknown resource type '{}'",
                kind
            )));
        }
    }

    let mut record = Map::new();
    for (key, value) in form {
        if key == "action" {
            continue;
        }
        record.insert(key.clone(), Value::String(value.clone()));
    }

    // Requests are created pending, with a creation stamp baked into the
    // name; they are never implicitly deleted afterward.
    if entity == EntityType::Request {
        record.insert("state".into(), Value::String("pending".into()));
        name = format!("{}-{}", name, stamp::now());
        record.insert("name".into(), Value::String(name.clone()));
    }

    ctx.store
        .save(entity, &name, &Value::Object(record))
        .await?;
    Ok(format!(
        "{} accepted (filename={}-{})\n",
        name,
        entity.singular(),
        name
    ))
}

async fn update_object(
    ctx: &AppContext,
    entity: EntityType,
    form: &[(String, String)],
) -> LcResult<String> {
    let name = field(form, entity.singular())
        .ok_or_else(|| {
            LcError::Validation(format!("can't read {} name from form", entity))
        })?
        .to_string();

    let allowed = allowed_update_fields(entity);
    let updates: Vec<(String, String)> = form
        .iter()
        .filter(|(k, _)| k != "action" && k != entity.singular())
        .cloned()
        .collect();
    for (key, _) in &updates {
        if !allowed.contains(&key.as_str()) {
            return Err(LcError::Validation(format!(
                "can't change field '{}' in {} '{}' (not allowed)",
                key, entity, name
            )));
        }
    }

    let record = ctx
        .store
        .update(entity, &name, |record: &mut Value| {
            let Some(map) = record.as_object_mut() else {
                return Err(LcError::Storage(format!(
                    "record for {} '{}' is not an object",
                    entity, name
                )));
            };
            for (key, value) in &updates {
                map.insert(key.clone(), Value::String(value.clone()));
            }
            Ok(())
        })
        .await?;

    let mut text = serde_json::to_string_pretty(&record)?;
    text.push('\n');
    Ok(text)
}

async fn remove_object(
    ctx: &AppContext,
    entity: EntityType,
    form: &[(String, String)],
) -> LcResult<String> {
    let name = field(form, entity.singular()).ok_or_else(|| {
        LcError::Validation(format!("can't read {} name from form", entity))
    })?;
    ctx.store.remove(entity, name).await?;
    Ok(format!("{} {} was removed\n", entity, name))
}

async fn get_object(
    ctx: &AppContext,
    entity: EntityType,
    form: &[(String, String)],
) -> LcResult<String> {
    let name = field(form, entity.singular()).ok_or_else(|| {
        LcError::Validation(format!("can't read {} name from form", entity))
    })?;
    let record = ctx.store.load_value(entity, name).await?;
    let mut text = serde_json::to_string_pretty(&record)?;
    text.push('\n');
    Ok(text)
}

async fn query_objects(ctx: &AppContext, form: &[(String, String)]) -> LcResult<String> {
    let type_name = field(form, "obj_type")
        .ok_or_else(|| LcError::Validation("can't read object type from form".into()))?;
    let entity = EntityType::from_singular(type_name).ok_or_else(|| {
        LcError::Validation(format!("unsupported object type '{}' for query", type_name))
    })?;

    let name_pattern = field(form, "name").unwrap_or("*");
    let attr_filters: Vec<(String, String)> = form
        .iter()
        .filter(|(k, _)| k != "action" && k != "obj_type" && k != "name")
        .cloned()
        .collect();

    let names = query::filter_names(&ctx.store, entity, name_pattern, &attr_filters).await?;
    let mut out = String::new();
    for name in names {
        out.push_str(&name);
        out.push('\n');
    }
    Ok(out)
}

//! Typed entity records for the LabControl object store.
//!
//! Each entity type from the data model gets an explicit record instead of an
//! arbitrary-key JSON map. A flattened `extra` map remains on boards and
//! resources for genuinely free-form extension attributes (pin mappings,
//! site-specific tags) that still participate in command-template resolution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Sentinel owner meaning a board is free.
pub const NOBODY: &str = "nobody";

/// Entity types stored by the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum EntityType {
    Board,
    Resource,
    Request,
    User,
}

impl EntityType {
    /// Singular name, used as the file-name prefix (`board-bbb.json`).
    pub fn singular(&self) -> &'static str {
        match self {
            EntityType::Board => "board",
            EntityType::Resource => "resource",
            EntityType::Request => "request",
            EntityType::User => "user",
        }
    }

    /// Subdirectory under the data dir holding this type's records.
    pub fn dir_name(&self) -> &'static str {
        match self {
            EntityType::Board => "boards",
            EntityType::Resource => "resources",
            EntityType::Request => "requests",
            EntityType::User => "users",
        }
    }

    /// Parse the singular form used by the legacy surface.
    pub fn from_singular(s: &str) -> Option<Self> {
        match s {
            "board" => Some(EntityType::Board),
            "resource" => Some(EntityType::Resource),
            "request" => Some(EntityType::Request),
            "user" => Some(EntityType::User),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.singular())
    }
}

/// Kinds of controllable resources that can be attached to a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum ResourceKind {
    PowerController,
    PowerMeasurement,
    Serial,
    Canbus,
}

impl ResourceKind {
    /// Parse the wire form used in paths (`power_measurement`, `serial`, ...).
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "power_controller" => Some(ResourceKind::PowerController),
            "power_measurement" => Some(ResourceKind::PowerMeasurement),
            "serial" => Some(ResourceKind::Serial),
            "canbus" => Some(ResourceKind::Canbus),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::PowerController => "power_controller",
            ResourceKind::PowerMeasurement => "power_measurement",
            ResourceKind::Serial => "serial",
            ResourceKind::Canbus => "canbus",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command templates a resource can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum CommandKind {
    Status,
    On,
    Off,
    Reboot,
    Capture,
    Put,
    Config,
}

/// A physical device under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    /// Unique board name.
    pub name: String,
    /// Host machine the board is attached to.
    pub host: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Name of the power-controller resource for this board.
    #[serde(default)]
    pub power_controller: String,
    /// Template for the `run` action; `{command}` is substituted from the
    /// request body.
    #[serde(default)]
    pub run_cmd: String,
    /// Current holder, or `"nobody"` when free.
    #[serde(default = "default_nobody", rename = "AssignedTo")]
    pub assigned_to: String,
    /// Free-form extension attributes, available to command templates.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

fn default_nobody() -> String {
    NOBODY.to_string()
}

impl Board {
    /// Whether the board is currently unreserved.
    pub fn is_free(&self) -> bool {
        self.assigned_to == NOBODY
    }

    /// Attribute map contributed to command-template resolution.
    pub fn attrs(&self) -> BTreeMap<String, String> {
        let mut map = self.extra.clone();
        map.insert("board".into(), self.name.clone());
        map.insert("name".into(), self.name.clone());
        map.insert("host".into(), self.host.clone());
        map
    }
}

/// A controllable peripheral attached to a board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Unique resource name.
    pub name: String,
    /// What kind of peripheral this is.
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Board this resource is attached to.
    pub board: String,
    /// Optional board-feature tag (e.g. which serial header it serves).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    /// Command templates keyed by operation.
    #[serde(default)]
    pub commands: BTreeMap<CommandKind, String>,
    /// Free-form extension attributes, available to command templates.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Resource {
    /// Template for one command kind, or a validation-style miss.
    pub fn command_template(&self, kind: CommandKind) -> Option<&str> {
        self.commands.get(&kind).map(String::as_str)
    }

    /// Attribute map contributed to command-template resolution.
    ///
    /// Resource attributes are merged over board attributes, so a resource
    /// can shadow a board-level value.
    pub fn attrs(&self) -> BTreeMap<String, String> {
        let mut map = self.extra.clone();
        map.insert("resource".into(), self.name.clone());
        map.insert("type".into(), self.kind.as_str().to_string());
        if let Some(feature) = &self.feature {
            map.insert("feature".into(), feature.clone());
        }
        map
    }
}

/// A record of a requested test run against a board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Generated name: base name plus creation timestamp.
    pub name: String,
    /// Request state; starts as `pending`.
    pub state: String,
    /// User who submitted the request.
    pub requestor: String,
    /// Host the request targets.
    pub host: String,
    /// Board the test should run on.
    pub board: String,
    /// Name of the test to run.
    pub test_name: String,
    /// Results run id, once one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Timestamps and other mutable bookkeeping fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// A user account with a flat auth token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user name.
    pub name: String,
    /// Password (legacy surface only).
    #[serde(default)]
    pub password: String,
    /// Bearer-style auth token.
    pub token: String,
}

/// Merge board and resource attributes into the map used for command
/// template resolution. Resource values win on key collisions.
pub fn merged_attrs(board: &Board, resource: &Resource) -> BTreeMap<String, String> {
    let mut map = board.attrs();
    map.extend(resource.attrs());
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_board() -> Board {
        serde_json::from_value(serde_json::json!({
            "name": "bbb",
            "host": "lab1",
            "description": "BeagleBone Black",
            "power_controller": "pdu1-port3",
            "run_cmd": "ssh {host} run {command}",
            "AssignedTo": "nobody"
        }))
        .unwrap()
    }

    #[test]
    fn board_assigned_to_defaults_to_nobody() {
        let board: Board = serde_json::from_value(serde_json::json!({
            "name": "bbb", "host": "lab1"
        }))
        .unwrap();
        assert!(board.is_free());
    }

    #[test]
    fn board_extra_fields_round_trip() {
        let board: Board = serde_json::from_value(serde_json::json!({
            "name": "bbb", "host": "lab1", "relay_pin": "7"
        }))
        .unwrap();
        assert_eq!(board.extra.get("relay_pin").map(String::as_str), Some("7"));
        let value = serde_json::to_value(&board).unwrap();
        assert_eq!(value["relay_pin"], "7");
    }

    #[test]
    fn resource_kind_wire_names() {
        assert_eq!(
            ResourceKind::from_str_opt("power_measurement"),
            Some(ResourceKind::PowerMeasurement)
        );
        assert_eq!(ResourceKind::from_str_opt("gpio"), None);
        assert_eq!(ResourceKind::Canbus.as_str(), "canbus");
    }

    #[test]
    fn merged_attrs_resource_shadows_board() {
        let board = sample_board();
        let resource: Resource = serde_json::from_value(serde_json::json!({
            "name": "pdu1-port3",
            "type": "power_controller",
            "board": "bbb",
            "host": "pdu-host",
            "commands": { "on": "pdu on {port}", "off": "pdu off {port}" },
            "port": "3"
        }))
        .unwrap();

        let attrs = merged_attrs(&board, &resource);
        // resource-level "host" shadows the board's
        assert_eq!(attrs.get("host").map(String::as_str), Some("pdu-host"));
        assert_eq!(attrs.get("port").map(String::as_str), Some("3"));
        assert_eq!(attrs.get("board").map(String::as_str), Some("bbb"));
    }

    #[test]
    fn command_kind_lookup() {
        let resource: Resource = serde_json::from_value(serde_json::json!({
            "name": "uart0",
            "type": "serial",
            "board": "bbb",
            "commands": { "capture": "grabserial -d {device} -o {logfile}" },
            "device": "/dev/ttyUSB0"
        }))
        .unwrap();
        assert!(resource.command_template(CommandKind::Capture).is_some());
        assert!(resource.command_template(CommandKind::Reboot).is_none());
    }
}

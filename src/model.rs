//! Entity records, creation inputs and update patches.
//!
//! Field names are the on-disk and wire contract; every record serializes as a
//! flat JSON object and collections are stored as JSON arrays.

use crate::types::{AccessEventKind, DoorId, DoorStatus, GroupId, LogId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_COLOR: &str = "#667eea";
const DEFAULT_ICON: &str = "building";
const DEFAULT_ROLE: &str = "employee";
const DEFAULT_PORT: u16 = 80;

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

fn default_icon() -> String {
    DEFAULT_ICON.to_string()
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

/// Building or zone owning a set of doors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    /// Member doors in insertion order.
    #[serde(default)]
    pub doors: Vec<DoorId>,
    /// Reverse index of users holding a legacy grant on this group.
    #[serde(default)]
    pub authorized_users: Vec<UserId>,
    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    pub updated_at: DateTime<Utc>,
}

/// Physical door belonging to exactly one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Door {
    pub id: DoorId,
    pub name: String,
    #[serde(default)]
    pub location: String,
    /// Controller host; empty when the door has no network endpoint.
    #[serde(default)]
    pub ip_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub status: DoorStatus,
    #[serde(default = "default_true")]
    pub is_locked: bool,
    pub group_id: GroupId,
    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    pub updated_at: DateTime<Utc>,
}

impl Door {
    /// Returns the controller endpoint when one is configured.
    pub fn endpoint(&self) -> Option<(&str, u16)> {
        let host = self.ip_address.trim();
        if host.is_empty() {
            None
        } else {
            Some((host, self.port))
        }
    }

    /// Returns true when the door accepts recognition-driven opens.
    pub fn is_online(&self) -> bool {
        self.status == DoorStatus::Online
    }
}

/// Person allowed to request access, keyed by an external identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub department: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub face_registered: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Legacy grants: every door of each listed group.
    #[serde(default)]
    pub authorized_groups: Vec<GroupId>,
    /// Direct grants on individual doors.
    #[serde(default)]
    pub authorized_doors: Vec<DoorId>,
    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    pub updated_at: DateTime<Utc>,
}

/// Immutable audit record of one access event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub id: LogId,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    /// Door involved; absent when a resolution found no door to name.
    #[serde(default)]
    pub door_id: Option<DoorId>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// Display name captured at write time.
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(rename = "event_type")]
    pub event: AccessEventKind,
    #[serde(default)]
    pub similarity_score: Option<f64>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub details: String,
}

/// Input for creating a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_icon")]
    pub icon: String,
}

impl NewGroup {
    /// Creates an input with default presentation metadata.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            color: default_color(),
            icon: default_icon(),
        }
    }
}

/// Input for creating a door inside an existing group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDoor {
    pub name: String,
    pub group_id: GroupId,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl NewDoor {
    /// Creates an input without location or endpoint.
    pub fn new(name: impl Into<String>, group_id: GroupId) -> Self {
        Self {
            name: name.into(),
            group_id,
            location: String::new(),
            ip_address: String::new(),
            port: DEFAULT_PORT,
        }
    }
}

/// Input for creating a user under a caller-supplied identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub department: String,
    #[serde(default = "default_role")]
    pub role: String,
}

impl NewUser {
    /// Creates an input with the default role.
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: String::new(),
            department: String::new(),
            role: default_role(),
        }
    }
}

/// Mutable group fields; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
}

impl GroupPatch {
    pub(crate) fn apply(self, group: &mut Group) {
        if let Some(name) = self.name {
            group.name = name;
        }
        if let Some(description) = self.description {
            group.description = description;
        }
        if let Some(color) = self.color {
            group.color = color;
        }
        if let Some(icon) = self.icon {
            group.icon = icon;
        }
    }
}

/// Mutable door fields; absent fields are left untouched.
///
/// A `group_id` moves the door between groups and must name an existing group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoorPatch {
    pub name: Option<String>,
    pub location: Option<String>,
    pub ip_address: Option<String>,
    pub port: Option<u16>,
    pub status: Option<DoorStatus>,
    pub is_locked: Option<bool>,
    pub group_id: Option<GroupId>,
}

impl DoorPatch {
    /// Applies every field except `group_id`, which needs the group index.
    pub(crate) fn apply_local(self, door: &mut Door) {
        if let Some(name) = self.name {
            door.name = name;
        }
        if let Some(location) = self.location {
            door.location = location;
        }
        if let Some(ip_address) = self.ip_address {
            door.ip_address = ip_address;
        }
        if let Some(port) = self.port {
            door.port = port;
        }
        if let Some(status) = self.status {
            door.status = status;
        }
        if let Some(is_locked) = self.is_locked {
            door.is_locked = is_locked;
        }
    }
}

/// Mutable user fields; absent fields are left untouched.
///
/// Grant sets are not patchable. Use the authorize operations so the group
/// reverse index stays in sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
    pub role: Option<String>,
    pub face_registered: Option<bool>,
    pub is_active: Option<bool>,
}

impl UserPatch {
    pub(crate) fn apply(self, user: &mut User) {
        if let Some(name) = self.name {
            user.name = name;
        }
        if let Some(email) = self.email {
            user.email = email;
        }
        if let Some(department) = self.department {
            user.department = department;
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        if let Some(face_registered) = self.face_registered {
            user.face_registered = face_registered;
        }
        if let Some(is_active) = self.is_active {
            user.is_active = is_active;
        }
    }
}

/// Accepts RFC 3339 timestamps and the offset-less ISO form written by older
/// data files, which is read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_without_grant_sets_loads_with_empty_sets() {
        let raw = r#"{"id":"emp_1","name":"Ana","face_registered":true,
            "created_at":"2024-05-01T08:30:00.123456","updated_at":"2024-05-01T08:30:00"}"#;
        let user: User = serde_json::from_str(raw).unwrap();

        assert!(user.authorized_doors.is_empty());
        assert!(user.authorized_groups.is_empty());
        assert!(user.is_active);
        assert_eq!(user.role, "employee");
        assert_eq!(user.created_at.to_rfc3339(), "2024-05-01T08:30:00.123456+00:00");
    }

    #[test]
    fn log_entry_uses_event_type_storage_name() {
        let raw = r#"{"id":"l1","timestamp":"2024-05-01T08:30:00Z","door_id":"door_1",
            "event_type":"door_opened","details":"x"}"#;
        let entry: AccessLogEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(entry.event, AccessEventKind::DoorOpened);

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["event_type"], "door_opened");
        assert!(value["user_id"].is_null());
    }

    #[test]
    fn patch_ignores_unknown_and_protected_fields() {
        let patch: UserPatch =
            serde_json::from_str(r#"{"name":"Bea","id":"other","created_at":"x","colour":1}"#)
                .unwrap();
        assert_eq!(patch.name.as_deref(), Some("Bea"));
        assert_eq!(patch.email, None);
    }

    #[test]
    fn door_endpoint_requires_host() {
        let raw = r#"{"id":"door_1","name":"Main","group_id":"grp_1"}"#;
        let mut door: Door = serde_json::from_str(raw).unwrap();
        assert_eq!(door.endpoint(), None);
        assert_eq!(door.port, 80);
        assert!(door.is_locked);

        door.ip_address = "10.0.0.7".to_string();
        assert_eq!(door.endpoint(), Some(("10.0.0.7", 80)));
    }
}

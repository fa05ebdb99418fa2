//! Stable method namespace
//!
//! The broker treats methods opaquely except for the admission handshake
//! and the membership lifecycle messages it originates itself. Everything
//! else (editor, file system) is relayed without inspection; the constants
//! exist so clients and broker agree on the strings.

use serde::{Deserialize, Serialize};

/// Admission request sent to the room host; params `[UserInfo]`, returns `bool`
pub const PEER_JOIN: &str = "peer/join";
/// Notifies a peer of its own public identity; params `[PeerInfo]`
pub const PEER_INFO: &str = "peer/info";
/// Workspace handshake between guest and host; opaque to the broker
pub const PEER_INIT: &str = "peer/init";

/// A guest entered the room; params `[PeerInfo]`
pub const ROOM_JOINED: &str = "room/joined";
/// A guest left the room; params `[PeerInfo]`
pub const ROOM_LEFT: &str = "room/left";
/// The host disconnected and the room is gone
pub const ROOM_CLOSED: &str = "room/closed";
/// Host changed guest permissions; opaque to the broker
pub const ROOM_PERMISSIONS_UPDATED: &str = "room/permissionsUpdated";

/// Text document delta; opaque to the broker
pub const EDITOR_UPDATE: &str = "editor/update";
/// Cursor and selection presence; opaque to the broker
pub const EDITOR_PRESENCE: &str = "editor/presence";

/// Host-side virtual filesystem requests; all opaque to the broker
pub const FILE_SYSTEM_STAT: &str = "fileSystem/stat";
pub const FILE_SYSTEM_MKDIR: &str = "fileSystem/mkdir";
pub const FILE_SYSTEM_READ_FILE: &str = "fileSystem/readFile";
pub const FILE_SYSTEM_WRITE_FILE: &str = "fileSystem/writeFile";
pub const FILE_SYSTEM_READ_DIR: &str = "fileSystem/readDir";
pub const FILE_SYSTEM_DELETE: &str = "fileSystem/delete";
pub const FILE_SYSTEM_RENAME: &str = "fileSystem/rename";

/// Public projection of a connected peer
///
/// Carries the peer id and the user's display fields. The user's
/// server-side id never appears here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Connection-scoped peer id
    pub id: String,
    /// Display name
    pub name: String,
    /// Email, if the user supplied one at login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Public user fields carried by the admission handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Display name
    pub name: String,
    /// Email, if the user supplied one at login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_info_omits_missing_email() {
        let info = PeerInfo { id: "p1".into(), name: "Alice".into(), email: None };
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"id":"p1","name":"Alice"}"#);
    }

    #[test]
    fn test_user_info_roundtrip() {
        let info = UserInfo { name: "Bob".into(), email: Some("bob@example.com".into()) };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(serde_json::from_value::<UserInfo>(json).unwrap(), info);
    }
}

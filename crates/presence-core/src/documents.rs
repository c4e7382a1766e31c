use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SET_ACTIVITY_COMMAND: &str = "SET_ACTIVITY";
pub const FALLBACK_PID: u32 = 9999;
pub const HANDSHAKE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeDocument {
    pub client_id: String,
    pub v: u32,
    pub nonce: String,
}

impl HandshakeDocument {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            v: HANDSHAKE_VERSION,
            nonce: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceDocument {
    pub cmd: String,
    pub args: ActivityArgs,
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityArgs {
    pub pid: u32,
    pub activity: Activity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Activity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub timestamps: ActivityTimestamps,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<ActivityAssets>,
    pub instance: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityTimestamps {
    pub start: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityAssets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_text: Option<String>,
}

impl PresenceDocument {
    /// Wraps an activity into a `SET_ACTIVITY` command. A pid of zero means the
    /// caller has no real process id, so the fixed fallback is used.
    pub fn set_activity(pid: u32, activity: Activity) -> Self {
        Self {
            cmd: SET_ACTIVITY_COMMAND.to_string(),
            args: ActivityArgs {
                pid: if pid == 0 { FALLBACK_PID } else { pid },
                activity,
            },
            nonce: Uuid::new_v4().to_string(),
        }
    }
}

/// Builder-side description of the images; collapsed into `None` when no key
/// is present so the `assets` object is omitted entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetKeys {
    pub large_image: Option<String>,
    pub large_text: Option<String>,
    pub small_image: Option<String>,
    pub small_text: Option<String>,
}

impl AssetKeys {
    pub fn into_assets(self) -> Option<ActivityAssets> {
        let large_image = self.large_image.filter(|key| !key.is_empty());
        let small_image = self.small_image.filter(|key| !key.is_empty());
        if large_image.is_none() && small_image.is_none() {
            return None;
        }
        let large_text = large_image
            .as_ref()
            .and(self.large_text.filter(|text| !text.is_empty()));
        let small_text = small_image
            .as_ref()
            .and(self.small_text.filter(|text| !text.is_empty()));
        Some(ActivityAssets {
            large_image,
            large_text,
            small_image,
            small_text,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub valid: bool,
    pub name: String,
    pub pretty_name: String,
    pub branch: String,
    pub path: String,
    pub has_origin: bool,
    pub cache: CacheSnapshot,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub local_commits_on_start: i64,
    pub ahead_of_local: i64,
    pub remote_commits_on_start: i64,
    pub ahead_of_remote: i64,
    pub pushed_to_remote: i64,
}

impl SessionSnapshot {
    /// The document answered when no session is active.
    pub fn inactive() -> Self {
        Self::default()
    }
}

use crate::assets::{DEFAULT_ICON_KEY, DEFAULT_ICON_TEXT, WORKING_ON_PRIVATE};
use crate::registry::SessionRegistry;
use crate::session::Session;
use presence_core::documents::{Activity, ActivityTimestamps, AssetKeys, PresenceDocument};

#[derive(Debug, Clone, Copy, Default)]
pub struct PresenceOptions {
    pub custom_icons: bool,
    pub editor_icons: bool,
}

/// Whether presence is currently shown and since when. The start time resets
/// whenever presence resumes after a clear.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresenceState {
    has_presence: bool,
    started_at: i64,
}

impl PresenceState {
    pub fn has_presence(&self) -> bool {
        self.has_presence
    }

    pub fn begin(&mut self, now: i64) -> i64 {
        if !self.has_presence {
            self.started_at = now;
            self.has_presence = true;
        }
        self.started_at
    }

    /// Returns true when there was presence to clear.
    pub fn clear(&mut self) -> bool {
        std::mem::replace(&mut self.has_presence, false)
    }
}

pub fn state_line(session: &Session) -> Option<String> {
    let stat = session.active_branch();
    if session.has_origin {
        if stat.pushed_to_remote > 0 {
            return Some(format!(
                "Pushed {} of {}",
                stat.pushed_to_remote, stat.ahead_of_remote
            ));
        }
        if let Some(line) = relative_line(stat.ahead_of_remote) {
            return Some(line);
        }
    }
    relative_line(stat.ahead_of_local)
}

fn relative_line(delta: i64) -> Option<String> {
    match delta {
        0 => None,
        ahead if ahead > 0 => Some(format!("Ahead by {ahead}")),
        behind => Some(format!("Behind by {}", behind.unsigned_abs())),
    }
}

pub fn build_presence(
    registry: &SessionRegistry,
    options: PresenceOptions,
    started_at: i64,
) -> PresenceDocument {
    let mut assets = AssetKeys::default();
    let mut editor_icon_set = false;
    if let Some(client) = registry.active_client().filter(|_| options.editor_icons) {
        if let Some(icon) = &client.editor_icon {
            assets.large_image = Some(icon.clone());
            editor_icon_set = true;
        }
        assets.large_text = client.editor_name.clone();
    }

    let session = registry
        .active_session()
        .filter(|session| session.valid && !registry.is_waiting());
    let mut activity = Activity {
        timestamps: ActivityTimestamps { start: started_at },
        instance: true,
        ..Activity::default()
    };
    let pid = match session {
        Some(session) => {
            activity.details = Some(format!("Working on {}", session.pretty_name));
            activity.state = state_line(session);
            if options.custom_icons {
                assets.large_image = Some(session.name.clone());
                assets.large_text = Some(session.pretty_name.clone());
            } else if !editor_icon_set {
                assets.large_image = Some(DEFAULT_ICON_KEY.to_string());
                assets.large_text = Some(DEFAULT_ICON_TEXT.to_string());
            }
            if let Some(language) = &session.language {
                assets.small_image = Some(language.color_key.clone());
                assets.small_text = Some(language.name.clone());
            }
            registry.active_client_id().unwrap_or_default()
        }
        None => {
            activity.details = Some(WORKING_ON_PRIVATE.to_string());
            if !options.editor_icons {
                assets.large_image = Some(DEFAULT_ICON_KEY.to_string());
            }
            0
        }
    };
    activity.assets = assets.into_assets();
    PresenceDocument::set_activity(pid, activity)
}

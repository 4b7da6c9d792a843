//! Per-viewer presence visibility.
//!
//! `custom` mode reads `visible_to_users` as an allow-list; `everyone` and
//! `contacts` read `hidden_from_users` as a deny-list. Last-seen is never
//! withheld.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::chat::scope::UserId;
use crate::presence::PresenceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityMode {
    #[default]
    Everyone,
    Contacts,
    Nobody,
    Custom,
}

impl VisibilityMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "everyone" => Some(Self::Everyone),
            "contacts" => Some(Self::Contacts),
            "nobody" => Some(Self::Nobody),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Everyone => "everyone",
            Self::Contacts => "contacts",
            Self::Nobody => "nobody",
            Self::Custom => "custom",
        }
    }
}

/// A user's privacy settings for their own presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilitySettings {
    pub mode: VisibilityMode,
    pub show_online_status: bool,
    pub hidden_from_users: HashSet<UserId>,
    pub visible_to_users: HashSet<UserId>,
    /// Empty means every location may be shown.
    pub allowed_locations: HashSet<String>,
}

impl Default for VisibilitySettings {
    fn default() -> Self {
        Self {
            mode: VisibilityMode::Everyone,
            show_online_status: true,
            hidden_from_users: HashSet::new(),
            visible_to_users: HashSet::new(),
            allowed_locations: HashSet::new(),
        }
    }
}

/// What one viewer is allowed to learn about one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceView {
    pub can_see: bool,
    pub exposed_online: bool,
    pub exposed_last_seen: Option<DateTime<Utc>>,
    pub exposed_location: Option<String>,
}

impl PresenceView {
    fn hidden(last_seen: Option<DateTime<Utc>>) -> Self {
        Self {
            can_see: false,
            exposed_online: false,
            exposed_last_seen: last_seen,
            exposed_location: None,
        }
    }
}

/// Resolve the view `viewer_id` gets of `target`. Rules are evaluated in
/// order and the first match wins.
pub fn resolve(
    viewer_id: UserId,
    target: &PresenceState,
    settings: &VisibilitySettings,
) -> PresenceView {
    let last_seen = target.last_seen_at;

    if !target.is_online {
        return PresenceView::hidden(last_seen);
    }

    if viewer_id == target.user_id {
        return PresenceView {
            can_see: true,
            exposed_online: true,
            exposed_last_seen: last_seen,
            exposed_location: target.location.clone(),
        };
    }

    if !settings.show_online_status {
        return PresenceView::hidden(last_seen);
    }

    let can_see = match settings.mode {
        VisibilityMode::Nobody => false,
        VisibilityMode::Custom => settings.visible_to_users.contains(&viewer_id),
        VisibilityMode::Contacts | VisibilityMode::Everyone => {
            !settings.hidden_from_users.contains(&viewer_id)
        }
    };

    if !can_see {
        return PresenceView::hidden(last_seen);
    }

    let exposed_location = target.location.clone().filter(|location| {
        settings.allowed_locations.is_empty() || settings.allowed_locations.contains(location)
    });

    PresenceView {
        can_see: true,
        exposed_online: true,
        exposed_last_seen: last_seen,
        exposed_location,
    }
}

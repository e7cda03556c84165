//! Presence records and their semantic comparison.
//!
//! A [`PresenceRecord`] is a set of per-title records describing where and
//! what a user is playing. Records arrive from pushes, batch lookups, and
//! reconciliation fetches, so [`PresenceRecord::differs_from`] compares them
//! semantically: record order and monotonic timestamps are ignored.

use std::time::SystemTime;

/// Device class a title is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceDeviceType {
    /// Device type could not be determined.
    Unknown,
    /// Living-room console.
    Console,
    /// Desktop PC.
    Desktop,
    /// Phone or tablet.
    Mobile,
    /// Browser session.
    Web,
}

/// Whether the user is signed in anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserPresenceState {
    #[default]
    Unknown,
    Online,
    Away,
    Offline,
}

/// Lifecycle of a title session as reported by the push transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitlePresenceState {
    /// The user launched the title.
    Started,
    /// The user left the title.
    Ended,
}

/// Presence of one user within one title.
#[derive(Debug, Clone)]
pub struct PresenceTitleRecord {
    /// Title identifier.
    pub title_id: u32,
    /// Device the title is running on.
    pub device_type: PresenceDeviceType,
    /// Whether the title is in the foreground.
    pub is_title_active: bool,
    /// Rich-presence string shown to other users.
    pub presence_text: String,
    /// Server-side timestamp of the last activity. Monotonic bookkeeping,
    /// excluded from semantic comparison.
    pub last_active: Option<SystemTime>,
}

impl PresenceTitleRecord {
    fn same_as(&self, other: &PresenceTitleRecord) -> bool {
        self.title_id == other.title_id
            && self.device_type == other.device_type
            && self.is_title_active == other.is_title_active
            && self.presence_text == other.presence_text
    }
}

/// Full presence of one user across all titles.
#[derive(Debug, Clone, Default)]
pub struct PresenceRecord {
    /// Owning user.
    pub xuid: u64,
    /// Aggregate signed-in state.
    pub user_state: UserPresenceState,
    /// Per-title records, unordered.
    pub title_records: Vec<PresenceTitleRecord>,
}

impl PresenceRecord {
    /// Creates an empty record for a user.
    pub fn empty(xuid: u64) -> Self {
        Self {
            xuid,
            user_state: UserPresenceState::Unknown,
            title_records: Vec::new(),
        }
    }

    /// Number of per-title records.
    pub fn title_record_count(&self) -> usize {
        self.title_records.len()
    }

    /// Applies a device-level presence transition in place.
    ///
    /// Every record on the given device is marked active or inactive to
    /// match the sign-in state reported by the push.
    pub fn update_device(&mut self, device_type: PresenceDeviceType, is_logged_on: bool) {
        for record in &mut self.title_records {
            if record.device_type == device_type {
                record.is_title_active = is_logged_on;
            }
        }
        if is_logged_on {
            self.user_state = UserPresenceState::Online;
        } else if self.title_records.iter().all(|r| !r.is_title_active) {
            self.user_state = UserPresenceState::Offline;
        }
    }

    /// Drops the record for a title the user has left.
    pub fn remove_title(&mut self, title_id: u32) {
        self.title_records.retain(|r| r.title_id != title_id);
    }

    /// Semantic inequality: `true` when the two records describe different
    /// presence.
    ///
    /// Title-record order and `last_active` timestamps are ignored, so a
    /// re-fetched record that merely shuffled or re-stamped entries does not
    /// count as a change.
    pub fn differs_from(&self, other: &PresenceRecord) -> bool {
        if self.user_state != other.user_state {
            return true;
        }
        if self.title_records.len() != other.title_records.len() {
            return true;
        }
        for record in &self.title_records {
            match other.title_records.iter().find(|o| o.title_id == record.title_id) {
                Some(counterpart) if record.same_as(counterpart) => {}
                _ => return true,
            }
        }
        false
    }
}

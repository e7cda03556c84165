//! Social user records and the three-way change diff.

use super::presence::PresenceRecord;

/// How much profile and presence data to request from the roster service.
///
/// Forwarded opaquely; the graph itself never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    /// Identity fields only.
    NoExtraDetail,
    /// Identity plus preferred color.
    PreferredColor,
    /// Identity plus presence.
    PresenceDetail,
    /// Everything the service knows.
    All,
}

/// One remote account as seen from the local user's roster.
///
/// Immutable by convention: the graph replaces whole records rather than
/// patching fields, so two records can always be compared with
/// [`SocialUser::diff`].
#[derive(Debug, Clone)]
pub struct SocialUser {
    /// Stable 64-bit account id.
    pub xuid: u64,
    /// Preferred display name.
    pub display_name: String,
    /// Real name, when shared with the caller.
    pub real_name: String,
    /// Unique gamertag.
    pub gamertag: String,
    /// Avatar image URL.
    pub display_pic_url: String,
    /// Whether this account follows the local user.
    pub is_followed_by_caller: bool,
    /// Whether the local user follows this account.
    pub is_following_user: bool,
    /// Whether the local user marked this account a favorite.
    pub is_favorite: bool,
    /// Embedded presence.
    pub presence: PresenceRecord,
}

impl SocialUser {
    /// The xuid in its decimal wire form.
    pub fn xuid_string(&self) -> String {
        self.xuid.to_string()
    }

    /// Computes which aspects changed between two records of the same user.
    pub fn diff(prev: &SocialUser, next: &SocialUser) -> ChangeSet {
        ChangeSet {
            profile: prev.display_name != next.display_name
                || prev.real_name != next.real_name
                || prev.gamertag != next.gamertag
                || prev.display_pic_url != next.display_pic_url,
            presence: prev.presence.differs_from(&next.presence),
            relationship: prev.is_followed_by_caller != next.is_followed_by_caller
                || prev.is_following_user != next.is_following_user
                || prev.is_favorite != next.is_favorite,
        }
    }
}

/// Result of [`SocialUser::diff`]: which buckets of a user record changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Name, gamertag, or avatar changed.
    pub profile: bool,
    /// Presence changed semantically.
    pub presence: bool,
    /// Follow/favorite flags changed.
    pub relationship: bool,
}

impl ChangeSet {
    /// `true` when nothing changed.
    pub fn is_empty(&self) -> bool {
        !self.profile && !self.presence && !self.relationship
    }
}

//! Data model for the social roster: users, presence, change detection.

mod presence;
mod user;

pub use presence::{
    PresenceDeviceType, PresenceRecord, PresenceTitleRecord, TitlePresenceState,
    UserPresenceState,
};
pub use user::{ChangeSet, DetailLevel, SocialUser};

/// Parses a decimal xuid string into its 64-bit form.
///
/// Returns `None` for malformed input and for the reserved zero id, which
/// remote services use as a "no user" marker.
pub fn parse_xuid(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|&xuid| xuid != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_xuid_valid() {
        assert_eq!(parse_xuid("271998"), Some(271998));
        assert_eq!(parse_xuid(" 42 "), Some(42));
    }

    #[test]
    fn test_parse_xuid_rejects_zero() {
        assert_eq!(parse_xuid("0"), None);
    }

    #[test]
    fn test_parse_xuid_rejects_garbage() {
        assert_eq!(parse_xuid(""), None);
        assert_eq!(parse_xuid("not-a-number"), None);
        assert_eq!(parse_xuid("-5"), None);
    }
}

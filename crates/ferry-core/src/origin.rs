//! Helpers for building author data and skipping chat-originated content.
//!
//! Content that the relay's inbound side copied over from chat carries one of
//! several origin markers. Relaying it back out would echo the message into
//! the channel it came from, so event producers check [`is_chat_origin`]
//! before enqueueing.

use url::Url;

use crate::error::Result;

/// Plain-text origin marker.
pub const CHAT_ORIGIN_MARKER: &str = "[slack-sync]";

const CHAT_ORIGIN_MARKERS: [&str; 4] = [
    CHAT_ORIGIN_MARKER,
    "<!-- [slack-sync] -->",
    "\u{200B}[slack-sync]\u{200B}",
    "[//]: # (slack-sync)",
];

const DEFAULT_AVATAR_PATH: &str = "/assets/uploads/system/default-avatar.png";

/// True when the content carries any chat-origin marker.
pub fn is_chat_origin(content: &str) -> bool {
    CHAT_ORIGIN_MARKERS.iter().any(|marker| content.contains(marker))
}

/// Picks the name shown in chat: full name, then username, then a placeholder.
pub fn display_name(fullname: Option<&str>, username: Option<&str>) -> String {
    [fullname, username]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|name| !name.is_empty())
        .unwrap_or("Unknown User")
        .to_string()
}

/// Resolves a user's picture into an absolute avatar URL.
///
/// `base_url` is the forum's public URL and may include a sub-path such as
/// `https://example.com/forum`. Pictures stored with that sub-path already
/// prefixed are joined to the origin so the sub-path is not repeated.
///
/// # Errors
///
/// Returns `CoreError::InvalidUrl` if `base_url` is not an absolute URL.
pub fn avatar_url(base_url: &str, picture: Option<&str>) -> Result<String> {
    let base = base_url.trim_end_matches('/');
    let picture = picture.map(str::trim).unwrap_or_default();

    if picture.is_empty() {
        return Ok(format!("{base}{DEFAULT_AVATAR_PATH}"));
    }

    if picture.starts_with("http://") || picture.starts_with("https://") {
        return Ok(picture.to_string());
    }

    let parsed = Url::parse(base)?;
    let origin = parsed.origin().ascii_serialization();
    let picture_path =
        if picture.starts_with('/') { picture.to_string() } else { format!("/{picture}") };

    let site_path = parsed.path();
    if site_path != "/" && !site_path.is_empty() && picture_path.starts_with(site_path) {
        return Ok(format!("{origin}{picture_path}"));
    }

    Ok(format!("{base}{picture_path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_every_marker_variant() {
        assert!(is_chat_origin("hello [slack-sync]"));
        assert!(is_chat_origin("<p>hi</p><!-- [slack-sync] -->"));
        assert!(is_chat_origin("hi \u{200B}[slack-sync]\u{200B}"));
        assert!(is_chat_origin("hi\n\n[//]: # (slack-sync)"));

        assert!(!is_chat_origin("a normal post"));
        assert!(!is_chat_origin(""));
    }

    #[test]
    fn display_name_fallbacks() {
        assert_eq!(display_name(Some("Ada Lovelace"), Some("ada")), "Ada Lovelace");
        assert_eq!(display_name(Some(""), Some("ada")), "ada");
        assert_eq!(display_name(None, Some("ada")), "ada");
        assert_eq!(display_name(None, None), "Unknown User");
        assert_eq!(display_name(Some("  "), Some("")), "Unknown User");
    }

    #[test]
    fn default_avatar_when_picture_missing() {
        assert_eq!(
            avatar_url("https://forum.example.com/", None).unwrap(),
            "https://forum.example.com/assets/uploads/system/default-avatar.png"
        );
        assert_eq!(
            avatar_url("https://forum.example.com", Some("")).unwrap(),
            "https://forum.example.com/assets/uploads/system/default-avatar.png"
        );
    }

    #[test]
    fn absolute_pictures_pass_through() {
        let picture = "https://cdn.example.com/a.png";
        assert_eq!(avatar_url("https://forum.example.com", Some(picture)).unwrap(), picture);
    }

    #[test]
    fn relative_pictures_join_base() {
        assert_eq!(
            avatar_url("https://forum.example.com", Some("assets/uploads/ada.png")).unwrap(),
            "https://forum.example.com/assets/uploads/ada.png"
        );
        assert_eq!(
            avatar_url("https://example.com/forum", Some("/assets/uploads/ada.png")).unwrap(),
            "https://example.com/forum/assets/uploads/ada.png"
        );
    }

    #[test]
    fn site_path_is_not_duplicated() {
        assert_eq!(
            avatar_url("https://example.com/forum/", Some("/forum/assets/uploads/ada.png"))
                .unwrap(),
            "https://example.com/forum/assets/uploads/ada.png"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(avatar_url("not a url", Some("a.png")).is_err());
    }
}

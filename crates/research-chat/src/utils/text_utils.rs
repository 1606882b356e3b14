//! Text helpers shared by the gateway and the capture client

use std::borrow::Cow;
use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref USER_ID_REGEX: Regex = Regex::new(r"^[A-Z][0-9]{8}$").unwrap();
}

pub struct TextUtils;

impl TextUtils {
    /// Canonical form of a user identifier: trimmed and upper-cased.
    pub fn normalize_user_id(raw: &str) -> String {
        raw.trim().to_uppercase()
    }

    /// One uppercase letter followed by 8 digits. Only the client checks this;
    /// the gateway relies on allow-list membership alone.
    pub fn is_valid_user_id(raw: &str) -> bool {
        USER_ID_REGEX.is_match(raw.trim())
    }

    /// First `n` characters of `text`, cut on char boundaries.
    pub fn first_chars(text: &str, n: usize) -> Cow<'_, str> {
        match text.char_indices().nth(n) {
            Some((byte_pos, _)) => Cow::Owned(text[..byte_pos].to_string()),
            None => Cow::Borrowed(text),
        }
    }

    /// Length in characters, which is what the browser reports for field lengths.
    pub fn char_len(text: &str) -> usize {
        text.chars().count()
    }

    /// Treats `None`, empty and whitespace-only input the same way.
    pub fn non_blank(value: Option<&str>) -> Option<&str> {
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_user_id() {
        assert_eq!(TextUtils::normalize_user_id("  a01234567 "), "A01234567");
    }

    #[test]
    fn test_user_id_format() {
        assert!(TextUtils::is_valid_user_id("A01234567"));
        assert!(TextUtils::is_valid_user_id(" B99999999 "));
        assert!(!TextUtils::is_valid_user_id("a01234567"));
        assert!(!TextUtils::is_valid_user_id("A0123456"));
        assert!(!TextUtils::is_valid_user_id("AB1234567"));
        assert!(!TextUtils::is_valid_user_id("A012345678"));
    }

    #[test]
    fn test_first_chars_short_text_is_borrowed() {
        let text = "hello";
        assert!(matches!(TextUtils::first_chars(text, 200), Cow::Borrowed("hello")));
    }

    #[test]
    fn test_first_chars_respects_char_boundaries() {
        let text = "ééééé";
        assert_eq!(TextUtils::first_chars(text, 3), "ééé");
        assert_eq!(TextUtils::char_len(text), 5);
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(TextUtils::non_blank(None), None);
        assert_eq!(TextUtils::non_blank(Some("   ")), None);
        assert_eq!(TextUtils::non_blank(Some(" x ")), Some("x"));
    }
}

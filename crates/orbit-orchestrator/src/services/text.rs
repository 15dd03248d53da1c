//! Small text transforms shared across activities.

use sha2::{Digest, Sha256};

/// Uppercase the first letter of each whitespace-separated word,
/// locale-independent. Characters that expand under uppercasing (e.g. ß)
/// keep their full expansion.
pub fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut at_word_start = true;
    for ch in input.chars() {
        if ch.is_whitespace() {
            at_word_start = true;
            out.push(ch);
        } else if at_word_start {
            out.extend(ch.to_uppercase());
            at_word_start = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Lowercase ASCII alphanumerics joined by single dashes; everything else
/// collapses. Used for `<workspace>-<app>-<env>` Bifrost names.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Full SHA-256 over the canonical UTF-8 bytes, hex-encoded.
pub fn content_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_case_words() {
        assert_eq!(title_case("payment service"), "Payment Service");
        assert_eq!(title_case("already Titled"), "Already Titled");
        assert_eq!(title_case(""), "");
        assert_eq!(title_case("  spaced"), "  Spaced");
    }

    #[test]
    fn title_case_is_unicode_aware() {
        assert_eq!(title_case("über alles"), "Über Alles");
        assert_eq!(title_case("ßample"), "SSample");
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Acme Payments"), "acme-payments");
        assert_eq!(slugify("ws_1//app!2"), "ws-1-app-2");
        assert_eq!(slugify("--lead-trail--"), "lead-trail");
    }

    #[test]
    fn content_hash_is_full_sha256() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash("a").len(), 64);
        assert_ne!(content_hash("a"), content_hash("b"));
    }
}

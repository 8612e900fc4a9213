//! PII redaction
//!
//! Applied before any write to storage or to response text. Longer digit
//! runs are matched first so a card number is not half-eaten by the phone
//! pattern.

use regex::Regex;
use std::sync::OnceLock;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
    })
}

fn card_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 13-19 digits, optionally separated by spaces or dashes
    RE.get_or_init(|| Regex::new(r"\b\d(?:[ -]?\d){12,18}\b").expect("valid card regex"))
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 10-digit groupings: 555-123-4567, (555) 123 4567, 5551234567
    RE.get_or_init(|| {
        Regex::new(r"\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b").expect("valid phone regex")
    })
}

/// Replace emails, card-like digit runs, and phone-like groupings with
/// fixed placeholder tokens.
pub fn redact(text: &str) -> String {
    let out = email_re().replace_all(text, "[REDACTED_EMAIL]");
    let out = card_re().replace_all(&out, "[REDACTED_CARD]");
    let out = phone_re().replace_all(&out, "[REDACTED_PHONE]");
    out.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_email() {
        assert_eq!(
            redact("contact seller@example.com for details"),
            "contact [REDACTED_EMAIL] for details"
        );
    }

    #[test]
    fn test_redact_phone_variants() {
        assert_eq!(redact("call 555-123-4567"), "call [REDACTED_PHONE]");
        assert_eq!(redact("call (555) 123-4567"), "call [REDACTED_PHONE]");
        assert_eq!(redact("call 5551234567 now"), "call [REDACTED_PHONE] now");
    }

    #[test]
    fn test_redact_card() {
        assert_eq!(redact("card 4111 1111 1111 1111."), "card [REDACTED_CARD].");
        assert_eq!(redact("card 4111111111111111"), "card [REDACTED_CARD]");
    }

    #[test]
    fn test_card_not_split_into_phone() {
        let out = redact("pan 4111-1111-1111-1111 end");
        assert_eq!(out, "pan [REDACTED_CARD] end");
        assert!(!out.contains("PHONE"));
    }

    #[test]
    fn test_clean_text_untouched() {
        let text = "top 10 products by sales last month";
        assert_eq!(redact(text), text);
    }
}

//! PII / secret scrubbing applied to candidate pattern content before it is
//! embedded or persisted. The distiller calls through the [`Scrubber`]
//! capability and never bypasses it.

/// Pure text-sanitization capability.
pub trait Scrubber: Send + Sync {
    fn name(&self) -> &str;
    fn scrub(&self, input: &str) -> String;
}

/// Pass-through scrubber for hosts that sanitize upstream.
pub struct NoopScrubber;

impl Scrubber for NoopScrubber {
    fn name(&self) -> &str {
        "noop"
    }

    fn scrub(&self, input: &str) -> String {
        input.to_string()
    }
}

const REDACTED: &str = "[REDACTED]";

/// Known secret-token prefixes. A prefix match redacts through the end of
/// the token.
const PREFIX_MARKERS: [&str; 10] = [
    "sk-",
    "xoxb-",
    "xoxp-",
    "ghp_",
    "github_pat_",
    "hf_",
    "glpat-",
    "ya29.",
    "AIza",
    "AKIA",
];

/// Markers whose trailing value is a credential.
const VALUE_MARKERS: [&str; 9] = [
    "Authorization: Bearer ",
    "authorization: bearer ",
    "api_key=",
    "access_token=",
    "refresh_token=",
    "id_token=",
    "\"api_key\":\"",
    "\"access_token\":\"",
    "\"token\":\"",
];

/// Default scrubber: redacts secret-like tokens and email addresses.
pub struct RedactingScrubber;

impl RedactingScrubber {
    fn is_token_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '+' | '/' | '=')
    }

    fn token_end(input: &str, from: usize) -> usize {
        let mut end = from;
        for (i, c) in input[from..].char_indices() {
            if Self::is_token_char(c) {
                end = from + i + c.len_utf8();
            } else {
                break;
            }
        }
        end
    }

    fn redact_after_marker(text: &mut String, marker: &str) {
        let mut search_from = 0;
        loop {
            let Some(rel) = text[search_from..].find(marker) else {
                break;
            };

            let start = search_from + rel;
            let value_start = start + marker.len();
            let end = Self::token_end(text, value_start);

            // Bare marker without a token value.
            if end == value_start {
                search_from = value_start;
                continue;
            }

            text.replace_range(start..end, REDACTED);
            search_from = start + REDACTED.len();
        }
    }

    fn is_email_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+')
    }

    /// Redact `local@domain.tld` shapes by scanning around each `@`.
    fn redact_emails(text: &mut String) {
        loop {
            let Some(at) = text.find('@') else {
                return;
            };

            let local_start = text[..at]
                .char_indices()
                .rev()
                .take_while(|(_, c)| Self::is_email_char(*c))
                .last()
                .map_or(at, |(i, _)| i);
            let domain_end = Self::token_end(text, at + 1);
            let domain = &text[at + 1..domain_end];

            if local_start == at || domain.is_empty() || !domain.contains('.') {
                // Not an address shape; strip this '@' so the scan advances.
                text.replace_range(at..=at, "\u{1}");
                continue;
            }

            text.replace_range(local_start..domain_end, REDACTED);
        }
    }
}

impl Scrubber for RedactingScrubber {
    fn name(&self) -> &str {
        "redacting"
    }

    fn scrub(&self, input: &str) -> String {
        let needs_secret_pass = PREFIX_MARKERS
            .iter()
            .chain(VALUE_MARKERS.iter())
            .any(|marker| input.contains(marker));

        if !needs_secret_pass && !input.contains('@') {
            return input.to_string();
        }

        let mut text = input.to_string();
        for marker in PREFIX_MARKERS {
            Self::redact_after_marker(&mut text, marker);
        }
        for marker in VALUE_MARKERS {
            Self::redact_after_marker(&mut text, marker);
        }
        Self::redact_emails(&mut text);

        // Restore '@' occurrences that were not part of an address.
        text.replace('\u{1}', "@")
    }
}

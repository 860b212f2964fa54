//! Outbound text sanitization.
//!
//! Worker output occasionally leaks artifacts of the pipeline around it:
//! fragments of the payment prompt, a greeting line repeated by the model,
//! raw chat-log timestamps. The chain below is an ordered list of independent
//! transforms, each idempotent on its own output, applied in a fixed
//! sequence. Cleaning already-clean text is a no-op.

/// Fallback shown when sanitization leaves nothing to say.
pub const EMPTY_RESULT_MESSAGE: &str =
    "Nothing to report this time. Try a wider time range or a different topic.";

/// Lines containing any of these are payment-prompt leakage, not content.
const PROMPT_FRAGMENT_MARKERS: &[&str] = &["payment required", "x-payment", "/paid/", "pay to unlock"];

const TRANSFORMS: &[fn(&str) -> String] = &[
    strip_prompt_fragments,
    strip_inline_timestamps,
    collapse_repeated_lines,
];

/// Run the full chain, substituting the canned message for empty output.
pub fn sanitize(text: &str) -> String {
    let mut out = text.to_owned();
    for transform in TRANSFORMS {
        out = transform(&out);
    }

    let trimmed = out.trim();
    if trimmed.is_empty() {
        EMPTY_RESULT_MESSAGE.to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Drop whole lines that echo the payment prompt back at the user.
fn strip_prompt_fragments(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            !PROMPT_FRAGMENT_MARKERS.iter().any(|m| lower.contains(m))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove bracketed `[HH:MM]` / `[HH:MM:SS]` chat-log timestamps, along with
/// one trailing space so "word [12:30] word" closes up cleanly.
fn strip_inline_timestamps(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(len) = timestamp_len(&bytes[i..]) {
                i += len;
                // Swallow a single following space left behind by the removal.
                if bytes.get(i) == Some(&b' ') {
                    i += 1;
                }
                continue;
            }
        }
        let ch_len = utf8_char_len(bytes[i]);
        out.push_str(&text[i..i + ch_len]);
        i += ch_len;
    }

    out
}

/// Length of a `[HH:MM]` or `[HH:MM:SS]` token at the start of `bytes`,
/// or `None` if the bracket opens something else.
fn timestamp_len(bytes: &[u8]) -> Option<usize> {
    debug_assert_eq!(bytes.first(), Some(&b'['));
    let mut i = 1;
    let mut groups = 0;

    loop {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i - start != 2 {
            return None;
        }
        groups += 1;

        match bytes.get(i) {
            Some(b':') if groups < 3 => i += 1,
            Some(b']') if groups >= 2 => return Some(i + 1),
            _ => return None,
        }
    }
}

fn utf8_char_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}

/// Collapse runs of identical non-empty lines (a duplicated greeting) down
/// to a single occurrence.
fn collapse_repeated_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.lines() {
        if !line.trim().is_empty() && out.last() == Some(&line) {
            continue;
        }
        out.push(line);
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_passes_through_unchanged() {
        let text = "Here is your summary.\nThree topics came up today.";
        assert_eq!(sanitize(text), text);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let dirty = "Hello!\nHello!\n[12:30] Payment required: 0.10 USDC\nThe gist: all quiet.";
        let once = sanitize(dirty);
        assert_eq!(sanitize(&once), once);
    }

    #[test]
    fn payment_prompt_lines_are_stripped() {
        let text = "Summary below.\nPayment required: send 0.10 USDC\nAll quiet today.";
        let clean = sanitize(text);
        assert!(!clean.to_lowercase().contains("payment required"));
        assert!(clean.contains("Summary below."));
        assert!(clean.contains("All quiet today."));
    }

    #[test]
    fn paid_resource_urls_are_stripped() {
        let text = "Result ready.\nVisit https://bot.example/paid/tok-1 for details.";
        assert_eq!(sanitize(text), "Result ready.");
    }

    #[test]
    fn duplicated_greeting_survives_exactly_once() {
        let text = "Hey there! Here's your recap.\nHey there! Here's your recap.\nQuiet day overall.";
        let clean = sanitize(text);
        assert_eq!(clean.matches("Hey there! Here's your recap.").count(), 1);
        assert!(clean.contains("Quiet day overall."));
    }

    #[test]
    fn non_adjacent_repeats_are_kept() {
        // Only runs collapse; a refrain later in the text is content.
        let text = "All good.\nDetails follow.\nAll good.";
        assert_eq!(sanitize(text), text);
    }

    #[test]
    fn inline_timestamps_are_removed() {
        assert_eq!(
            sanitize("[09:15] alice said hi [23:59:59] and left"),
            "alice said hi and left"
        );
    }

    #[test]
    fn non_timestamp_brackets_are_kept() {
        let text = "See [docs] and [1:2] and [123:45] for more";
        assert_eq!(sanitize(text), text);
    }

    #[test]
    fn empty_input_gets_canned_message() {
        assert_eq!(sanitize(""), EMPTY_RESULT_MESSAGE);
        assert_eq!(sanitize("   \n  "), EMPTY_RESULT_MESSAGE);
    }

    #[test]
    fn fully_stripped_input_gets_canned_message() {
        let text = "[10:00]\nPayment required: 0.10 USDC";
        assert_eq!(sanitize(text), EMPTY_RESULT_MESSAGE);
    }

    #[test]
    fn canned_message_is_itself_clean() {
        assert_eq!(sanitize(EMPTY_RESULT_MESSAGE), EMPTY_RESULT_MESSAGE);
    }

    #[test]
    fn unicode_content_is_preserved() {
        let text = "Résumé ✅ of today's chat 🦀";
        assert_eq!(sanitize(text), text);
    }
}

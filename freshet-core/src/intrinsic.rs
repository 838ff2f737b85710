//! Submission-time intrinsic evaluation.
//!
//! Operator configuration expressions and import subscriptions may contain
//! textual calls to the `getChannel()` family. Replication resolves them to
//! literal integers before the physical model is emitted; all surrounding
//! text is left untouched, so evaluation is idempotent.

use crate::errors::TransformError;

/// The recognized call names. Channel-valued names come first, width-valued
/// names second.
const CHANNEL_CALLS: [&str; 3] = ["getChannel", "getLocalChannel", "getAllChannels"];
const MAX_CHANNEL_CALLS: [&str; 3] = [
    "getMaxChannels",
    "getLocalMaxChannels",
    "getAllMaxChannels",
];

/// Replaces every `getChannel()`-family call site in `text` with its literal
/// integer value. Call sites must have balanced parentheses and an empty
/// argument list.
pub fn eval_intrinsic(
    text: &str,
    channel_index: i64,
    max_channels: i64,
) -> Result<String, TransformError> {
    substitute(text, channel_index, max_channels)
}

/// Subscription-property variant. Properties use the same call grammar; the
/// property text as a whole is otherwise opaque to the planner.
pub fn eval_subscription(
    property_text: &str,
    channel_index: i64,
    max_channels: i64,
) -> Result<String, TransformError> {
    substitute(property_text, channel_index, max_channels)
}

/// Does `text` mention any of the six call names at all? Used to skip the
/// rewrite on the vast majority of expressions.
pub fn mentions_intrinsic(text: &str) -> bool {
    CHANNEL_CALLS
        .iter()
        .chain(MAX_CHANNEL_CALLS.iter())
        .any(|name| text.contains(name))
}

fn substitute(text: &str, channel_index: i64, max_channels: i64) -> Result<String, TransformError> {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        match call_at(text, pos) {
            Some((name, value_is_channel)) => {
                let after_name = pos + name.len();
                let close = matching_close(text, after_name).ok_or_else(|| {
                    TransformError::IntrinsicEvalFailure {
                        text: text.to_string(),
                        reason: format!("unbalanced parentheses after `{name}` at offset {pos}"),
                    }
                })?;
                let args = text[after_name + 1..close].trim();
                if !args.is_empty() {
                    return Err(TransformError::IntrinsicEvalFailure {
                        text: text.to_string(),
                        reason: format!("`{name}` takes no arguments, found `{args}`"),
                    });
                }
                let value = if value_is_channel {
                    channel_index
                } else {
                    max_channels
                };
                out.push_str(&value.to_string());
                pos = close + 1;
            }
            None => {
                let ch = text[pos..].chars().next().unwrap_or('\0');
                out.push(ch);
                pos += ch.len_utf8();
            }
        }
    }

    Ok(out)
}

/// If an intrinsic call name starts at `pos` (not embedded in a longer
/// identifier) and is followed by `(`, returns the name and whether it is
/// channel-valued.
fn call_at(text: &str, pos: usize) -> Option<(&'static str, bool)> {
    if pos > 0 && is_ident_byte(text.as_bytes()[pos - 1]) {
        return None;
    }
    let rest = &text[pos..];
    for (names, is_channel) in [(CHANNEL_CALLS, true), (MAX_CHANNEL_CALLS, false)] {
        for name in names {
            if let Some(after) = rest.strip_prefix(name) {
                if after.trim_start().starts_with('(') {
                    return Some((name, is_channel));
                }
            }
        }
    }
    None
}

/// Finds the `)` matching the `(` at or after `open_from` (skipping leading
/// whitespace). Returns its byte offset.
fn matching_close(text: &str, open_from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut pos = open_from;
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    if pos >= bytes.len() || bytes[pos] != b'(' {
        return None;
    }
    let mut depth = 0usize;
    for (offset, b) in bytes.iter().enumerate().skip(pos) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_ident_byte(b: u8) -> bool {
    b == b'_' || b.is_ascii_alphanumeric()
}

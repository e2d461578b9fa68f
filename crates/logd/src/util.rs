// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Utility functions for logd configuration.

/// Parses and validates a storage key prefix.
///
/// A valid prefix must:
/// - Start with an ASCII letter
/// - Contain only ASCII alphanumerics, underscores, periods or dashes
/// - Not be empty or contain only whitespace
///
/// Colons are rejected because they separate the segments of every key.
/// Whitespace is automatically trimmed from the input.
///
/// # Examples
///
/// ```
/// use logd::util::parse_key_prefix;
///
/// assert_eq!(parse_key_prefix("logd"), Some("logd".to_string()));
/// assert_eq!(parse_key_prefix(" logd-staging "), Some("logd-staging".to_string()));
/// assert_eq!(parse_key_prefix("1logd"), None);
/// assert_eq!(parse_key_prefix("logd:x"), None);
/// ```
pub fn parse_key_prefix(prefix: &str) -> Option<String> {
    let trimmed = prefix.trim();
    let mut chars = trimmed.chars();

    match chars.next() {
        Some(first_char) if first_char.is_ascii_alphabetic() => {}
        Some(_) => {
            tracing::error!(
                "LOGD_PREFIX must start with a letter, got: '{}'. Rejecting configuration.",
                trimmed
            );
            return None;
        }
        None => return None,
    }

    if let Some(invalid_char) =
        chars.find(|&ch| !ch.is_ascii_alphanumeric() && ch != '_' && ch != '.' && ch != '-')
    {
        tracing::error!(
            "LOGD_PREFIX contains invalid character '{}' in '{}'. Only ASCII alphanumerics, underscores, periods and dashes are allowed. Rejecting configuration.",
            invalid_char, trimmed
        );
        return None;
    }

    Some(trimmed.to_string())
}

use std::sync::LazyLock;

use regex::Regex;

static USERNAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x{4e00}-\x{9fa5}a-zA-Z0-9]").expect("valid regex"));

/// Reduces a provider display name to a username suggestion.
///
/// Only CJK unified ideographs (U+4E00..=U+9FA5) and ASCII alphanumerics
/// survive, in their original order. The result may be empty.
pub fn username_seed(display_name: &str) -> String {
    USERNAME_CHARS
        .find_iter(display_name)
        .map(|m| m.as_str())
        .collect()
}

use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/v\d+(?:beta)?$").expect("valid version suffix regex"));

/// Appends `/v1` to OpenAI-style base URLs that carry no API version.
/// A trailing `#` keeps the URL exactly as written (minus the `#`).
pub fn normalize_base_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if trimmed.ends_with('#') {
        return trimmed.trim_end_matches('#').to_string();
    }

    let without_slash = trimmed.trim_end_matches('/');
    if VERSION_SUFFIX_RE.is_match(without_slash) || without_slash.contains("/v1/") {
        without_slash.to_string()
    } else {
        format!("{without_slash}/v1")
    }
}

pub(crate) fn resolve_base_url(base_url: &str, default: &str) -> String {
    if base_url.trim().is_empty() {
        normalize_base_url(default)
    } else {
        normalize_base_url(base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_v1_when_missing() {
        assert_eq!(
            normalize_base_url("http://localhost:1234"),
            "http://localhost:1234/v1"
        );
        assert_eq!(
            normalize_base_url(" https://example.com/ "),
            "https://example.com/v1"
        );
    }

    #[test]
    fn keeps_existing_version() {
        assert_eq!(
            normalize_base_url("https://example.com/v2/"),
            "https://example.com/v2"
        );
        assert_eq!(
            normalize_base_url("http://localhost:1234/v1"),
            "http://localhost:1234/v1"
        );
    }

    #[test]
    fn respects_hash_suffix() {
        assert_eq!(
            normalize_base_url("https://example.com/openai#"),
            "https://example.com/openai"
        );
    }

    #[test]
    fn empty_base_url_uses_default() {
        assert_eq!(
            resolve_base_url("  ", "https://api.openai.com/v1"),
            "https://api.openai.com/v1"
        );
        assert_eq!(normalize_base_url(""), "");
    }
}

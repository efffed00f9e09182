use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn scheme_relative_media() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)(<(?:img|video)[^>]+?src=["'])//"#).ok())
        .as_ref()
}

fn media_src() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<(?:img|video)[^>]+?src=["']([^"']+)["']"#).ok())
        .as_ref()
}

/// Rewrite scheme-relative `src` attributes of `<img>` and `<video>` tags to `https:`.
pub fn complete_media_urls(content: &str) -> String {
    match scheme_relative_media() {
        Some(re) => re.replace_all(content, "${1}https://").into_owned(),
        None => content.to_string(),
    }
}

/// Complete a scheme-relative URL (`//host/path`) with `https:`.
pub fn complete_scheme_relative(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_string()
    }
}

/// Collect the http(s) sources of `<img>` and `<video>` tags, in document order.
///
/// Duplicates are removed; relative and `data:` sources are ignored.
pub fn media_sources(content: &str) -> Vec<String> {
    let Some(re) = media_src() else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    re.captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| complete_scheme_relative(m.as_str().trim()))
        .filter(|src| {
            let lower = src.to_ascii_lowercase();
            lower.starts_with("http://") || lower.starts_with("https://")
        })
        .filter(|src| seen.insert(src.clone()))
        .collect()
}

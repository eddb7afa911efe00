//! Flat `KEY=value` record files.
//!
//! Settings, the stage configuration and `/etc/os-release` all share this
//! shape: one record per line, `#` comments, blank lines ignored, and the last
//! occurrence of a key wins. Values may be wrapped in double or single quotes
//! (os-release does this); quotes are stripped on read and never written.

use std::collections::BTreeMap;

/// Parse `KEY=value` lines into a map.
///
/// Lines without `=` are skipped. Keys are trimmed; values are trimmed and
/// unquoted.
pub fn parse(content: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    map
}

/// Render ordered pairs as `KEY=value` lines with an optional comment header.
pub fn render<'a, I>(header: Option<&str>, pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();
    if let Some(header) = header {
        for line in header.lines() {
            out.push_str("# ");
            out.push_str(line);
            out.push('\n');
        }
    }
    for (key, value) in pairs {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

//! Utility functions for miniroute

use crate::common::{Error, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Node path separator
pub const PATH_SEPARATOR: char = '/';

/// Percent-encoding set for node names (addresses must stay a single path segment)
const NODE_NAME_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'%')
    .add(b' ')
    .add(b'?')
    .add(b'#');

/// Encode an address into a node name
pub fn encode_node_name(addr: &str) -> String {
    utf8_percent_encode(addr, NODE_NAME_ENCODE_SET).to_string()
}

/// Decode a node name back into an address
pub fn decode_node_name(name: &str) -> Result<String> {
    percent_decode_str(name)
        .decode_utf8()
        .map(|s| s.to_string())
        .map_err(|e| Error::Other(format!("Failed to decode node name {:?}: {}", name, e)))
}

/// Validate and normalise a node path: absolute, no trailing separator,
/// no empty segments.
pub fn normalize_path(path: &str) -> Result<String> {
    let trimmed = path.trim_end_matches(PATH_SEPARATOR);
    if !trimmed.starts_with(PATH_SEPARATOR) {
        return Err(Error::InvalidPath(path.to_string()));
    }
    if trimmed[1..].split(PATH_SEPARATOR).any(str::is_empty) {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Every prefix of a normalised path, shortest first: `/a/b` -> `["/a", "/a/b"]`
pub fn path_prefixes(path: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut current = String::new();
    for segment in path.split(PATH_SEPARATOR).filter(|s| !s.is_empty()) {
        current.push(PATH_SEPARATOR);
        current.push_str(segment);
        prefixes.push(current.clone());
    }
    prefixes
}

/// Parent of a normalised path (`None` for the root's direct children' parent)
pub fn parent_path(path: &str) -> Option<&str> {
    match path.rfind(PATH_SEPARATOR) {
        Some(0) if path.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}

/// Last segment of a normalised path
pub fn node_name(path: &str) -> &str {
    path.rsplit(PATH_SEPARATOR).next().unwrap_or(path)
}

/// Join a directory and an address into the address's node path
pub fn child_path(dir: &str, addr: &str) -> String {
    format!(
        "{}{}{}",
        dir.trim_end_matches(PATH_SEPARATOR),
        PATH_SEPARATOR,
        encode_node_name(addr)
    )
}

/// Current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse duration string (e.g., "500ms", "30s", "5m")
pub fn parse_duration(s: &str) -> Result<std::time::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidConfig("empty duration".into()));
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::InvalidConfig(format!("missing duration unit: {}", s)))?;
    let (num_str, unit) = s.split_at(split);

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let secs_per_unit = match unit {
        "ms" => return Ok(std::time::Duration::from_millis(num)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => {
            return Err(Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };
    let secs = num
        .checked_mul(secs_per_unit)
        .ok_or_else(|| Error::InvalidConfig(format!("duration out of range: {}", s)))?;

    Ok(std::time::Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/redis/").unwrap(), "/redis");
        assert_eq!(normalize_path("/a/b").unwrap(), "/a/b");
        assert!(normalize_path("redis").is_err());
        assert!(normalize_path("/").is_err());
        assert!(normalize_path("/a//b").is_err());
    }

    #[test]
    fn test_path_prefixes() {
        assert_eq!(path_prefixes("/a/b/c"), vec!["/a", "/a/b", "/a/b/c"]);
        assert!(path_prefixes("/").is_empty());
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent_path("/a/b"), Some("/a"));
        assert_eq!(parent_path("/a"), Some("/"));
        assert_eq!(parent_path("/"), None);
        assert_eq!(node_name("/a/b"), "b");
    }

    #[test]
    fn test_node_name_encoding() {
        assert_eq!(encode_node_name("10.0.0.1:6379"), "10.0.0.1:6379");
        let odd = "unix:/tmp/redis.sock";
        let encoded = encode_node_name(odd);
        assert!(!encoded.contains('/'));
        assert_eq!(decode_node_name(&encoded).unwrap(), odd);
        assert_eq!(child_path("/redis/", odd), format!("/redis/{}", encoded));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("xs").is_err());
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert!(matches!(
            parse_duration("999999999999999999m"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            parse_duration("99999999999999999999s"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(parse_duration(&format!("{}s", u64::MAX)).is_ok());
    }
}

//! HTTP header multimap
//!
//! Headers are stored in insertion order and support case-insensitive
//! lookups with multiple values per name. Field names starting with `:` are
//! pseudo-headers reserved for protocol metadata.

use super::{Error, Result, MAX_HEADERS};
use std::fmt;

/// Pseudo-header names reserved by the framework.
pub const PSEUDO_METHOD: &str = ":method";
pub const PSEUDO_PATH: &str = ":path";
pub const PSEUDO_SCHEME: &str = ":scheme";
pub const PSEUDO_AUTHORITY: &str = ":authority";
pub const PSEUDO_STATUS: &str = ":status";
pub const PSEUDO_BODY: &str = ":body";
pub const PSEUDO_PHRASE: &str = ":phrase";
pub const PSEUDO_QUERY: &str = ":query";

/// Whether `name` is a reserved pseudo-header.
pub fn is_pseudo(name: &str) -> bool {
    name.starts_with(':')
}

/// Whether a field may be emitted on the wire: non-empty name, no CR or LF
/// in either name or value.
pub fn is_valid_field(name: &str, value: &str) -> bool {
    !name.is_empty()
        && !name.contains(['\r', '\n'])
        && !value.contains(['\r', '\n'])
}

/// HTTP headers collection.
///
/// Keys preserve their case for emission; lookup and comparison are ASCII
/// case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty headers collection.
    pub fn new() -> Self {
        Headers {
            headers: Vec::new(),
        }
    }

    /// Insert a header.
    ///
    /// An existing header with the same name gains another value rather
    /// than being replaced.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.headers.len() >= MAX_HEADERS {
            // Silently ignore past the cap.
            return;
        }
        self.headers.push((name.into(), value.into()));
    }

    /// Get the first value for a header (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header (case-insensitive).
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Count how many times a header appears.
    pub fn count(&self, name: &str) -> usize {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .count()
    }

    /// Check if a header exists.
    pub fn contains(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove all instances of a header, returning how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let initial_len = self.headers.len();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        initial_len - self.headers.len()
    }

    /// Move every header from `other` into this collection, preserving
    /// order.
    pub fn merge(&mut self, other: Headers) {
        for (name, value) in other.headers {
            self.insert(name, value);
        }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn clear(&mut self) {
        self.headers.clear();
    }

    /// Iterate over all headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse a header line into name and value.
    ///
    /// Splits on the first `:` and strips surrounding whitespace from the
    /// value; the name keeps its case.
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();

            if name.is_empty() {
                return Err(Error::InvalidRequestFormat(
                    "empty header name".to_string(),
                ));
            }

            Ok((name, value))
        } else {
            Err(Error::InvalidRequestFormat(format!(
                "no colon in header: {}",
                line
            )))
        }
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");
        headers.insert("Content-Length", "42");

        assert_eq!(headers.get("Content-Type"), Some("text/html"));
        assert_eq!(headers.get("Content-Length"), Some("42"));
        assert_eq!(headers.get("Missing"), None);
    }

    #[test]
    fn test_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");

        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
    }

    #[test]
    fn test_multiple_values() {
        let mut headers = Headers::new();
        headers.insert("Set-Cookie", "a=1");
        headers.insert("Set-Cookie", "b=2");
        headers.insert("Set-Cookie", "c=3");

        let values = headers.get_all("Set-Cookie");
        assert_eq!(values, vec!["a=1", "b=2", "c=3"]);
        assert_eq!(headers.count("Set-Cookie"), 3);
        assert_eq!(headers.get("Set-Cookie"), Some("a=1"));
    }

    #[test]
    fn test_remove() {
        let mut headers = Headers::new();
        headers.insert("X-Remove", "value1");
        headers.insert("X-Keep", "value2");
        headers.insert("X-Remove", "value3");

        assert_eq!(headers.remove("x-remove"), 2);
        assert_eq!(headers.get("X-Remove"), None);
        assert_eq!(headers.get("X-Keep"), Some("value2"));
    }

    #[test]
    fn test_merge_preserves_order() {
        let mut base = Headers::new();
        base.insert("A", "1");
        let mut extra = Headers::new();
        extra.insert("B", "2");
        extra.insert("A", "3");
        base.merge(extra);

        let collected: Vec<_> = base.iter().collect();
        assert_eq!(collected, vec![("A", "1"), ("B", "2"), ("A", "3")]);
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = Headers::parse_header_line("Content-Type: text/html").unwrap();
        assert_eq!(name, "Content-Type");
        assert_eq!(value, "text/html");

        let (name, value) = Headers::parse_header_line("X-Custom:  value  ").unwrap();
        assert_eq!(name, "X-Custom");
        assert_eq!(value, "value");

        assert!(Headers::parse_header_line("Invalid").is_err());
        assert!(Headers::parse_header_line(": value").is_err());
    }

    #[test]
    fn test_max_headers() {
        let mut headers = Headers::new();
        for i in 0..MAX_HEADERS + 10 {
            headers.insert(format!("Header-{}", i), "value");
        }
        assert_eq!(headers.len(), MAX_HEADERS);
    }

    #[test]
    fn test_is_valid_field() {
        assert!(is_valid_field("X-Ok", "fine"));
        assert!(!is_valid_field("", "fine"));
        assert!(!is_valid_field("X-Bad\r\n", "fine"));
        assert!(!is_valid_field("X-Ok", "bad\r\nInjected: yes"));
        assert!(!is_valid_field("X-Ok", "bad\nvalue"));
    }

    #[test]
    fn test_is_pseudo() {
        assert!(is_pseudo(PSEUDO_STATUS));
        assert!(is_pseudo(":body"));
        assert!(!is_pseudo("Host"));
    }
}

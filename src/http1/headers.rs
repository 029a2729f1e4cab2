//! Ordered header collection with case-insensitive lookup.
//!
//! Insertion order is preserved because the upgrade leg is sensitive to it:
//! some frontends only honor the handshake when `Upgrade`, `Connection` and
//! `HTTP2-Settings` arrive in the expected order with their expected casing.

use std::fmt;

use super::{ParseError, MAX_HEADERS};

/// Header collection. Multiple values per name are kept as separate entries.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers {
            entries: Vec::new(),
        }
    }

    /// Append a header. Existing values for the same name are kept; entries
    /// beyond [`MAX_HEADERS`] are dropped.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.entries.len() >= MAX_HEADERS {
            return;
        }
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, case-insensitive, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove every value for `name`, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Distinct header names, lowercased, in first-seen order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (n, _) in &self.entries {
            let lower = n.to_ascii_lowercase();
            if !names.contains(&lower) {
                names.push(lower);
            }
        }
        names
    }

    /// Parse a `Name: value` line.
    pub fn parse_line(line: &str) -> Result<(String, String), ParseError> {
        let colon = line
            .find(':')
            .ok_or_else(|| ParseError::Header(line.to_string()))?;
        let name = line[..colon].trim();
        if name.is_empty() {
            return Err(ParseError::Header(line.to_string()));
        }
        let value = line[colon + 1..].trim();
        Ok((name.to_string(), value.to_string()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            writeln!(f, "{name}: {value}")?;
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
    fn insert_and_lookup_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        headers.insert("X-Internal-Debug", "1");

        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(headers.get("missing"), None);
        assert!(headers.contains("x-internal-debug"));
    }

    #[test]
    fn multiple_values_keep_order() {
        let mut headers = Headers::new();
        headers.insert("Set-Cookie", "a=1");
        headers.insert("Set-Cookie", "b=2");

        assert_eq!(headers.get("set-cookie"), Some("a=1"));
        assert_eq!(headers.get_all("set-cookie"), vec!["a=1", "b=2"]);
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn remove_drops_all_values() {
        let mut headers = Headers::new();
        headers.insert("X-A", "1");
        headers.insert("X-B", "2");
        headers.insert("x-a", "3");

        assert_eq!(headers.remove("X-A"), 2);
        assert!(!headers.contains("x-a"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn names_are_lowercased_and_deduped() {
        let mut headers = Headers::new();
        headers.insert("Server", "nginx");
        headers.insert("Set-Cookie", "a=1");
        headers.insert("SET-COOKIE", "b=2");

        assert_eq!(headers.names(), vec!["server", "set-cookie"]);
    }

    #[test]
    fn parse_line_variants() {
        assert_eq!(
            Headers::parse_line("Upgrade: h2c").unwrap(),
            ("Upgrade".to_string(), "h2c".to_string())
        );
        assert_eq!(
            Headers::parse_line("X:  padded  ").unwrap(),
            ("X".to_string(), "padded".to_string())
        );
        assert!(Headers::parse_line("no colon here").is_err());
        assert!(Headers::parse_line(": empty name").is_err());
    }

    #[test]
    fn entries_are_capped() {
        let mut headers = Headers::new();
        for i in 0..MAX_HEADERS + 5 {
            headers.insert(format!("h-{i}"), "v");
        }
        assert_eq!(headers.len(), MAX_HEADERS);
    }
}

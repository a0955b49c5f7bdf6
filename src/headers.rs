//! Ordered, case-insensitive header collection.

/// Response header block.
///
/// Names compare case-insensitively. Iteration follows first-insertion order;
/// setting an existing name replaces its value in place (last write wins).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets `name` to `value`. An existing entry keeps its position and the
    /// spelling it was first inserted with.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Removes `name`, returning its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.set(k, v);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut h = Headers::new();
        h.set("Content-Type", "text/plain");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert!(h.contains("CONTENT-TYPE"));
    }

    #[test]
    fn last_write_wins_in_first_position() {
        let mut h = Headers::new();
        h.set("Date", "x");
        h.set("Content-Length", "1");
        h.set("date", "y");

        let names: Vec<_> = h.iter().collect();
        assert_eq!(names, vec![("Date", "y"), ("Content-Length", "1")]);
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn remove_returns_previous_value() {
        let mut h: Headers = [("Location", "/a")].into_iter().collect();
        assert_eq!(h.remove("location").as_deref(), Some("/a"));
        assert_eq!(h.remove("location"), None);
        assert!(h.is_empty());
    }
}

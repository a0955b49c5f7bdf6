//! Method + path-template predicates.
//!
//! A template is a `/`-separated list of segments. A segment starting with
//! `:` captures whatever single, non-empty segment sits in that position;
//! every other segment must match literally. Templates and paths must have
//! the same number of segments: there are no wildcards.
//!
//! Each matcher compiles its template into its own one-route [`matchit`]
//! tree. The [`Router`](crate::Router) keeps the matchers in a list and asks
//! them in registration order, so overlapping templates never compete on
//! specificity: the first one registered wins.

use std::collections::HashMap;

use matchit::Router as MatchitRouter;

/// One or more accepted HTTP methods, compared case-insensitively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Methods(Vec<String>);

impl Methods {
    pub fn contains(&self, method: &str) -> bool {
        self.0.iter().any(|m| m.eq_ignore_ascii_case(method))
    }
}

impl From<&str> for Methods {
    fn from(method: &str) -> Self { Self(vec![method.to_ascii_uppercase()]) }
}

impl From<String> for Methods {
    fn from(method: String) -> Self { Self::from(method.as_str()) }
}

impl From<http::Method> for Methods {
    fn from(method: http::Method) -> Self { Self::from(method.as_str()) }
}

impl<const N: usize> From<[&str; N]> for Methods {
    fn from(methods: [&str; N]) -> Self {
        Self(methods.iter().map(|m| m.to_ascii_uppercase()).collect())
    }
}

impl From<Vec<String>> for Methods {
    fn from(methods: Vec<String>) -> Self {
        Self(methods.into_iter().map(|m| m.to_ascii_uppercase()).collect())
    }
}

/// Predicate + param extractor for one method set and path template.
///
/// Pure: matching touches no shared state, so one matcher serves any number
/// of concurrent requests.
pub struct RequestMatcher {
    methods: Methods,
    template: String,
    tree: MatchitRouter<()>,
}

impl RequestMatcher {
    /// # Panics
    ///
    /// Panics if the template cannot be compiled (e.g. a capture segment
    /// with a name matchit rejects). Routes are registered at startup, so
    /// this surfaces configuration mistakes immediately.
    pub fn new(methods: impl Into<Methods>, template: &str) -> Self {
        let mut tree = MatchitRouter::new();
        tree.insert(to_matchit(template), ())
            .unwrap_or_else(|e| panic!("invalid route `{template}`: {e}"));
        Self { methods: methods.into(), template: template.to_owned(), tree }
    }

    pub fn methods(&self) -> &Methods {
        &self.methods
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Returns the decoded captures when `method` and `path` match, `None`
    /// otherwise. Never fails.
    pub fn matches(&self, method: &str, path: &str) -> Option<HashMap<String, String>> {
        if !self.methods.contains(method) {
            return None;
        }
        let matched = self.tree.at(path).ok()?;
        let mut params = HashMap::with_capacity(matched.params.len());
        for (name, value) in matched.params.iter() {
            if value.is_empty() {
                return None;
            }
            params.insert(name.to_owned(), percent_decode(value));
        }
        Some(params)
    }
}

impl std::fmt::Debug for RequestMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestMatcher")
            .field("methods", &self.methods)
            .field("template", &self.template)
            .finish()
    }
}

/// Rewrites `:name` segments into matchit's `{name}` and escapes braces in
/// literal segments.
fn to_matchit(template: &str) -> String {
    template
        .split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) if !name.is_empty() => format!("{{{name}}}"),
            _ => segment.replace('{', "{{").replace('}', "}}"),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Decodes `%XX` escapes; malformed escapes are kept verbatim.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

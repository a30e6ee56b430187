/// Decides which paths bypass region handling entirely.
#[derive(Clone, Debug)]
pub struct PathMatcher {
    excluded_prefixes: Vec<String>,
}

impl PathMatcher {
    pub fn new(excluded_prefixes: Vec<String>) -> Self {
        Self { excluded_prefixes }
    }

    /// True when the text after the leading slash starts with an excluded
    /// prefix. Prefixes are not segment-aware: "apis" matches "api".
    pub fn is_excluded(&self, path: &str) -> bool {
        let rest = path.strip_prefix('/').unwrap_or(path);
        self.excluded_prefixes
            .iter()
            .any(|prefix| rest.starts_with(prefix.as_str()))
    }
}

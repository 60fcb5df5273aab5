//! Request path normalization and open-path matching.

/// Normalize a path for signing and matching.
///
/// Leading slash enforced, query stripped, trailing slashes removed except
/// for the root.
pub fn normalize_path(raw: &str) -> String {
    let path = raw.split(['?', '#']).next().unwrap_or_default();
    if path.is_empty() {
        return "/".to_string();
    }

    let with_slash = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    let trimmed = with_slash.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
}

/// Path pattern with `:param` single-segment wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a pattern such as `/api/v1/assets/:assetId/file`.
    pub fn new(pattern: &str) -> Self {
        let normalized = normalize_path(pattern);
        let segments = normalized
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s.starts_with(':') {
                    Segment::Param
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();

        Self {
            source: pattern.to_string(),
            segments,
        }
    }

    /// Original pattern text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a request path (normalized first).
    pub fn matches(&self, path: &str) -> bool {
        let normalized = normalize_path(path);
        if self.segments.is_empty() {
            return normalized == "/";
        }
        if normalized == "/" {
            return false;
        }

        let parts: Vec<&str> = normalized[1..].split('/').collect();
        if parts.len() != self.segments.len() {
            return false;
        }

        self.segments
            .iter()
            .zip(parts)
            .all(|(segment, part)| match segment {
                Segment::Param => !part.is_empty(),
                Segment::Literal(literal) => literal == part,
            })
    }
}

/// Allowlist of paths exempt from forced secure mode.
#[derive(Debug, Clone, Default)]
pub struct OpenPaths {
    patterns: Vec<PathPattern>,
}

impl OpenPaths {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| PathPattern::new(p.as_ref()))
                .collect(),
        }
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }
}

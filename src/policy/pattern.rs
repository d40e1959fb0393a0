//! Path patterns and document paths.
//!
//! A pattern is a sequence of segment matchers resolved once at load time:
//! a literal segment must match exactly, a `{name}` wildcard matches any
//! single non-empty segment and binds it. A pattern only ever matches a
//! path with the same segment count.

use std::collections::HashMap;

use crate::policy::errors::PolicyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Wildcard(String),
}

/// A compiled path pattern, e.g. `users/{userId}/connections/{connectionId}`.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

/// A concrete, validated document path, e.g. `users/abc/connections/xyz`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPath {
    segments: Vec<String>,
}

fn valid_wildcard_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, PolicyError> {
        if raw.is_empty() {
            return Err(PolicyError::InvalidPattern("empty pattern".into()));
        }

        let mut segments = Vec::new();
        let mut names = Vec::new();
        for seg in raw.split('/') {
            if seg.is_empty() {
                return Err(PolicyError::InvalidPattern(format!(
                    "`{raw}` contains an empty segment"
                )));
            }
            if let Some(name) = seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                if !valid_wildcard_name(name) {
                    return Err(PolicyError::InvalidPattern(format!(
                        "`{raw}` has an invalid wildcard name `{name}`"
                    )));
                }
                if names.contains(&name) {
                    return Err(PolicyError::InvalidPattern(format!(
                        "`{raw}` binds `{name}` more than once"
                    )));
                }
                names.push(name);
                segments.push(Segment::Wildcard(name.to_string()));
            } else if seg.contains('{') || seg.contains('}') {
                return Err(PolicyError::InvalidPattern(format!(
                    "`{raw}` has a malformed segment `{seg}`"
                )));
            } else {
                segments.push(Segment::Literal(seg.to_string()));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Match a path against this pattern, returning the wildcard bindings.
    pub fn match_path(&self, path: &DocumentPath) -> Option<HashMap<String, String>> {
        if self.segments.len() != path.segments.len() {
            return None;
        }
        let mut bindings = HashMap::new();
        for (matcher, seg) in self.segments.iter().zip(&path.segments) {
            match matcher {
                Segment::Literal(lit) => {
                    if lit != seg {
                        return None;
                    }
                }
                Segment::Wildcard(name) => {
                    bindings.insert(name.clone(), seg.clone());
                }
            }
        }
        Some(bindings)
    }

    pub fn wildcard_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Wildcard(_)))
            .count()
    }

    /// Number of leading literal segments, used to break specificity ties
    /// between patterns with the same wildcard count.
    pub fn literal_prefix_len(&self) -> usize {
        self.segments
            .iter()
            .take_while(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Lower sorts first = more specific: fewest wildcards, then longest
    /// literal prefix.
    pub fn specificity_key(&self) -> (usize, std::cmp::Reverse<usize>) {
        (
            self.wildcard_count(),
            std::cmp::Reverse(self.literal_prefix_len()),
        )
    }

    /// Whether some concrete path could match both patterns.
    pub fn overlaps(&self, other: &Self) -> bool {
        if self.segments.len() != other.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(&other.segments)
            .all(|(a, b)| match (a, b) {
                (Segment::Literal(x), Segment::Literal(y)) => x == y,
                _ => true,
            })
    }
}

impl std::fmt::Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl DocumentPath {
    pub fn parse(raw: &str) -> Result<Self, PolicyError> {
        if raw.is_empty() {
            return Err(PolicyError::InvalidPath(raw.to_string()));
        }
        let mut segments = Vec::new();
        for seg in raw.split('/') {
            if seg.is_empty() || seg.contains('{') || seg.contains('}') {
                return Err(PolicyError::InvalidPath(raw.to_string()));
            }
            segments.push(seg.to_string());
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl std::fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pattern() {
        let p = PathPattern::parse("users/{userId}/connections/{connectionId}").unwrap();
        assert_eq!(p.wildcard_count(), 2);
        assert_eq!(p.literal_prefix_len(), 1);
        assert_eq!(p.to_string(), "users/{userId}/connections/{connectionId}");
    }

    #[test]
    fn test_parse_pattern_rejects_malformed() {
        assert!(PathPattern::parse("").is_err());
        assert!(PathPattern::parse("users//x").is_err());
        assert!(PathPattern::parse("users/{").is_err());
        assert!(PathPattern::parse("users/{}").is_err());
        assert!(PathPattern::parse("users/{user-id}").is_err());
        assert!(PathPattern::parse("users/{id}/things/{id}").is_err());
    }

    #[test]
    fn test_match_binds_wildcards() {
        let p = PathPattern::parse("users/{userId}/missions/{missionId}").unwrap();
        let path = DocumentPath::parse("users/abc/missions/m1").unwrap();
        let bindings = p.match_path(&path).unwrap();
        assert_eq!(bindings["userId"], "abc");
        assert_eq!(bindings["missionId"], "m1");
    }

    #[test]
    fn test_match_requires_equal_segment_count() {
        let p = PathPattern::parse("users/{userId}").unwrap();
        let nested = DocumentPath::parse("users/abc/connections/xyz").unwrap();
        assert!(p.match_path(&nested).is_none());
    }

    #[test]
    fn test_match_literal_must_equal() {
        let p = PathPattern::parse("users/{userId}/missions/{id}").unwrap();
        let path = DocumentPath::parse("users/abc/inventory/i1").unwrap();
        assert!(p.match_path(&path).is_none());
    }

    #[test]
    fn test_specificity_prefers_fewer_wildcards() {
        let literal = PathPattern::parse("shop_items/{itemId}").unwrap();
        let loose = PathPattern::parse("{collection}/{id}").unwrap();
        assert!(literal.specificity_key() < loose.specificity_key());
    }

    #[test]
    fn test_overlap_detection() {
        let a = PathPattern::parse("users/{userId}").unwrap();
        let b = PathPattern::parse("{collection}/{id}").unwrap();
        let c = PathPattern::parse("reports/{reportId}").unwrap();
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&c));
        assert!(!a.overlaps(&c));
        let nested = PathPattern::parse("users/{userId}/missions/{id}").unwrap();
        assert!(!a.overlaps(&nested));
    }

    #[test]
    fn test_document_path_rejects_malformed() {
        assert!(DocumentPath::parse("").is_err());
        assert!(DocumentPath::parse("/users/abc").is_err());
        assert!(DocumentPath::parse("users/abc/").is_err());
        assert!(DocumentPath::parse("users/{userId}").is_err());
    }
}

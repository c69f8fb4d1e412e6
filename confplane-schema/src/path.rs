//! Path addressing into schema-modeled trees.

use crate::error::SchemaError;
use std::fmt;
use std::str::FromStr;

/// A slash-separated path into a data tree, e.g. `/interfaces/eth0/enabled`.
///
/// The empty path (`/`) addresses the tree root. Segments are opaque
/// strings; list entries are addressed by their key value as a segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataPath {
    segments: Vec<String>,
}

impl DataPath {
    /// Returns the root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Builds a path from owned segments.
    pub fn from_segments(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Parses a path from its string form.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(SchemaError::InvalidPath {
                reason: "path must not be blank".to_string(),
            });
        }
        let body = trimmed.strip_prefix('/').unwrap_or(trimmed);
        if body.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for segment in body.split('/') {
            if segment.is_empty() {
                return Err(SchemaError::InvalidPath {
                    reason: format!("empty segment in '{}'", s),
                });
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Returns the path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns true if this is the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the path depth.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Returns a new path with the given segment appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Returns the parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Returns the last segment, or `None` for the root.
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// Returns true if `self` is a prefix of `other` (or equal to it).
    pub fn is_prefix_of(&self, other: &DataPath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for DataPath {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for DataPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for DataPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let path = DataPath::parse("/interfaces/eth0/enabled").unwrap();
        assert_eq!(path.depth(), 3);
        assert_eq!(path.to_string(), "/interfaces/eth0/enabled");
        assert_eq!(path.last(), Some("enabled"));
    }

    #[test]
    fn test_root() {
        let root = DataPath::parse("/").unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), "/");
        assert!(root.parent().is_none());
    }

    #[test]
    fn test_invalid_paths() {
        assert!(DataPath::parse("").is_err());
        assert!(DataPath::parse("//a").is_err());
        assert!(DataPath::parse("/a//b").is_err());
    }

    #[test]
    fn test_child_and_parent() {
        let path = DataPath::parse("/a/b").unwrap();
        assert_eq!(path.child("c").to_string(), "/a/b/c");
        assert_eq!(path.parent().unwrap().to_string(), "/a");
    }

    #[test]
    fn test_prefix() {
        let a = DataPath::parse("/a").unwrap();
        let ab = DataPath::parse("/a/b").unwrap();
        assert!(a.is_prefix_of(&ab));
        assert!(a.is_prefix_of(&a));
        assert!(!ab.is_prefix_of(&a));
        assert!(DataPath::root().is_prefix_of(&ab));
    }

    #[test]
    fn test_serde_as_string() {
        let path = DataPath::parse("/a/b").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"/a/b\"");
        let back: DataPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}

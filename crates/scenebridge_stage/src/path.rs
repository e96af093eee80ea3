//! Absolute, hierarchical addresses into the persisted document tree.

use crate::error::{StageError, StageResult};
use std::fmt;
use std::str::FromStr;

/// An absolute path to a prim or property in the persisted hierarchy.
///
/// Paths are immutable value types. Prim paths look like `/World/Box`;
/// property paths append a dotted final element, as in `/World/Box.radius`.
/// The absolute root is the single-character path `/`.
///
/// Ordering is lexicographic on the path text. Because a parent is always a
/// text prefix of its descendants, sorted order visits parents before
/// children and keeps subtrees contiguous, which the layer traversals rely
/// on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StagePath(String);

fn valid_identifier(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl StagePath {
    /// Returns the absolute root path `/`.
    #[must_use]
    pub fn absolute_root() -> Self {
        Self("/".to_string())
    }

    /// Parses an absolute path string.
    pub fn parse(text: &str) -> StageResult<Self> {
        if text == "/" {
            return Ok(Self::absolute_root());
        }
        let Some(body) = text.strip_prefix('/') else {
            return Err(StageError::invalid_path(text, "path must be absolute"));
        };
        if body.is_empty() || body.ends_with('/') {
            return Err(StageError::invalid_path(text, "empty path element"));
        }
        let mut elements = body.split('/').peekable();
        while let Some(element) = elements.next() {
            let is_last = elements.peek().is_none();
            match element.split_once('.') {
                None => {
                    if !valid_identifier(element) {
                        return Err(StageError::invalid_path(text, "invalid path element"));
                    }
                }
                Some((prim, property)) => {
                    // Only the final element may carry a property part.
                    if !is_last || !valid_identifier(prim) || !valid_identifier(property) {
                        return Err(StageError::invalid_path(text, "invalid property element"));
                    }
                }
            }
        }
        Ok(Self(text.to_string()))
    }

    /// Returns the path text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is the absolute root path.
    #[must_use]
    pub fn is_absolute_root(&self) -> bool {
        self.0 == "/"
    }

    /// Returns true if this addresses a prim (not a property, not the root).
    #[must_use]
    pub fn is_prim_path(&self) -> bool {
        !self.is_absolute_root() && !self.0.contains('.')
    }

    /// Returns true if this addresses a property of a prim.
    #[must_use]
    pub fn is_property_path(&self) -> bool {
        self.0.contains('.')
    }

    /// Returns the final path element (for a property path, the property
    /// name).
    #[must_use]
    pub fn name(&self) -> &str {
        let last = self.0.rsplit('/').next().unwrap_or("");
        last.rsplit('.').next().unwrap_or(last)
    }

    /// Returns the property name, if this is a property path.
    #[must_use]
    pub fn property_name(&self) -> Option<&str> {
        self.0.rsplit('/').next().and_then(|e| e.split_once('.')).map(|(_, p)| p)
    }

    /// Returns the owning prim path. For a prim path this is the path
    /// itself.
    #[must_use]
    pub fn prim_path(&self) -> Self {
        match self.0.split_once('.') {
            Some((prim, _)) => Self(prim.to_string()),
            None => self.clone(),
        }
    }

    /// Returns the parent path. A property path's parent is its owning
    /// prim; the root has no parent.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_absolute_root() {
            return None;
        }
        if self.is_property_path() {
            return Some(self.prim_path());
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::absolute_root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Appends a child prim element.
    pub fn append_child(&self, name: &str) -> StageResult<Self> {
        if !valid_identifier(name) {
            return Err(StageError::invalid_path(name, "invalid child name"));
        }
        if self.is_property_path() {
            return Err(StageError::invalid_target(self, "cannot append below a property"));
        }
        if self.is_absolute_root() {
            Ok(Self(format!("/{name}")))
        } else {
            Ok(Self(format!("{}/{name}", self.0)))
        }
    }

    /// Appends a property element.
    pub fn append_property(&self, name: &str) -> StageResult<Self> {
        if !valid_identifier(name) {
            return Err(StageError::invalid_path(name, "invalid property name"));
        }
        if !self.is_prim_path() {
            return Err(StageError::invalid_target(self, "properties attach to prims"));
        }
        Ok(Self(format!("{}.{name}", self.0)))
    }

    /// Appends a relative path (one or more elements, no leading slash).
    pub fn append_path(&self, relative: &str) -> StageResult<Self> {
        if relative.is_empty() {
            return Ok(self.clone());
        }
        let joined = if self.is_absolute_root() {
            format!("/{relative}")
        } else {
            format!("{}/{relative}", self.0)
        };
        Self::parse(&joined)
    }

    /// Returns the path text relative to the absolute root (no leading
    /// slash; empty for the root itself).
    #[must_use]
    pub fn relative_from_root(&self) -> &str {
        self.0.strip_prefix('/').unwrap_or(&self.0)
    }

    /// Returns true if `prefix` is this path or one of its ancestors,
    /// respecting element boundaries.
    #[must_use]
    pub fn has_prefix(&self, prefix: &StagePath) -> bool {
        if prefix.is_absolute_root() {
            return true;
        }
        if self.0 == prefix.0 {
            return true;
        }
        match self.0.strip_prefix(prefix.0.as_str()) {
            Some(rest) => rest.starts_with('/') || rest.starts_with('.'),
            None => false,
        }
    }

    /// Returns the number of path elements (a property counts as one
    /// element; the root has zero).
    #[must_use]
    pub fn element_count(&self) -> usize {
        if self.is_absolute_root() {
            return 0;
        }
        let slashes = self.0.matches('/').count();
        if self.is_property_path() {
            slashes + 1
        } else {
            slashes
        }
    }
}

impl fmt::Display for StagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StagePath {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_and_display() {
        let p = StagePath::parse("/World/Box").unwrap();
        assert_eq!(p.to_string(), "/World/Box");
        assert_eq!(StagePath::parse("/").unwrap(), StagePath::absolute_root());
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(StagePath::parse("World").is_err());
        assert!(StagePath::parse("/World/").is_err());
        assert!(StagePath::parse("//World").is_err());
        assert!(StagePath::parse("/Wor ld").is_err());
        assert!(StagePath::parse("/A.b/C").is_err());
        assert!(StagePath::parse("/A.b.c").is_err());
    }

    #[test]
    fn parent_and_child() {
        let box_path = StagePath::parse("/World/Box").unwrap();
        assert_eq!(box_path.parent().unwrap().as_str(), "/World");
        assert_eq!(
            StagePath::parse("/World").unwrap().parent().unwrap(),
            StagePath::absolute_root()
        );
        assert!(StagePath::absolute_root().parent().is_none());
        assert_eq!(
            StagePath::absolute_root().append_child("World").unwrap().as_str(),
            "/World"
        );
    }

    #[test]
    fn property_paths() {
        let prop = StagePath::parse("/World/Box.radius").unwrap();
        assert!(prop.is_property_path());
        assert!(!prop.is_prim_path());
        assert_eq!(prop.property_name(), Some("radius"));
        assert_eq!(prop.prim_path().as_str(), "/World/Box");
        assert_eq!(prop.parent().unwrap().as_str(), "/World/Box");
        assert_eq!(prop.name(), "radius");
    }

    #[test]
    fn prefix_respects_element_boundaries() {
        let a_b = StagePath::parse("/A/B").unwrap();
        let a_b_c = StagePath::parse("/A/B/C").unwrap();
        let a_bx = StagePath::parse("/A/Bx").unwrap();
        let a_b_prop = StagePath::parse("/A/B.x").unwrap();
        assert!(a_b_c.has_prefix(&a_b));
        assert!(a_b_prop.has_prefix(&a_b));
        assert!(a_b.has_prefix(&a_b));
        assert!(!a_bx.has_prefix(&a_b));
        assert!(a_bx.has_prefix(&StagePath::absolute_root()));
    }

    #[test]
    fn relative_and_append_path() {
        let src = StagePath::parse("/Box/Lid").unwrap();
        let dst_parent = StagePath::parse("/World").unwrap();
        let dst = dst_parent.append_path(src.relative_from_root()).unwrap();
        assert_eq!(dst.as_str(), "/World/Box/Lid");
        assert_eq!(
            StagePath::absolute_root().append_path("Box").unwrap().as_str(),
            "/Box"
        );
    }

    #[test]
    fn element_counts() {
        assert_eq!(StagePath::absolute_root().element_count(), 0);
        assert_eq!(StagePath::parse("/World").unwrap().element_count(), 1);
        assert_eq!(StagePath::parse("/World/Box").unwrap().element_count(), 2);
        assert_eq!(StagePath::parse("/World/Box.r").unwrap().element_count(), 3);
    }

    fn identifier() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9_]{0,8}"
    }

    proptest! {
        #[test]
        fn display_parse_round_trip(parts in prop::collection::vec(identifier(), 1..5)) {
            let text = format!("/{}", parts.join("/"));
            let parsed = StagePath::parse(&text).unwrap();
            prop_assert_eq!(parsed.to_string(), text);
        }

        #[test]
        fn append_child_then_parent(parts in prop::collection::vec(identifier(), 1..4), name in identifier()) {
            let base = StagePath::parse(&format!("/{}", parts.join("/"))).unwrap();
            let child = base.append_child(&name).unwrap();
            prop_assert_eq!(child.parent().unwrap(), base.clone());
            prop_assert!(child.has_prefix(&base));
            prop_assert_eq!(child.name(), name.as_str());
        }

        #[test]
        fn reroot_preserves_relative_text(parts in prop::collection::vec(identifier(), 1..4)) {
            let src = StagePath::parse(&format!("/{}", parts.join("/"))).unwrap();
            let rerooted = StagePath::absolute_root()
                .append_path(src.relative_from_root())
                .unwrap();
            prop_assert_eq!(rerooted, src);
        }
    }
}

//! Unified addressing across the two hierarchies.

use crate::error::{SyncError, SyncResult};
use scenebridge_stage::StagePath;
use std::fmt;
use std::str::FromStr;

/// Which hierarchy a cross path segment addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hierarchy {
    /// The editable, node-based authoring hierarchy.
    Scene,
    /// The persisted, layered document hierarchy.
    Stage,
}

/// One segment of a [`CrossPath`], tagged with the hierarchy it addresses.
///
/// Scene segments use the `|a|b|c` textual node path; stage segments are
/// ordinary absolute [`StagePath`]s. The leading separator makes the
/// segment kind self-describing in serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CrossSegment {
    /// A node path in the editable hierarchy.
    Scene(String),
    /// A prim path in the persisted hierarchy.
    Stage(StagePath),
}

impl CrossSegment {
    /// Returns the hierarchy this segment addresses.
    #[must_use]
    pub fn hierarchy(&self) -> Hierarchy {
        match self {
            CrossSegment::Scene(_) => Hierarchy::Scene,
            CrossSegment::Stage(_) => Hierarchy::Stage,
        }
    }

    fn parse(text: &str) -> SyncResult<Self> {
        if text.starts_with('|') {
            if text.len() == 1 || text.ends_with('|') || text.contains("||") {
                return Err(SyncError::invalid_cross_path(text, "empty scene path element"));
            }
            Ok(CrossSegment::Scene(text.to_string()))
        } else if text.starts_with('/') {
            Ok(CrossSegment::Stage(StagePath::parse(text).map_err(|e| {
                SyncError::invalid_cross_path(text, e.to_string())
            })?))
        } else {
            Err(SyncError::invalid_cross_path(
                text,
                "segment must start with '|' or '/'",
            ))
        }
    }
}

impl fmt::Display for CrossSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrossSegment::Scene(text) => f.write_str(text),
            CrossSegment::Stage(path) => write!(f, "{path}"),
        }
    }
}

/// A path in the unified addressing scheme: one or more tagged segments,
/// joined by `,` in serialized form.
///
/// This is the public identity the engine exposes to observers, and the
/// form stored in back-reference records on editable nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CrossPath {
    segments: Vec<CrossSegment>,
}

impl CrossPath {
    /// Creates a cross path addressing a persisted prim.
    #[must_use]
    pub fn from_stage(path: StagePath) -> Self {
        Self {
            segments: vec![CrossSegment::Stage(path)],
        }
    }

    /// Creates a cross path addressing an editable node by its textual
    /// path.
    pub fn from_scene(path: impl Into<String>) -> SyncResult<Self> {
        let text = path.into();
        match CrossSegment::parse(&text)? {
            segment @ CrossSegment::Scene(_) => Ok(Self {
                segments: vec![segment],
            }),
            CrossSegment::Stage(_) => {
                Err(SyncError::invalid_cross_path(text, "expected a scene path"))
            }
        }
    }

    /// Parses a serialized cross path.
    pub fn parse(text: &str) -> SyncResult<Self> {
        if text.is_empty() {
            return Err(SyncError::invalid_cross_path(text, "empty path"));
        }
        let segments = text
            .split(',')
            .map(CrossSegment::parse)
            .collect::<SyncResult<Vec<_>>>()?;
        Ok(Self { segments })
    }

    /// Returns the segments in order.
    #[must_use]
    pub fn segments(&self) -> &[CrossSegment] {
        &self.segments
    }

    /// Returns the final segment.
    #[must_use]
    pub fn leaf(&self) -> &CrossSegment {
        self.segments
            .last()
            .expect("cross paths always have at least one segment")
    }

    /// Returns the hierarchy the final segment addresses.
    #[must_use]
    pub fn leaf_hierarchy(&self) -> Hierarchy {
        self.leaf().hierarchy()
    }

    /// Returns the last stage-tagged segment, if any.
    #[must_use]
    pub fn stage_path(&self) -> Option<&StagePath> {
        self.segments.iter().rev().find_map(|s| match s {
            CrossSegment::Stage(path) => Some(path),
            CrossSegment::Scene(_) => None,
        })
    }

    /// Returns the last scene-tagged segment, if any.
    #[must_use]
    pub fn scene_path(&self) -> Option<&str> {
        self.segments.iter().rev().find_map(|s| match s {
            CrossSegment::Scene(text) => Some(text.as_str()),
            CrossSegment::Stage(_) => None,
        })
    }
}

impl fmt::Display for CrossPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{segment}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for CrossPath {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_form_round_trip() {
        let path = CrossPath::from_stage(StagePath::parse("/World/Box").unwrap());
        assert_eq!(path.to_string(), "/World/Box");
        assert_eq!(CrossPath::parse("/World/Box").unwrap(), path);
        assert_eq!(path.leaf_hierarchy(), Hierarchy::Stage);
        assert_eq!(path.stage_path().unwrap().as_str(), "/World/Box");
        assert!(path.scene_path().is_none());
    }

    #[test]
    fn scene_form_round_trip() {
        let path = CrossPath::from_scene("|root|node").unwrap();
        assert_eq!(path.to_string(), "|root|node");
        assert_eq!(CrossPath::parse("|root|node").unwrap(), path);
        assert_eq!(path.leaf_hierarchy(), Hierarchy::Scene);
        assert_eq!(path.scene_path().unwrap(), "|root|node");
        assert!(path.stage_path().is_none());
    }

    #[test]
    fn multi_segment_parse() {
        let path = CrossPath::parse("|world|container,/World/Box").unwrap();
        assert_eq!(path.segments().len(), 2);
        assert_eq!(path.leaf_hierarchy(), Hierarchy::Stage);
        assert_eq!(path.scene_path().unwrap(), "|world|container");
        assert_eq!(path.to_string(), "|world|container,/World/Box");
    }

    #[test]
    fn rejects_malformed_text() {
        assert!(CrossPath::parse("").is_err());
        assert!(CrossPath::parse("plain").is_err());
        assert!(CrossPath::parse("|").is_err());
        assert!(CrossPath::parse("|a||b").is_err());
        assert!(CrossPath::from_scene("/World").is_err());
    }
}

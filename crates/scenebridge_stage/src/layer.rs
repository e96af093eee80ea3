//! A single layer of the persisted document: a path-addressed spec tree.

use crate::error::{StageError, StageResult};
use crate::path::StagePath;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;

/// The opinions a layer holds about one prim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimSpec {
    /// Type name of the prim. Empty for a pure override spec.
    pub type_name: String,
    /// Field values, keyed by field name.
    pub fields: BTreeMap<String, Value>,
    /// String-valued custom data, keyed by a namespaced key.
    pub custom_data: BTreeMap<String, String>,
    /// Active-state opinion. `None` means no opinion.
    pub active: Option<bool>,
}

impl PrimSpec {
    /// Creates a spec with the given type name and no other opinions.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    /// Returns true if the spec carries no opinions at all.
    #[must_use]
    pub fn is_inert(&self) -> bool {
        self.type_name.is_empty()
            && self.fields.is_empty()
            && self.custom_data.is_empty()
            && self.active.is_none()
    }
}

/// Outcome of visiting one spec path during a layer traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisitOutcome {
    /// Descend into the children of the visited path.
    Continue,
    /// Skip the visited path's children, continue with its siblings.
    Prune,
    /// Abort the whole traversal, carrying a reason.
    Abort(String),
}

/// A failed traversal: the path at which the visitor aborted, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalFailure {
    /// The spec path the visitor aborted at.
    pub path: StagePath,
    /// The visitor's reason.
    pub reason: String,
}

impl fmt::Display for TraversalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "traversal aborted at {}: {}", self.path, self.reason)
    }
}

/// A path-addressed tree of prim specs.
///
/// Layers never compose by themselves; composition across layers is the
/// stage's job. A layer is cheap to create and is also used as the
/// throw-away export target during a push.
#[derive(Debug, Clone, Default)]
pub struct Layer {
    identifier: String,
    specs: BTreeMap<StagePath, PrimSpec>,
}

impl Layer {
    /// Creates an empty layer with an identifier (for diagnostics only).
    #[must_use]
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            specs: BTreeMap::new(),
        }
    }

    /// Returns the layer identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Returns true if the layer holds no specs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Returns the number of prim specs in the layer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Defines a prim with the given type, creating override specs for any
    /// missing ancestors.
    pub fn define_prim(&mut self, path: &StagePath, type_name: &str) -> StageResult<()> {
        if !path.is_prim_path() {
            return Err(StageError::invalid_target(path, "expected a prim path"));
        }
        let spec = self.ensure_prim(path);
        spec.type_name = type_name.to_string();
        Ok(())
    }

    /// Returns the spec at `path`, creating it (and override specs for its
    /// ancestors) if absent.
    pub fn ensure_prim(&mut self, path: &StagePath) -> &mut PrimSpec {
        let mut ancestors = Vec::new();
        let mut cursor = path.parent();
        while let Some(p) = cursor {
            if p.is_absolute_root() {
                break;
            }
            cursor = p.parent();
            ancestors.push(p);
        }
        for ancestor in ancestors.into_iter().rev() {
            self.specs.entry(ancestor).or_default();
        }
        self.specs.entry(path.clone()).or_default()
    }

    /// Returns the spec at `path`, if present.
    #[must_use]
    pub fn prim(&self, path: &StagePath) -> Option<&PrimSpec> {
        self.specs.get(path)
    }

    /// Returns the spec at `path` mutably, if present.
    pub fn prim_mut(&mut self, path: &StagePath) -> Option<&mut PrimSpec> {
        self.specs.get_mut(path)
    }

    /// Returns true if the layer has a spec at `path`.
    #[must_use]
    pub fn contains(&self, path: &StagePath) -> bool {
        self.specs.contains_key(path)
    }

    /// Removes the spec at `path` and every spec beneath it.
    pub fn remove_subtree(&mut self, path: &StagePath) {
        self.specs.retain(|p, _| !p.has_prefix(path));
    }

    /// Removes the spec at `path` if it carries no opinions and has no
    /// children. Returns true if a spec was removed.
    pub fn remove_if_inert(&mut self, path: &StagePath) -> bool {
        let inert = match self.specs.get(path) {
            Some(spec) => spec.is_inert() && self.children(path).is_empty(),
            None => false,
        };
        if inert {
            self.specs.remove(path);
        }
        inert
    }

    /// Removes every inert leaf spec, repeatedly, so that inert chains
    /// disappear entirely.
    pub fn remove_inert_specs(&mut self) {
        loop {
            let inert: Vec<StagePath> = self
                .specs
                .keys()
                .filter(|p| {
                    self.specs.get(*p).map(PrimSpec::is_inert).unwrap_or(false)
                        && self.children(p).is_empty()
                })
                .cloned()
                .collect();
            if inert.is_empty() {
                break;
            }
            for path in inert {
                self.specs.remove(&path);
            }
        }
    }

    /// Returns the direct prim children of `path` (or the root prims when
    /// `path` is the absolute root), in sorted order.
    #[must_use]
    pub fn children(&self, path: &StagePath) -> Vec<StagePath> {
        self.specs
            .keys()
            .filter(|p| p.parent().as_ref() == Some(path))
            .cloned()
            .collect()
    }

    /// Returns the prims directly under the absolute root.
    #[must_use]
    pub fn root_prims(&self) -> Vec<StagePath> {
        self.children(&StagePath::absolute_root())
    }

    /// Returns every prim path at or below `root`, parents before
    /// children.
    #[must_use]
    pub fn prim_paths_under(&self, root: &StagePath) -> Vec<StagePath> {
        self.specs
            .keys()
            .filter(|p| p.has_prefix(root))
            .cloned()
            .collect()
    }

    /// Returns every spec path at or below `root`: prim paths plus a
    /// property path per field, in traversal order.
    #[must_use]
    pub fn spec_paths_under(&self, root: &StagePath) -> Vec<StagePath> {
        let mut paths = Vec::new();
        for (path, spec) in self.specs.iter().filter(|(p, _)| p.has_prefix(root)) {
            paths.push(path.clone());
            for field in spec.fields.keys() {
                if let Ok(property) = path.append_property(field) {
                    paths.push(property);
                }
            }
        }
        paths.sort();
        paths
    }

    /// Pre-order traversal over the spec paths at or below `root`.
    ///
    /// The visitor's tri-state outcome drives descent: `Continue` visits
    /// the path's children, `Prune` skips them, and `Abort` stops the whole
    /// traversal and surfaces as a [`TraversalFailure`].
    pub fn traverse<F>(&self, root: &StagePath, mut visit: F) -> Result<(), TraversalFailure>
    where
        F: FnMut(&StagePath) -> VisitOutcome,
    {
        let mut pruned: Option<StagePath> = None;
        for path in self.spec_paths_under(root) {
            if let Some(prefix) = &pruned {
                if path.has_prefix(prefix) && path != *prefix {
                    continue;
                }
                pruned = None;
            }
            match visit(&path) {
                VisitOutcome::Continue => {}
                VisitOutcome::Prune => pruned = Some(path),
                VisitOutcome::Abort(reason) => {
                    return Err(TraversalFailure { path, reason });
                }
            }
        }
        Ok(())
    }

    /// Post-order traversal over the spec paths at or below `root`:
    /// children are visited before their parents. `Prune` is meaningless
    /// after children have been visited and is treated as `Continue`.
    pub fn traverse_postorder<F>(
        &self,
        root: &StagePath,
        mut visit: F,
    ) -> Result<(), TraversalFailure>
    where
        F: FnMut(&StagePath) -> VisitOutcome,
    {
        for path in self.spec_paths_under(root).into_iter().rev() {
            if let VisitOutcome::Abort(reason) = visit(&path) {
                return Err(TraversalFailure { path, reason });
            }
        }
        Ok(())
    }

    /// Copies the single spec at `src_path` in `src` onto `dst_path` in
    /// `dst`, replacing any opinions already there. Children are not
    /// copied.
    pub fn copy_prim_spec(
        src: &Layer,
        src_path: &StagePath,
        dst: &mut Layer,
        dst_path: &StagePath,
    ) -> StageResult<()> {
        let spec = src
            .prim(src_path)
            .ok_or_else(|| StageError::prim_not_found(src_path))?
            .clone();
        *dst.ensure_prim(dst_path) = spec;
        Ok(())
    }

    /// Copies the whole subtree rooted at `src_path` in `src` onto
    /// `dst_path` in `dst`, re-rooting every copied path.
    pub fn copy_spec(
        src: &Layer,
        src_path: &StagePath,
        dst: &mut Layer,
        dst_path: &StagePath,
    ) -> StageResult<()> {
        if !src.contains(src_path) {
            return Err(StageError::prim_not_found(src_path));
        }
        for path in src.prim_paths_under(src_path) {
            let target = if path == *src_path {
                dst_path.clone()
            } else {
                let relative = path
                    .as_str()
                    .strip_prefix(src_path.as_str())
                    .and_then(|r| r.strip_prefix('/'))
                    .unwrap_or("");
                dst_path.append_path(relative)?
            };
            Layer::copy_prim_spec(src, &path, dst, &target)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> StagePath {
        StagePath::parse(text).unwrap()
    }

    fn sample_layer() -> Layer {
        let mut layer = Layer::new("sample");
        layer.define_prim(&p("/A"), "Xform").unwrap();
        layer.define_prim(&p("/A/B"), "Cube").unwrap();
        layer.define_prim(&p("/A/B/D"), "Cube").unwrap();
        layer.define_prim(&p("/A/C"), "Sphere").unwrap();
        layer
            .prim_mut(&p("/A/B"))
            .unwrap()
            .fields
            .insert("size".into(), Value::Float(2.0));
        layer
    }

    #[test]
    fn define_creates_ancestors() {
        let mut layer = Layer::new("t");
        layer.define_prim(&p("/X/Y/Z"), "Cube").unwrap();
        assert!(layer.contains(&p("/X")));
        assert!(layer.contains(&p("/X/Y")));
        assert_eq!(layer.prim(&p("/X")).unwrap().type_name, "");
        assert_eq!(layer.prim(&p("/X/Y/Z")).unwrap().type_name, "Cube");
    }

    #[test]
    fn children_and_roots() {
        let layer = sample_layer();
        assert_eq!(layer.root_prims(), vec![p("/A")]);
        assert_eq!(layer.children(&p("/A")), vec![p("/A/B"), p("/A/C")]);
    }

    #[test]
    fn spec_paths_include_properties() {
        let layer = sample_layer();
        let paths = layer.spec_paths_under(&p("/A/B"));
        assert_eq!(paths, vec![p("/A/B"), p("/A/B.size"), p("/A/B/D")]);
    }

    #[test]
    fn traversal_prunes_subtrees() {
        let layer = sample_layer();
        let mut visited = Vec::new();
        layer
            .traverse(&p("/A"), |path| {
                visited.push(path.clone());
                if *path == p("/A/B") {
                    VisitOutcome::Prune
                } else {
                    VisitOutcome::Continue
                }
            })
            .unwrap();
        assert!(visited.contains(&p("/A/B")));
        assert!(visited.contains(&p("/A/C")));
        assert!(!visited.contains(&p("/A/B/D")));
        assert!(!visited.contains(&p("/A/B.size")));
    }

    #[test]
    fn traversal_abort_carries_path_and_reason() {
        let layer = sample_layer();
        let failure = layer
            .traverse(&p("/A"), |path| {
                if *path == p("/A/B/D") {
                    VisitOutcome::Abort("boom".into())
                } else {
                    VisitOutcome::Continue
                }
            })
            .unwrap_err();
        assert_eq!(failure.path, p("/A/B/D"));
        assert_eq!(failure.reason, "boom");
    }

    #[test]
    fn postorder_visits_children_first() {
        let layer = sample_layer();
        let mut visited = Vec::new();
        layer
            .traverse_postorder(&p("/A"), |path| {
                if path.is_prim_path() {
                    visited.push(path.clone());
                }
                VisitOutcome::Continue
            })
            .unwrap();
        let pos = |needle: &StagePath| visited.iter().position(|p| p == needle).unwrap();
        assert!(pos(&p("/A/B/D")) < pos(&p("/A/B")));
        assert!(pos(&p("/A/B")) < pos(&p("/A")));
    }

    #[test]
    fn copy_spec_reroots_subtree() {
        let src = sample_layer();
        let mut dst = Layer::new("dst");
        Layer::copy_spec(&src, &p("/A/B"), &mut dst, &p("/World/B")).unwrap();
        assert_eq!(dst.prim(&p("/World/B")).unwrap().type_name, "Cube");
        assert_eq!(dst.prim(&p("/World/B/D")).unwrap().type_name, "Cube");
        assert_eq!(
            dst.prim(&p("/World/B")).unwrap().fields.get("size"),
            Some(&Value::Float(2.0))
        );
    }

    #[test]
    fn inert_cleanup() {
        let mut layer = Layer::new("t");
        layer.define_prim(&p("/X/Y"), "Cube").unwrap();
        layer.prim_mut(&p("/X/Y")).unwrap().type_name.clear();
        layer.remove_inert_specs();
        assert!(layer.is_empty());

        let mut layer = sample_layer();
        assert!(!layer.remove_if_inert(&p("/A")));
        layer.remove_subtree(&p("/A/B"));
        assert!(!layer.contains(&p("/A/B/D")));
    }
}

//! The composed stage: a root layer plus a session overlay.

use crate::error::{StageError, StageResult};
use crate::layer::Layer;
use crate::path::StagePath;
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// A batch of change notifications emitted by a stage after a mutation.
///
/// Structural edits report the affected subtree root in `resynced`;
/// value-only edits report the affected field (or prim, for metadata) in
/// `changed_fields`. A resync of the absolute root path means "the whole
/// document changed".
#[derive(Debug, Clone, Default)]
pub struct ChangeNotice {
    /// Roots of subtrees whose structure or composition changed.
    pub resynced: Vec<StagePath>,
    /// Paths whose value changed without structural impact.
    pub changed_fields: Vec<StagePath>,
}

impl ChangeNotice {
    /// Creates a notice reporting one resynced subtree.
    #[must_use]
    pub fn resync(path: StagePath) -> Self {
        Self {
            resynced: vec![path],
            ..Self::default()
        }
    }

    /// Creates a notice reporting one changed value path.
    #[must_use]
    pub fn info(path: StagePath) -> Self {
        Self {
            changed_fields: vec![path],
            ..Self::default()
        }
    }
}

/// Receives stage change notices, synchronously, on the mutating call
/// stack.
pub trait StageObserver: Send + Sync {
    /// Called after every stage mutation with the resulting notice.
    fn stage_changed(&self, notice: &ChangeNotice);
}

struct Layers {
    root: Layer,
    session: Layer,
}

/// A layered document: authored content in the root layer, scratch
/// bookkeeping (pull records, active-state overrides) confined to the
/// session layer.
///
/// All methods take `&self`; interior locking keeps the two layers
/// consistent. Change notices are emitted after the internal lock is
/// released, so an observer may freely re-enter the stage.
pub struct Stage {
    identifier: String,
    layers: RwLock<Layers>,
    observers: RwLock<Vec<Weak<dyn StageObserver>>>,
}

impl Stage {
    /// Creates an empty in-memory stage.
    #[must_use]
    pub fn in_memory(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self {
            layers: RwLock::new(Layers {
                root: Layer::new(format!("{identifier}-root")),
                session: Layer::new(format!("{identifier}-session")),
            }),
            observers: RwLock::new(Vec::new()),
            identifier,
        }
    }

    /// Returns the stage identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Subscribes an observer to change notices.
    pub fn subscribe(&self, observer: Weak<dyn StageObserver>) {
        self.observers.write().push(observer);
    }

    fn notify(&self, notice: ChangeNotice) {
        let observers: Vec<Arc<dyn StageObserver>> = {
            let mut list = self.observers.write();
            list.retain(|w| w.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.stage_changed(&notice);
        }
    }

    // Composed queries. Each helper works on an already-locked layer pair
    // so that no query re-enters the lock.

    fn composed_exists(layers: &Layers, path: &StagePath) -> bool {
        path.is_prim_path() && (layers.root.contains(path) || layers.session.contains(path))
    }

    fn composed_active(layers: &Layers, path: &StagePath) -> bool {
        if let Some(spec) = layers.session.prim(path) {
            if let Some(active) = spec.active {
                return active;
            }
        }
        if let Some(spec) = layers.root.prim(path) {
            if let Some(active) = spec.active {
                return active;
            }
        }
        true
    }

    fn composed_children(layers: &Layers, path: &StagePath) -> Vec<StagePath> {
        let mut children = layers.root.children(path);
        for child in layers.session.children(path) {
            if !children.contains(&child) {
                children.push(child);
            }
        }
        children.sort();
        children
    }

    /// Returns true if a prim exists at `path` in either layer.
    #[must_use]
    pub fn prim_exists(&self, path: &StagePath) -> bool {
        Self::composed_exists(&self.layers.read(), path)
    }

    /// Returns the composed type name of the prim at `path`: the session
    /// opinion wins if non-empty, then the root opinion.
    #[must_use]
    pub fn prim_type_name(&self, path: &StagePath) -> Option<String> {
        let layers = self.layers.read();
        if !Self::composed_exists(&layers, path) {
            return None;
        }
        let session_type = layers
            .session
            .prim(path)
            .map(|s| s.type_name.clone())
            .filter(|t| !t.is_empty());
        session_type.or_else(|| layers.root.prim(path).map(|s| s.type_name.clone()))
    }

    /// Returns the composed active state of the prim at `path` (default
    /// true when no layer holds an opinion).
    #[must_use]
    pub fn is_active(&self, path: &StagePath) -> bool {
        Self::composed_active(&self.layers.read(), path)
    }

    /// Returns the direct children of `path` across both layers.
    #[must_use]
    pub fn children(&self, path: &StagePath) -> Vec<StagePath> {
        Self::composed_children(&self.layers.read(), path)
    }

    /// Returns the prims at or below `root` in default traversal order:
    /// parents before children, inactive subtrees skipped entirely.
    #[must_use]
    pub fn prim_paths_under(&self, root: &StagePath) -> Vec<StagePath> {
        let layers = self.layers.read();
        if !Self::composed_exists(&layers, root) || !Self::composed_active(&layers, root) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(path) = stack.pop() {
            out.push(path.clone());
            let mut children = Self::composed_children(&layers, &path);
            children.retain(|c| Self::composed_active(&layers, c));
            // Reverse so the sorted order comes off the stack first.
            for child in children.into_iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Returns the composed value of one field.
    #[must_use]
    pub fn field(&self, path: &StagePath, name: &str) -> Option<Value> {
        let layers = self.layers.read();
        layers
            .session
            .prim(path)
            .and_then(|s| s.fields.get(name).cloned())
            .or_else(|| layers.root.prim(path).and_then(|s| s.fields.get(name).cloned()))
    }

    /// Returns the composed field map of the prim at `path`.
    #[must_use]
    pub fn fields(&self, path: &StagePath) -> BTreeMap<String, Value> {
        let layers = self.layers.read();
        let mut merged = layers
            .root
            .prim(path)
            .map(|s| s.fields.clone())
            .unwrap_or_default();
        if let Some(spec) = layers.session.prim(path) {
            for (k, v) in &spec.fields {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    /// Returns custom data stored under `key` on the prim at `path`.
    #[must_use]
    pub fn custom_data(&self, path: &StagePath, key: &str) -> Option<String> {
        let layers = self.layers.read();
        layers
            .session
            .prim(path)
            .and_then(|s| s.custom_data.get(key).cloned())
            .or_else(|| {
                layers
                    .root
                    .prim(path)
                    .and_then(|s| s.custom_data.get(key).cloned())
            })
    }

    // Mutations. Each takes the write lock, applies the edit, releases the
    // lock, and only then notifies.

    /// Defines (or re-types) a prim in the root layer.
    pub fn define_prim(&self, path: &StagePath, type_name: &str) -> StageResult<()> {
        self.layers.write().root.define_prim(path, type_name)?;
        self.notify(ChangeNotice::resync(path.clone()));
        Ok(())
    }

    /// Removes the subtree at `path` from both layers.
    pub fn remove_prim(&self, path: &StagePath) -> StageResult<()> {
        {
            let mut layers = self.layers.write();
            if !Self::composed_exists(&layers, path) {
                return Err(StageError::prim_not_found(path));
            }
            layers.root.remove_subtree(path);
            layers.session.remove_subtree(path);
        }
        self.notify(ChangeNotice::resync(path.clone()));
        Ok(())
    }

    /// Sets a field value in the root layer.
    pub fn set_field(&self, path: &StagePath, name: &str, value: Value) -> StageResult<()> {
        {
            let mut layers = self.layers.write();
            if !Self::composed_exists(&layers, path) {
                return Err(StageError::prim_not_found(path));
            }
            layers
                .root
                .ensure_prim(path)
                .fields
                .insert(name.to_string(), value);
        }
        self.notify(ChangeNotice::info(path.append_property(name)?));
        Ok(())
    }

    /// Writes an active-state override into the session layer.
    pub fn set_active(&self, path: &StagePath, active: bool) -> StageResult<()> {
        {
            let mut layers = self.layers.write();
            if !Self::composed_exists(&layers, path) {
                return Err(StageError::prim_not_found(path));
            }
            layers.session.ensure_prim(path).active = Some(active);
        }
        self.notify(ChangeNotice::resync(path.clone()));
        Ok(())
    }

    /// Clears the session active-state override and drops any session
    /// specs left inert.
    pub fn clear_active(&self, path: &StagePath) -> StageResult<()> {
        {
            let mut layers = self.layers.write();
            if let Some(spec) = layers.session.prim_mut(path) {
                spec.active = None;
            }
            layers.session.remove_inert_specs();
        }
        self.notify(ChangeNotice::resync(path.clone()));
        Ok(())
    }

    /// Stores custom data in the session layer.
    pub fn set_custom_data(&self, path: &StagePath, key: &str, value: &str) -> StageResult<()> {
        {
            let mut layers = self.layers.write();
            if !Self::composed_exists(&layers, path) {
                return Err(StageError::prim_not_found(path));
            }
            layers
                .session
                .ensure_prim(path)
                .custom_data
                .insert(key.to_string(), value.to_string());
        }
        self.notify(ChangeNotice::info(path.clone()));
        Ok(())
    }

    /// Clears session custom data under `key` and drops any session specs
    /// left inert.
    pub fn clear_custom_data(&self, path: &StagePath, key: &str) -> StageResult<()> {
        {
            let mut layers = self.layers.write();
            if let Some(spec) = layers.session.prim_mut(path) {
                spec.custom_data.remove(key);
            }
            layers.session.remove_inert_specs();
        }
        self.notify(ChangeNotice::info(path.clone()));
        Ok(())
    }

    /// Copies a single prim spec from an external layer into the root
    /// layer at `dst_path`, replacing what is there.
    pub fn copy_prim_from_layer(
        &self,
        src: &Layer,
        src_path: &StagePath,
        dst_path: &StagePath,
    ) -> StageResult<()> {
        {
            let mut layers = self.layers.write();
            Layer::copy_prim_spec(src, src_path, &mut layers.root, dst_path)?;
        }
        self.notify(ChangeNotice::resync(dst_path.clone()));
        Ok(())
    }

    /// Copies a whole subtree from an external layer into the root layer
    /// at `dst_path`.
    pub fn copy_subtree_from_layer(
        &self,
        src: &Layer,
        src_root: &StagePath,
        dst_root: &StagePath,
    ) -> StageResult<()> {
        {
            let mut layers = self.layers.write();
            Layer::copy_spec(src, src_root, &mut layers.root, dst_root)?;
        }
        self.notify(ChangeNotice::resync(dst_root.clone()));
        Ok(())
    }

    /// Returns a child name under `parent` that no composed prim uses yet,
    /// derived from `base` by numeric suffixing.
    #[must_use]
    pub fn unique_child_name(&self, parent: &StagePath, base: &str) -> String {
        let layers = self.layers.read();
        let taken = Self::composed_children(&layers, parent);
        let occupied = |name: &str| {
            parent
                .append_child(name)
                .map(|p| taken.contains(&p))
                .unwrap_or(true)
        };
        if !occupied(base) {
            return base.to_string();
        }
        let mut counter = 1;
        loop {
            let candidate = format!("{base}{counter}");
            if !occupied(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Runs a closure against the root layer (read-only).
    pub fn with_root_layer<R>(&self, f: impl FnOnce(&Layer) -> R) -> R {
        f(&self.layers.read().root)
    }

    /// Runs a closure against the session layer (read-only).
    pub fn with_session_layer<R>(&self, f: impl FnOnce(&Layer) -> R) -> R {
        f(&self.layers.read().session)
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let layers = self.layers.read();
        f.debug_struct("Stage")
            .field("identifier", &self.identifier)
            .field("root_specs", &layers.root.len())
            .field("session_specs", &layers.session.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn p(text: &str) -> StagePath {
        StagePath::parse(text).unwrap()
    }

    fn sample_stage() -> Stage {
        let stage = Stage::in_memory("test");
        stage.define_prim(&p("/World"), "Xform").unwrap();
        stage.define_prim(&p("/World/Box"), "Cube").unwrap();
        stage
            .set_field(&p("/World/Box"), "size", Value::Float(2.0))
            .unwrap();
        stage
    }

    #[test]
    fn composed_queries() {
        let stage = sample_stage();
        assert!(stage.prim_exists(&p("/World/Box")));
        assert!(!stage.prim_exists(&p("/World/Sphere")));
        assert_eq!(stage.prim_type_name(&p("/World/Box")).unwrap(), "Cube");
        assert_eq!(
            stage.field(&p("/World/Box"), "size"),
            Some(Value::Float(2.0))
        );
    }

    #[test]
    fn session_overrides_and_cleanup() {
        let stage = sample_stage();
        assert!(stage.is_active(&p("/World/Box")));

        stage.set_active(&p("/World/Box"), false).unwrap();
        assert!(!stage.is_active(&p("/World/Box")));
        // The override lives in the session layer only.
        stage.with_root_layer(|root| {
            assert_eq!(root.prim(&p("/World/Box")).unwrap().active, None);
        });

        stage.clear_active(&p("/World/Box")).unwrap();
        assert!(stage.is_active(&p("/World/Box")));
        stage.with_session_layer(|session| assert!(session.is_empty()));
    }

    #[test]
    fn custom_data_round_trip() {
        let stage = sample_stage();
        stage
            .set_custom_data(&p("/World/Box"), "k", "v")
            .unwrap();
        assert_eq!(stage.custom_data(&p("/World/Box"), "k").unwrap(), "v");
        stage.clear_custom_data(&p("/World/Box"), "k").unwrap();
        assert_eq!(stage.custom_data(&p("/World/Box"), "k"), None);
        stage.with_session_layer(|session| assert!(session.is_empty()));
    }

    #[test]
    fn traversal_skips_inactive_subtrees() {
        let stage = sample_stage();
        stage.define_prim(&p("/World/Box/Lid"), "Cube").unwrap();
        stage.define_prim(&p("/World/Ball"), "Sphere").unwrap();

        stage.set_active(&p("/World/Box"), false).unwrap();
        let paths = stage.prim_paths_under(&p("/World"));
        assert!(paths.contains(&p("/World/Ball")));
        assert!(!paths.contains(&p("/World/Box")));
        assert!(!paths.contains(&p("/World/Box/Lid")));

        // A deactivated root produces an empty walk.
        assert!(stage.prim_paths_under(&p("/World/Box")).is_empty());
    }

    struct Collector {
        notices: Mutex<Vec<ChangeNotice>>,
    }

    impl StageObserver for Collector {
        fn stage_changed(&self, notice: &ChangeNotice) {
            self.notices.lock().push(notice.clone());
        }
    }

    #[test]
    fn notices_are_synchronous() {
        let stage = sample_stage();
        let collector = Arc::new(Collector {
            notices: Mutex::new(Vec::new()),
        });
        stage.subscribe(Arc::downgrade(&collector) as Weak<dyn StageObserver>);

        stage.define_prim(&p("/World/Extra"), "Cube").unwrap();
        stage
            .set_field(&p("/World/Extra"), "size", Value::Int(1))
            .unwrap();

        let notices = collector.notices.lock();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].resynced, vec![p("/World/Extra")]);
        assert_eq!(notices[1].changed_fields, vec![p("/World/Extra.size")]);
    }

    #[test]
    fn unique_child_names() {
        let stage = sample_stage();
        assert_eq!(stage.unique_child_name(&p("/World"), "Ball"), "Ball");
        assert_eq!(stage.unique_child_name(&p("/World"), "Box"), "Box1");
        stage.define_prim(&p("/World/Box1"), "Cube").unwrap();
        assert_eq!(stage.unique_child_name(&p("/World"), "Box"), "Box2");
    }
}

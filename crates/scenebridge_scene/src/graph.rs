//! The editable scene graph.

use crate::error::{SceneError, SceneResult};
use crate::id::NodeId;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Everything needed to recreate a deleted node in place.
///
/// Snapshots capture identity, placement, attributes, flags, and named-set
/// memberships, so structural transaction items can undo deletions and
/// redo creations without loss.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    /// The node's stable handle.
    pub id: NodeId,
    /// The node's name.
    pub name: String,
    /// The node's type name.
    pub type_name: String,
    /// Parent handle, if the node was not top-level.
    pub parent: Option<NodeId>,
    /// Position among its siblings.
    pub index_in_parent: usize,
    /// String attributes.
    pub attributes: BTreeMap<String, String>,
    /// Whether the node was locked against edits.
    pub locked: bool,
    /// Whether the node was hidden from outliner views.
    pub hidden_in_outliner: bool,
    /// Names of the sets the node belonged to.
    pub set_memberships: Vec<String>,
}

#[derive(Debug, Clone)]
struct NodeData {
    name: String,
    type_name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: BTreeMap<String, String>,
    locked: bool,
    hidden_in_outliner: bool,
}

#[derive(Default)]
struct GraphInner {
    nodes: HashMap<NodeId, NodeData>,
    top_level: Vec<NodeId>,
    sets: BTreeMap<String, BTreeSet<NodeId>>,
    selection: Vec<NodeId>,
}

impl GraphInner {
    fn node(&self, id: NodeId) -> SceneResult<&NodeData> {
        self.nodes.get(&id).ok_or(SceneError::NodeNotFound { id })
    }

    fn node_mut(&mut self, id: NodeId) -> SceneResult<&mut NodeData> {
        self.nodes
            .get_mut(&id)
            .ok_or(SceneError::NodeNotFound { id })
    }

    fn sibling_names(&self, parent: Option<NodeId>) -> Vec<String> {
        let ids = match parent {
            Some(p) => self.nodes.get(&p).map(|n| n.children.clone()).unwrap_or_default(),
            None => self.top_level.clone(),
        };
        ids.iter()
            .filter_map(|id| self.nodes.get(id).map(|n| n.name.clone()))
            .collect()
    }

    fn collect_children_first(&self, id: NodeId, out: &mut Vec<NodeId>) {
        if let Some(node) = self.nodes.get(&id) {
            for child in &node.children {
                self.collect_children_first(*child, out);
            }
        }
        out.push(id);
    }
}

/// The live, node-based authoring hierarchy.
///
/// Nodes are addressed by stable [`NodeId`] handles. Names are unique among
/// siblings, so a node also has a stable textual path (`|a|b|c`) for
/// serialized references. All methods take `&self`; interior locking makes
/// the graph shareable across the engine and its transaction closures.
#[derive(Default)]
pub struct SceneGraph {
    inner: RwLock<GraphInner>,
}

impl SceneGraph {
    /// Creates an empty scene graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a node under `parent` (top-level when `None`).
    ///
    /// The name must be non-empty and unused among the new siblings.
    pub fn create_node(
        &self,
        name: &str,
        type_name: &str,
        parent: Option<NodeId>,
    ) -> SceneResult<NodeId> {
        let mut inner = self.inner.write();
        if name.is_empty() || name.contains('|') {
            return Err(SceneError::invalid_name(name, "empty or reserved character"));
        }
        if inner.sibling_names(parent).iter().any(|n| n == name) {
            return Err(SceneError::invalid_name(name, "name already used by a sibling"));
        }
        if let Some(p) = parent {
            inner.node(p)?;
        }
        let id = NodeId::new();
        inner.nodes.insert(
            id,
            NodeData {
                name: name.to_string(),
                type_name: type_name.to_string(),
                parent,
                children: Vec::new(),
                attributes: BTreeMap::new(),
                locked: false,
                hidden_in_outliner: false,
            },
        );
        match parent {
            Some(p) => inner.node_mut(p)?.children.push(id),
            None => inner.top_level.push(id),
        }
        Ok(id)
    }

    /// Returns true if the node still exists.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.read().nodes.contains_key(&id)
    }

    /// Returns the node's name.
    pub fn name(&self, id: NodeId) -> SceneResult<String> {
        Ok(self.inner.read().node(id)?.name.clone())
    }

    /// Returns the node's type name.
    pub fn type_name(&self, id: NodeId) -> SceneResult<String> {
        Ok(self.inner.read().node(id)?.type_name.clone())
    }

    /// Returns the node's parent handle.
    pub fn parent(&self, id: NodeId) -> SceneResult<Option<NodeId>> {
        Ok(self.inner.read().node(id)?.parent)
    }

    /// Returns the node's children in order.
    pub fn children(&self, id: NodeId) -> SceneResult<Vec<NodeId>> {
        Ok(self.inner.read().node(id)?.children.clone())
    }

    /// Returns the number of children of the node.
    pub fn child_count(&self, id: NodeId) -> SceneResult<usize> {
        Ok(self.inner.read().node(id)?.children.len())
    }

    /// Returns the top-level nodes in order.
    #[must_use]
    pub fn top_level(&self) -> Vec<NodeId> {
        self.inner.read().top_level.clone()
    }

    /// Finds a top-level node by name.
    #[must_use]
    pub fn find_top_level(&self, name: &str) -> Option<NodeId> {
        let inner = self.inner.read();
        inner
            .top_level
            .iter()
            .copied()
            .find(|id| inner.nodes.get(id).map(|n| n.name.as_str()) == Some(name))
    }

    /// Returns a sibling-unique name under `parent`, derived from `base`
    /// by numeric suffixing.
    #[must_use]
    pub fn unique_child_name(&self, parent: Option<NodeId>, base: &str) -> String {
        let inner = self.inner.read();
        let taken = inner.sibling_names(parent);
        if !taken.iter().any(|n| n == base) {
            return base.to_string();
        }
        let mut counter = 1;
        loop {
            let candidate = format!("{base}{counter}");
            if !taken.iter().any(|n| *n == candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Returns the node's textual path, `|a|b|c`.
    pub fn path_string(&self, id: NodeId) -> SceneResult<String> {
        let inner = self.inner.read();
        let mut names = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = inner.node(current)?;
            names.push(node.name.clone());
            cursor = node.parent;
        }
        names.reverse();
        Ok(format!("|{}", names.join("|")))
    }

    /// Resolves a textual path back to a handle, if every element still
    /// exists.
    #[must_use]
    pub fn resolve_path(&self, path: &str) -> Option<NodeId> {
        let inner = self.inner.read();
        let mut elements = path.strip_prefix('|')?.split('|');
        let first = elements.next()?;
        let mut current = inner
            .top_level
            .iter()
            .copied()
            .find(|id| inner.nodes.get(id).map(|n| n.name.as_str()) == Some(first))?;
        for element in elements {
            let node = inner.nodes.get(&current)?;
            current = node
                .children
                .iter()
                .copied()
                .find(|id| inner.nodes.get(id).map(|n| n.name.as_str()) == Some(element))?;
        }
        Some(current)
    }

    /// Sets a string attribute on the node.
    pub fn set_attr(&self, id: NodeId, key: &str, value: &str) -> SceneResult<()> {
        self.inner
            .write()
            .node_mut(id)?
            .attributes
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Returns a string attribute, or `None` when the node is gone or the
    /// attribute is absent.
    #[must_use]
    pub fn attr(&self, id: NodeId, key: &str) -> Option<String> {
        self.inner
            .read()
            .nodes
            .get(&id)
            .and_then(|n| n.attributes.get(key).cloned())
    }

    /// Removes a string attribute from the node.
    pub fn clear_attr(&self, id: NodeId, key: &str) -> SceneResult<()> {
        self.inner.write().node_mut(id)?.attributes.remove(key);
        Ok(())
    }

    /// Returns all attributes of the node.
    pub fn attrs(&self, id: NodeId) -> SceneResult<BTreeMap<String, String>> {
        Ok(self.inner.read().node(id)?.attributes.clone())
    }

    /// Returns whether the node is locked.
    pub fn locked(&self, id: NodeId) -> SceneResult<bool> {
        Ok(self.inner.read().node(id)?.locked)
    }

    /// Locks or unlocks the node and every descendant.
    pub fn lock_subtree(&self, id: NodeId, locked: bool) -> SceneResult<()> {
        let targets = self.descendants_children_first(id)?;
        let mut inner = self.inner.write();
        for target in targets {
            if let Some(node) = inner.nodes.get_mut(&target) {
                node.locked = locked;
            }
        }
        Ok(())
    }

    /// Hides or shows the node in outliner views.
    pub fn set_hidden_in_outliner(&self, id: NodeId, hidden: bool) -> SceneResult<()> {
        self.inner.write().node_mut(id)?.hidden_in_outliner = hidden;
        Ok(())
    }

    /// Returns whether the node is hidden in outliner views.
    pub fn hidden_in_outliner(&self, id: NodeId) -> SceneResult<bool> {
        Ok(self.inner.read().node(id)?.hidden_in_outliner)
    }

    /// Returns the node and all of its descendants, most specific first
    /// (every child precedes its parent; the node itself comes last).
    pub fn descendants_children_first(&self, id: NodeId) -> SceneResult<Vec<NodeId>> {
        let inner = self.inner.read();
        inner.node(id)?;
        let mut out = Vec::new();
        inner.collect_children_first(id, &mut out);
        Ok(out)
    }

    /// Adds the node to a named set, creating the set on first use.
    pub fn add_to_set(&self, set: &str, id: NodeId) -> SceneResult<()> {
        let mut inner = self.inner.write();
        inner.node(id)?;
        inner.sets.entry(set.to_string()).or_default().insert(id);
        Ok(())
    }

    /// Removes the node from a named set. Missing set or member is not an
    /// error.
    pub fn remove_from_set(&self, set: &str, id: NodeId) {
        let mut inner = self.inner.write();
        if let Some(members) = inner.sets.get_mut(set) {
            members.remove(&id);
            if members.is_empty() {
                inner.sets.remove(set);
            }
        }
    }

    /// Returns the members of a named set.
    #[must_use]
    pub fn set_members(&self, set: &str) -> Vec<NodeId> {
        self.inner
            .read()
            .sets
            .get(set)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Replaces the selection.
    pub fn select(&self, ids: Vec<NodeId>) {
        self.inner.write().selection = ids;
    }

    /// Returns the current selection.
    #[must_use]
    pub fn selection(&self) -> Vec<NodeId> {
        self.inner.read().selection.clone()
    }

    /// Captures a snapshot of the node for later restoration.
    pub fn snapshot(&self, id: NodeId) -> SceneResult<NodeSnapshot> {
        let inner = self.inner.read();
        let node = inner.node(id)?;
        let index_in_parent = match node.parent {
            Some(p) => inner
                .node(p)?
                .children
                .iter()
                .position(|c| *c == id)
                .unwrap_or(0),
            None => inner.top_level.iter().position(|c| *c == id).unwrap_or(0),
        };
        let set_memberships = inner
            .sets
            .iter()
            .filter(|(_, members)| members.contains(&id))
            .map(|(name, _)| name.clone())
            .collect();
        Ok(NodeSnapshot {
            id,
            name: node.name.clone(),
            type_name: node.type_name.clone(),
            parent: node.parent,
            index_in_parent,
            attributes: node.attributes.clone(),
            locked: node.locked,
            hidden_in_outliner: node.hidden_in_outliner,
            set_memberships,
        })
    }

    /// Deletes the node and returns its snapshot.
    ///
    /// The node must have no children; callers delete subtrees most
    /// specific first. The node is also dropped from sets and from the
    /// selection.
    pub fn delete_node(&self, id: NodeId) -> SceneResult<NodeSnapshot> {
        let snapshot = self.snapshot(id)?;
        let mut inner = self.inner.write();
        if !inner.node(id)?.children.is_empty() {
            return Err(SceneError::invalid_delete(id, "node still has children"));
        }
        inner.nodes.remove(&id);
        match snapshot.parent {
            Some(p) => {
                if let Some(parent) = inner.nodes.get_mut(&p) {
                    parent.children.retain(|c| *c != id);
                }
            }
            None => inner.top_level.retain(|c| *c != id),
        }
        let empty_sets: Vec<String> = inner
            .sets
            .iter_mut()
            .filter_map(|(name, members)| {
                members.remove(&id);
                members.is_empty().then(|| name.clone())
            })
            .collect();
        for name in empty_sets {
            inner.sets.remove(&name);
        }
        inner.selection.retain(|c| *c != id);
        Ok(snapshot)
    }

    /// Recreates a node from a snapshot, with its original handle,
    /// placement, attributes, flags, and set memberships.
    pub fn restore(&self, snapshot: &NodeSnapshot) -> SceneResult<NodeId> {
        let mut inner = self.inner.write();
        if inner.nodes.contains_key(&snapshot.id) {
            return Err(SceneError::invalid_restore(snapshot.id, "node already exists"));
        }
        if let Some(p) = snapshot.parent {
            inner.node(p)?;
        }
        inner.nodes.insert(
            snapshot.id,
            NodeData {
                name: snapshot.name.clone(),
                type_name: snapshot.type_name.clone(),
                parent: snapshot.parent,
                children: Vec::new(),
                attributes: snapshot.attributes.clone(),
                locked: snapshot.locked,
                hidden_in_outliner: snapshot.hidden_in_outliner,
            },
        );
        match snapshot.parent {
            Some(p) => {
                let parent = inner.node_mut(p)?;
                let index = snapshot.index_in_parent.min(parent.children.len());
                parent.children.insert(index, snapshot.id);
            }
            None => {
                let index = snapshot.index_in_parent.min(inner.top_level.len());
                inner.top_level.insert(index, snapshot.id);
            }
        }
        for set in &snapshot.set_memberships {
            inner.sets.entry(set.clone()).or_default().insert(snapshot.id);
        }
        Ok(snapshot.id)
    }

    /// Returns the total number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }
}

impl std::fmt::Debug for SceneGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SceneGraph")
            .field("nodes", &inner.nodes.len())
            .field("top_level", &inner.top_level.len())
            .field("sets", &inner.sets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_tree(graph: &SceneGraph) -> (NodeId, NodeId, NodeId) {
        let root = graph.create_node("root", "group", None).unwrap();
        let mid = graph.create_node("mid", "group", Some(root)).unwrap();
        let leaf = graph.create_node("leaf", "shape", Some(mid)).unwrap();
        (root, mid, leaf)
    }

    #[test]
    fn create_and_query() {
        let graph = SceneGraph::new();
        let (root, mid, leaf) = small_tree(&graph);
        assert_eq!(graph.name(leaf).unwrap(), "leaf");
        assert_eq!(graph.type_name(leaf).unwrap(), "shape");
        assert_eq!(graph.parent(leaf).unwrap(), Some(mid));
        assert_eq!(graph.children(root).unwrap(), vec![mid]);
        assert_eq!(graph.find_top_level("root"), Some(root));
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn sibling_names_are_unique() {
        let graph = SceneGraph::new();
        let root = graph.create_node("root", "group", None).unwrap();
        graph.create_node("a", "group", Some(root)).unwrap();
        assert!(graph.create_node("a", "group", Some(root)).is_err());
        assert_eq!(graph.unique_child_name(Some(root), "a"), "a1");
        assert_eq!(graph.unique_child_name(Some(root), "b"), "b");
    }

    #[test]
    fn path_round_trip() {
        let graph = SceneGraph::new();
        let (_, _, leaf) = small_tree(&graph);
        let path = graph.path_string(leaf).unwrap();
        assert_eq!(path, "|root|mid|leaf");
        assert_eq!(graph.resolve_path(&path), Some(leaf));
        assert_eq!(graph.resolve_path("|root|missing"), None);
    }

    #[test]
    fn descendants_children_first_order() {
        let graph = SceneGraph::new();
        let (root, mid, leaf) = small_tree(&graph);
        let order = graph.descendants_children_first(root).unwrap();
        assert_eq!(order, vec![leaf, mid, root]);
    }

    #[test]
    fn lock_subtree_applies_to_descendants() {
        let graph = SceneGraph::new();
        let (root, mid, leaf) = small_tree(&graph);
        graph.lock_subtree(root, true).unwrap();
        assert!(graph.locked(root).unwrap());
        assert!(graph.locked(mid).unwrap());
        assert!(graph.locked(leaf).unwrap());
        graph.lock_subtree(root, false).unwrap();
        assert!(!graph.locked(leaf).unwrap());
    }

    #[test]
    fn sets_and_selection_follow_deletion() {
        let graph = SceneGraph::new();
        let (_, _, leaf) = small_tree(&graph);
        graph.add_to_set("edits", leaf).unwrap();
        graph.select(vec![leaf]);
        assert_eq!(graph.set_members("edits"), vec![leaf]);

        graph.delete_node(leaf).unwrap();
        assert!(graph.set_members("edits").is_empty());
        assert!(graph.selection().is_empty());
    }

    #[test]
    fn delete_requires_leaf() {
        let graph = SceneGraph::new();
        let (root, _, _) = small_tree(&graph);
        assert!(graph.delete_node(root).is_err());
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let graph = SceneGraph::new();
        let (root, mid, leaf) = small_tree(&graph);
        graph.set_attr(leaf, "k", "v").unwrap();
        graph.add_to_set("edits", leaf).unwrap();

        let snapshot = graph.delete_node(leaf).unwrap();
        assert!(!graph.contains(leaf));

        let restored = graph.restore(&snapshot).unwrap();
        assert_eq!(restored, leaf);
        assert_eq!(graph.parent(leaf).unwrap(), Some(mid));
        assert_eq!(graph.attr(leaf, "k").unwrap(), "v");
        assert_eq!(graph.set_members("edits"), vec![leaf]);
        assert_eq!(graph.children(root).unwrap(), vec![mid]);
    }
}

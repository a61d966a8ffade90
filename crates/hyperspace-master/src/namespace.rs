//! Hierarchical namespace of files and directories.
//!
//! Nodes are owned by an id-keyed table; parents, children and subscribers
//! refer to each other by name or id only. Persistent nodes are stored in the
//! [`KvStore`] under `node/<path>` as bincode-encoded [`NodeRecord`]s.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;

use crate::kvstore::{BatchOp, KvStore};
use crate::lock::LockTable;
use crate::types::*;

const NODE_PREFIX: &[u8] = b"node/";

/// A file or directory in the namespace.
#[derive(Clone, Debug)]
pub struct Node {
    /// Node identifier.
    pub id: NodeId,
    /// Absolute path.
    pub path: String,
    /// Whether children may be created below this node.
    pub is_dir: bool,
    /// Removed once its last handle closes.
    pub ephemeral: bool,
    /// Attribute name to value.
    pub attrs: BTreeMap<String, Vec<u8>>,
    /// Names of direct children.
    pub children: BTreeSet<String>,
    /// Handles currently open on the node.
    pub handles: BTreeSet<HandleId>,
}

/// Persistent form of a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Directory flag.
    pub is_dir: bool,
    /// Attributes.
    pub attrs: BTreeMap<String, Vec<u8>>,
}

impl NodeRecord {
    /// Encodes the record with bincode.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| HyperspaceError::Store(e.to_string()))
    }

    /// Decodes a bincode-encoded record.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| HyperspaceError::Store(e.to_string()))
    }
}

/// Store key of the node at `path`.
pub fn record_key(path: &str) -> Vec<u8> {
    let mut key = NODE_PREFIX.to_vec();
    key.extend_from_slice(path.as_bytes());
    key
}

/// The namespace tree.
pub struct NamespaceTree {
    nodes: HashMap<NodeId, Node>,
    paths: HashMap<String, NodeId>,
    next_id: u64,
}

impl Default for NamespaceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceTree {
    /// Creates a tree holding only the root directory.
    pub fn new() -> Self {
        let root = Node {
            id: NodeId::ROOT,
            path: "/".to_string(),
            is_dir: true,
            ephemeral: false,
            attrs: BTreeMap::new(),
            children: BTreeSet::new(),
            handles: BTreeSet::new(),
        };
        let mut nodes = HashMap::new();
        nodes.insert(NodeId::ROOT, root);
        let mut paths = HashMap::new();
        paths.insert("/".to_string(), NodeId::ROOT);
        Self {
            nodes,
            paths,
            next_id: NodeId::ROOT.as_u64() + 1,
        }
    }

    /// Rebuilds the persistent part of the tree from a store.
    ///
    /// Records whose parent did not survive (it was ephemeral) are dropped
    /// from the store in one batch.
    pub fn recover(kv: &dyn KvStore) -> Result<Self> {
        let mut tree = Self::new();
        let mut records = Vec::new();
        for (key, value) in kv.scan_prefix(NODE_PREFIX)? {
            let path = String::from_utf8(key[NODE_PREFIX.len()..].to_vec())
                .map_err(|e| HyperspaceError::Store(e.to_string()))?;
            records.push((path, NodeRecord::decode(&value)?));
        }
        // parents before children
        records.sort_by_key(|(path, _)| path.matches('/').count());
        let mut orphans = Vec::new();
        for (path, record) in records {
            let id = if path == "/" {
                NodeId::ROOT
            } else {
                match tree.create(&path, record.is_dir, false) {
                    Ok(id) => id,
                    Err(HyperspaceError::NoSuchParent(_)) => {
                        warn!(path, "dropping orphaned node record");
                        orphans.push(BatchOp::Delete {
                            key: record_key(&path),
                        });
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            };
            if let Some(node) = tree.nodes.get_mut(&id) {
                node.attrs = record.attrs;
            }
        }
        if !orphans.is_empty() {
            kv.write_batch(orphans)?;
        }
        Ok(tree)
    }

    /// Checks that `path` could be created right now.
    pub fn check_create(&self, path: &str) -> Result<NodeId> {
        validate_path(path)?;
        if self.paths.contains_key(path) {
            return Err(HyperspaceError::NodeExists(path.to_string()));
        }
        let (parent_path, _) = split_path(path);
        let parent = self
            .paths
            .get(parent_path)
            .and_then(|id| self.nodes.get(id))
            .ok_or_else(|| HyperspaceError::NoSuchParent(path.to_string()))?;
        if !parent.is_dir {
            return Err(HyperspaceError::NotADirectory(parent.path.clone()));
        }
        Ok(parent.id)
    }

    /// Creates a node and links it into its parent.
    pub fn create(&mut self, path: &str, is_dir: bool, ephemeral: bool) -> Result<NodeId> {
        let parent = self.check_create(path)?;
        let (_, name) = split_path(path);
        let id = NodeId::new(self.next_id);
        self.next_id += 1;

        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.insert(name.to_string());
        }
        self.nodes.insert(
            id,
            Node {
                id,
                path: path.to_string(),
                is_dir,
                ephemeral,
                attrs: BTreeMap::new(),
                children: BTreeSet::new(),
                handles: BTreeSet::new(),
            },
        );
        self.paths.insert(path.to_string(), id);
        Ok(id)
    }

    /// Checks that the node at `path` could be removed right now.
    pub fn check_remove(&self, path: &str, locks: &LockTable) -> Result<NodeId> {
        validate_path(path)?;
        if path == "/" {
            return Err(HyperspaceError::InvalidPath(path.to_string()));
        }
        let id = self.lookup(path)?;
        let node = &self.nodes[&id];
        if !node.children.is_empty() {
            return Err(HyperspaceError::NodeNotEmpty(path.to_string()));
        }
        if locks.is_held(id) {
            return Err(HyperspaceError::LockHeld(path.to_string()));
        }
        Ok(id)
    }

    /// Unlinks and returns the node at `path`.
    pub fn remove(&mut self, path: &str, locks: &LockTable) -> Result<Node> {
        let id = self.check_remove(path, locks)?;
        let node = self
            .nodes
            .remove(&id)
            .ok_or_else(|| HyperspaceError::NoSuchNode(path.to_string()))?;
        self.paths.remove(path);
        let (parent_path, name) = split_path(path);
        if let Some(parent) = self.paths.get(parent_path).and_then(|p| self.nodes.get_mut(p)) {
            parent.children.remove(name);
        }
        Ok(node)
    }

    /// Resolves an absolute path.
    pub fn lookup(&self, path: &str) -> Result<NodeId> {
        validate_path(path)?;
        self.paths
            .get(path)
            .copied()
            .ok_or_else(|| HyperspaceError::NoSuchNode(path.to_string()))
    }

    /// Returns true if `path` names an existing node.
    pub fn exists(&self, path: &str) -> bool {
        self.paths.contains_key(path)
    }

    /// Names of the direct children of `path`, sorted.
    pub fn list_children(&self, path: &str) -> Result<Vec<String>> {
        let id = self.lookup(path)?;
        Ok(self.nodes[&id].children.iter().cloned().collect())
    }

    /// Node by id.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Mutable node by id.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Parent of a node; None for the root.
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        let node = self.nodes.get(&id)?;
        if node.id == NodeId::ROOT {
            return None;
        }
        let (parent_path, _) = split_path(&node.path);
        self.paths.get(parent_path).copied()
    }

    /// Persistent form of a node; None for ephemeral nodes.
    pub fn record_of(&self, id: NodeId) -> Option<NodeRecord> {
        let node = self.nodes.get(&id)?;
        if node.ephemeral {
            return None;
        }
        Some(NodeRecord {
            is_dir: node.is_dir,
            attrs: node.attrs.clone(),
        })
    }

    /// Number of nodes including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false; the root is never removed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::MemoryKvStore;

    #[test]
    fn test_create_and_lookup() {
        let mut tree = NamespaceTree::new();
        let dir = tree.create("/a", true, false).unwrap();
        let file = tree.create("/a/b", false, false).unwrap();
        assert_eq!(tree.lookup("/a").unwrap(), dir);
        assert_eq!(tree.lookup("/a/b").unwrap(), file);
        assert_eq!(tree.list_children("/a").unwrap(), vec!["b".to_string()]);
        assert_eq!(tree.parent_of(file), Some(dir));
        assert_eq!(tree.parent_of(NodeId::ROOT), None);
    }

    #[test]
    fn test_create_errors() {
        let mut tree = NamespaceTree::new();
        tree.create("/a", false, false).unwrap();
        assert_eq!(
            tree.create("/a", false, false),
            Err(HyperspaceError::NodeExists("/a".into()))
        );
        assert_eq!(
            tree.create("/x/y", false, false),
            Err(HyperspaceError::NoSuchParent("/x/y".into()))
        );
        assert_eq!(
            tree.create("/a/b", false, false),
            Err(HyperspaceError::NotADirectory("/a".into()))
        );
        assert!(matches!(
            tree.create("a", false, false),
            Err(HyperspaceError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_remove() {
        let mut tree = NamespaceTree::new();
        let locks = LockTable::new();
        tree.create("/a", true, false).unwrap();
        tree.create("/a/b", false, false).unwrap();
        assert_eq!(
            tree.remove("/a", &locks).map(|n| n.id),
            Err(HyperspaceError::NodeNotEmpty("/a".into()))
        );
        tree.remove("/a/b", &locks).unwrap();
        assert!(tree.list_children("/a").unwrap().is_empty());
        tree.remove("/a", &locks).unwrap();
        assert!(!tree.exists("/a"));
        assert_eq!(
            tree.lookup("/a"),
            Err(HyperspaceError::NoSuchNode("/a".into()))
        );
    }

    #[test]
    fn test_remove_locked_node() {
        let mut tree = NamespaceTree::new();
        let mut locks = LockTable::new();
        let id = tree.create("/l", false, false).unwrap();
        locks
            .try_acquire(id, SessionId::new(1), HandleId::new(1), LockMode::Shared)
            .unwrap();
        assert!(matches!(
            tree.remove("/l", &locks),
            Err(HyperspaceError::LockHeld(_))
        ));
    }

    #[test]
    fn test_root_cannot_be_removed() {
        let mut tree = NamespaceTree::new();
        assert!(matches!(
            tree.remove("/", &LockTable::new()),
            Err(HyperspaceError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_recover_from_store() {
        let kv = MemoryKvStore::new();
        let mut attrs = BTreeMap::new();
        attrs.insert("owner".to_string(), b"x".to_vec());
        let file = NodeRecord {
            is_dir: false,
            attrs,
        };
        let dir = NodeRecord {
            is_dir: true,
            attrs: BTreeMap::new(),
        };
        kv.put(record_key("/d/f"), file.encode().unwrap()).unwrap();
        kv.put(record_key("/d"), dir.encode().unwrap()).unwrap();

        let tree = NamespaceTree::recover(&kv).unwrap();
        let id = tree.lookup("/d/f").unwrap();
        assert_eq!(tree.get(id).unwrap().attrs.get("owner"), Some(&b"x".to_vec()));
        assert!(tree.get(tree.lookup("/d").unwrap()).unwrap().is_dir);
        assert_eq!(tree.record_of(id), Some(file));
    }

    #[test]
    fn test_recover_drops_orphaned_records() {
        let kv = MemoryKvStore::new();
        let file = NodeRecord {
            is_dir: false,
            attrs: BTreeMap::new(),
        };
        kv.put(record_key("/kept"), file.encode().unwrap()).unwrap();
        kv.put(record_key("/gone/child"), file.encode().unwrap()).unwrap();
        kv.put(record_key("/gone/child/deeper"), file.encode().unwrap()).unwrap();

        let tree = NamespaceTree::recover(&kv).unwrap();
        assert!(tree.exists("/kept"));
        assert!(!tree.exists("/gone/child"));
        assert_eq!(kv.scan_prefix(NODE_PREFIX).unwrap().len(), 1);
    }

    #[test]
    fn test_ephemeral_nodes_have_no_record() {
        let mut tree = NamespaceTree::new();
        let id = tree.create("/e", false, true).unwrap();
        assert!(tree.record_of(id).is_none());
    }
}

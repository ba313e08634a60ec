//! Directory snapshot adapter
//!
//! Wraps the `list-subtree` call and hands back an owned [`ArchiveNode`]
//! tree. Every walk over a tree uses an explicit worklist bounded by
//! [`TraversalLimits`], so a pathological directory depth or size cannot
//! blow the stack or stall a listing.

use archive_common::config::TraversalConfig;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::{ArchiveBackend, BackendError};

/// Node type as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

/// One entry of a directory snapshot
///
/// `path` may be omitted by a backend; it is then derived by joining the
/// parent's path with `name` (see [`ArchiveNode::normalize`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveNode {
    pub name: String,

    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(rename = "type")]
    pub kind: NodeKind,

    #[serde(default)]
    pub children: Vec<ArchiveNode>,

    /// Modification time in whole seconds since the epoch, 0 if unknown
    #[serde(default, alias = "mtime_ts", deserialize_with = "deserialize_mtime")]
    pub mtime: i64,
}

/// Accept integer or fractional seconds; anything unusable becomes 0
fn deserialize_mtime<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(raw
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as i64)
        .unwrap_or(0))
}

impl ArchiveNode {
    pub fn folder(name: impl Into<String>, path: Option<PathBuf>, mtime: i64) -> Self {
        Self {
            name: name.into(),
            path,
            kind: NodeKind::Folder,
            children: Vec::new(),
            mtime,
        }
    }

    pub fn file(name: impl Into<String>, path: Option<PathBuf>, mtime: i64) -> Self {
        Self {
            name: name.into(),
            path,
            kind: NodeKind::File,
            children: Vec::new(),
            mtime,
        }
    }

    /// Builder helper used by listings assembled in memory
    pub fn with_children(mut self, children: Vec<ArchiveNode>) -> Self {
        self.children = children;
        self
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    /// This node's path, or `parent/name` when the backend omitted it
    pub fn resolved_path(&self, parent: Option<&Path>) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| parent.map(|p| p.join(&self.name)))
    }

    /// Enforce node invariants across the tree
    ///
    /// - file nodes never have children
    /// - missing paths are derived from the parent's path
    /// - children past `max_depth`, or past `max_nodes` visited nodes, are cut
    pub fn normalize(&mut self, limits: TraversalLimits) -> TraversalReport {
        let mut report = TraversalReport::default();
        let mut stack: Vec<(&mut ArchiveNode, usize)> = vec![(self, 0)];

        while let Some((node, depth)) = stack.pop() {
            report.visited += 1;

            if node.is_file() {
                if !node.children.is_empty() {
                    warn!("file node {} reported children; dropping them", node.name);
                    node.children.clear();
                }
                continue;
            }

            if depth >= limits.max_depth || report.visited >= limits.max_nodes {
                if !node.children.is_empty() {
                    report.truncated = true;
                    node.children.clear();
                }
                continue;
            }

            let parent_path = node.path.clone();
            for child in node.children.iter_mut() {
                if child.path.is_none() {
                    child.path = parent_path.as_ref().map(|p| p.join(&child.name));
                }
                stack.push((child, depth + 1));
            }
        }

        if report.truncated {
            warn!(
                "snapshot truncated at depth {} / {} nodes",
                limits.max_depth, limits.max_nodes
            );
        }
        report
    }

    /// Bounded pre-order walk over this node and its descendants
    pub fn walk(&self, limits: TraversalLimits) -> Walk<'_> {
        Walk {
            stack: vec![(self, 0)],
            limits,
            visited: 0,
        }
    }

    /// First descendant (pre-order) satisfying `pred`
    pub fn find_first<F>(&self, limits: TraversalLimits, mut pred: F) -> Option<&ArchiveNode>
    where
        F: FnMut(&ArchiveNode) -> bool,
    {
        self.walk(limits).find(|n| pred(n))
    }

    /// Paths of every file (pre-order) satisfying `pred`
    pub fn collect_file_paths<F>(&self, limits: TraversalLimits, mut pred: F) -> Vec<PathBuf>
    where
        F: FnMut(&ArchiveNode) -> bool,
    {
        self.walk(limits)
            .filter(|n| n.is_file() && pred(n))
            .filter_map(|n| n.path.clone())
            .collect()
    }
}

/// Bounds applied to every tree walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalLimits {
    pub max_depth: usize,
    pub max_nodes: usize,
}

impl Default for TraversalLimits {
    fn default() -> Self {
        TraversalConfig::default().into()
    }
}

impl From<TraversalConfig> for TraversalLimits {
    fn from(config: TraversalConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_nodes: config.max_nodes.max(1),
        }
    }
}

/// Outcome of [`ArchiveNode::normalize`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalReport {
    pub visited: usize,
    pub truncated: bool,
}

/// Iterator returned by [`ArchiveNode::walk`]
pub struct Walk<'a> {
    stack: Vec<(&'a ArchiveNode, usize)>,
    limits: TraversalLimits,
    visited: usize,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a ArchiveNode;

    fn next(&mut self) -> Option<Self::Item> {
        if self.visited >= self.limits.max_nodes {
            return None;
        }
        let (node, depth) = self.stack.pop()?;
        self.visited += 1;

        if depth < self.limits.max_depth {
            // reversed so the first child is visited first
            for child in node.children.iter().rev() {
                self.stack.push((child, depth + 1));
            }
        }
        Some(node)
    }
}

/// Fetches normalized snapshots through the backend
#[derive(Clone)]
pub struct DirectorySnapshot {
    backend: Arc<dyn ArchiveBackend>,
    limits: TraversalLimits,
}

impl DirectorySnapshot {
    pub fn new(backend: Arc<dyn ArchiveBackend>, limits: TraversalLimits) -> Self {
        Self { backend, limits }
    }

    pub fn limits(&self) -> TraversalLimits {
        self.limits
    }

    /// List `root` and normalize the result
    ///
    /// The returned root node always carries `root` as its path, so every
    /// descendant ends up with a resolved path.
    pub async fn fetch(&self, root: &Path, recursive: bool) -> Result<ArchiveNode, BackendError> {
        self.fetch_reported(root, recursive).await.map(|(tree, _)| tree)
    }

    /// [`fetch`](Self::fetch), also returning what normalization visited and cut
    pub async fn fetch_reported(
        &self,
        root: &Path,
        recursive: bool,
    ) -> Result<(ArchiveNode, TraversalReport), BackendError> {
        let mut tree = self.backend.list_subtree(root, recursive).await?;
        if tree.path.is_none() {
            tree.path = Some(root.to_path_buf());
        }
        let report = tree.normalize(self.limits);
        debug!(
            "snapshot of {} has {} nodes",
            root.display(),
            report.visited
        );
        Ok((tree, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_depth: usize, max_nodes: usize) -> TraversalLimits {
        TraversalLimits {
            max_depth,
            max_nodes,
        }
    }

    fn deep_chain(depth: usize) -> ArchiveNode {
        let mut node = ArchiveNode::file("leaf.jpg", None, 0);
        for i in (0..depth).rev() {
            node = ArchiveNode::folder(format!("d{}", i), None, 0).with_children(vec![node]);
        }
        node
    }

    #[test]
    fn test_deserialize_backend_wire_form() {
        let json = r#"{
            "name": "Station",
            "type": "folder",
            "path": "/srv/Station",
            "mtime_ts": 1700000000.75,
            "children": [
                { "name": "a.jpg", "type": "file", "mtime": 12 }
            ]
        }"#;
        let node: ArchiveNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.mtime, 1_700_000_000);
        assert!(node.is_folder());
        assert_eq!(node.children[0].mtime, 12);
        assert!(node.children[0].path.is_none());
    }

    #[test]
    fn test_missing_and_null_mtime_default_to_zero() {
        let node: ArchiveNode =
            serde_json::from_str(r#"{"name":"x","type":"file","mtime":null}"#).unwrap();
        assert_eq!(node.mtime, 0);
        let node: ArchiveNode = serde_json::from_str(r#"{"name":"x","type":"file"}"#).unwrap();
        assert_eq!(node.mtime, 0);
    }

    #[test]
    fn test_normalize_derives_paths_and_strips_file_children() {
        let mut tree = ArchiveNode::folder("root", Some(PathBuf::from("/r")), 0).with_children(vec![
            ArchiveNode::folder("2019 Visit", None, 0).with_children(vec![
                ArchiveNode::file("note.txt", None, 0)
                    .with_children(vec![ArchiveNode::file("bogus", None, 0)]),
            ]),
        ]);

        let report = tree.normalize(TraversalLimits::default());
        assert!(!report.truncated);

        let record = &tree.children[0];
        assert_eq!(record.path, Some(PathBuf::from("/r/2019 Visit")));
        let note = &record.children[0];
        assert_eq!(note.path, Some(PathBuf::from("/r/2019 Visit/note.txt")));
        assert!(note.children.is_empty());
    }

    #[test]
    fn test_normalize_cuts_deep_trees() {
        let mut tree = deep_chain(50);
        let report = tree.normalize(limits(5, 10_000));
        assert!(report.truncated);
        assert_eq!(tree.walk(limits(100, 10_000)).count(), 6);
    }

    #[test]
    fn test_walk_is_preorder() {
        let tree = ArchiveNode::folder("r", None, 0).with_children(vec![
            ArchiveNode::folder("a", None, 0).with_children(vec![ArchiveNode::file("a1", None, 0)]),
            ArchiveNode::file("b", None, 0),
        ]);
        let names: Vec<_> = tree
            .walk(TraversalLimits::default())
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, vec!["r", "a", "a1", "b"]);
    }

    #[test]
    fn test_walk_respects_node_budget() {
        let tree = ArchiveNode::folder("r", None, 0).with_children(
            (0..20)
                .map(|i| ArchiveNode::file(format!("{}.jpg", i), None, 0))
                .collect(),
        );
        assert_eq!(tree.walk(limits(10, 5)).count(), 5);
    }

    #[test]
    fn test_find_first_and_collect() {
        let mut tree = ArchiveNode::folder("r", Some(PathBuf::from("/r")), 0).with_children(vec![
            ArchiveNode::folder("photos", None, 0).with_children(vec![
                ArchiveNode::file("1.jpg", None, 0),
                ArchiveNode::file("2.png", None, 0),
            ]),
            ArchiveNode::file("note.txt", None, 0),
        ]);
        tree.normalize(TraversalLimits::default());

        let note = tree
            .find_first(TraversalLimits::default(), |n| n.name == "note.txt")
            .unwrap();
        assert_eq!(note.path, Some(PathBuf::from("/r/note.txt")));

        let images = tree.collect_file_paths(TraversalLimits::default(), |n| {
            n.name.ends_with(".jpg") || n.name.ends_with(".png")
        });
        assert_eq!(
            images,
            vec![PathBuf::from("/r/photos/1.jpg"), PathBuf::from("/r/photos/2.png")]
        );
    }
}

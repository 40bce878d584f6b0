//! Directory tree construction from a queue message.
//!
//! Every directory group becomes a node; ancestors that were not listed as
//! groups are synthesized so that each node's parent is its immediate path
//! parent. Paths are normalized to `a/b/c` form before any comparison.

use std::collections::BTreeMap;

use foundry_core::batch::{NodeState, ProcessingConfig, QueueMessage};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("queue message has an empty batch id")]
    EmptyBatchId,

    #[error("queue message has an empty root path")]
    EmptyRootPath,

    #[error("directory group '{0}' appears more than once")]
    DuplicateGroup(String),

    #[error("directory group '{path}' is outside the batch root '{root}'")]
    OutsideRoot { path: String, root: String },
}

/// A validated node tree plus the normalized root path it hangs from.
#[derive(Debug)]
pub struct BatchTree {
    pub root_path: String,
    pub nodes: BTreeMap<String, NodeState>,
}

/// Validate a queue message and build its directory node tree.
///
/// The root node always exists, even when the message does not list it as a
/// group. Synthesized intermediate nodes carry the default processing
/// configuration and no files.
pub fn build_nodes(message: &QueueMessage) -> Result<BatchTree, TreeError> {
    if message.batch_id.trim().is_empty() {
        return Err(TreeError::EmptyBatchId);
    }
    let root = normalize(&message.root_path);
    if root.is_empty() {
        return Err(TreeError::EmptyRootPath);
    }

    let mut nodes: BTreeMap<String, NodeState> = BTreeMap::new();
    nodes.insert(
        root.clone(),
        NodeState::new(&root, 0, ProcessingConfig::default()),
    );

    let mut root_listed = false;
    for group in &message.groups {
        let path = normalize(&group.path);
        if path != root && !path.starts_with(&format!("{root}/")) {
            return Err(TreeError::OutsideRoot {
                path: group.path.clone(),
                root,
            });
        }
        if path == root {
            // Root listed explicitly: adopt its configuration and files.
            if root_listed {
                return Err(TreeError::DuplicateGroup(path));
            }
            root_listed = true;
            if let Some(node) = nodes.get_mut(&root) {
                node.config = group.config;
                node.files = group.files.clone();
            }
            continue;
        }
        let depth = depth_below(&root, &path);
        let mut node = NodeState::new(&path, depth, group.config);
        node.files = group.files.clone();
        if nodes.insert(path.clone(), node).is_some() {
            return Err(TreeError::DuplicateGroup(path));
        }
    }

    // Synthesize missing ancestors, then wire parent and child links.
    let listed: Vec<String> = nodes.keys().cloned().collect();
    for path in listed {
        let mut current = path;
        while current != root {
            let parent = match current.rsplit_once('/') {
                Some((parent, _)) => parent.to_string(),
                None => break,
            };
            nodes.entry(parent.clone()).or_insert_with(|| {
                NodeState::new(&parent, depth_below(&root, &parent), ProcessingConfig::default())
            });
            if let Some(node) = nodes.get_mut(&current) {
                node.parent = Some(parent.clone());
            }
            if let Some(node) = nodes.get_mut(&parent) {
                node.children.insert(current.clone());
            }
            current = parent;
        }
    }

    Ok(BatchTree {
        root_path: root,
        nodes,
    })
}

/// Collapse repeated separators and strip leading/trailing slashes.
fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn depth_below(root: &str, path: &str) -> usize {
    if path == root {
        0
    } else {
        path[root.len() + 1..].split('/').count()
    }
}

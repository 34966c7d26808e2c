//! JSON shapes printed by the subcommands.

use hangscope_core::model::{CallNode, CallTree, IndexIntoStackTable, Profile};
use hangscope_core::selectors::ThreadView;
use hangscope_core::summary::{CategorySummary, RunnableSummary};
use hangscope_protocol::SharedStr;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEntry {
    pub index: usize,
    pub name: SharedStr,
    pub process_type: SharedStr,
    pub samples: usize,
}

pub fn thread_list(profile: &Profile) -> Vec<ThreadEntry> {
    profile
        .threads
        .iter()
        .enumerate()
        .map(|(index, thread)| ThreadEntry {
            index,
            name: thread.name().clone(),
            process_type: thread.process_type().clone(),
            samples: thread.samples().len(),
        })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    #[serde(flatten)]
    pub node: CallNode,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeReport {
    pub transforms: Vec<String>,
    pub total_time: f32,
    pub selected_stack: Option<IndexIntoStackTable>,
    /// Sample indices under the selected node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_samples: Option<Vec<usize>>,
    /// From the root down through the selection (or the heaviest root) and
    /// on along the heaviest children. Always expanded.
    pub heaviest_path: Vec<IndexIntoStackTable>,
    pub roots: Vec<TreeNode>,
}

impl TreeReport {
    pub fn new(view: &ThreadView, max_depth: Option<u32>) -> Self {
        let tree = &view.call_tree;
        let heaviest_path = view
            .selected_stack
            .or_else(|| tree.heaviest_root())
            .map(|stack| open_path(tree, stack))
            .unwrap_or_default();
        Self {
            transforms: view.transform_labels.clone(),
            total_time: tree.root_total_time(),
            selected_stack: view.selected_stack,
            selected_samples: view.selected_stack.map(|stack| tree.sample_indices(stack)),
            roots: tree
                .roots()
                .iter()
                .filter_map(|&root| expand(tree, root, max_depth, &heaviest_path))
                .collect(),
            heaviest_path,
        }
    }
}

/// Ancestors of `stack`, `stack` itself, then its heaviest descendants.
fn open_path(tree: &CallTree, stack: IndexIntoStackTable) -> Vec<IndexIntoStackTable> {
    let mut path = Vec::new();
    let mut ancestor = tree.parent(stack);
    while let Some(parent) = ancestor {
        path.push(parent);
        ancestor = tree.parent(parent);
    }
    path.reverse();
    path.extend(tree.heaviest_path_under(stack));
    path
}

/// Below `max_depth` only nodes on `open` are expanded.
fn expand(
    tree: &CallTree,
    stack: IndexIntoStackTable,
    max_depth: Option<u32>,
    open: &[IndexIntoStackTable],
) -> Option<TreeNode> {
    let node = tree.node(stack)?.clone();
    let cut = max_depth.is_some_and(|max| node.depth >= max);
    let children = if tree.has_children(stack) {
        tree.children(stack)
            .iter()
            .filter(|&&child| !cut || open.contains(&child))
            .filter_map(|&child| expand(tree, child, max_depth, open))
            .collect()
    } else {
        Vec::new()
    };
    Some(TreeNode { node, children })
}

#[derive(Debug, Serialize)]
pub struct SummaryReport {
    pub categories: CategorySummary,
    pub runnables: Vec<RunnableSummary>,
}

use hangscope_protocol::{FuncPath, Transform};

use super::func_matches_implementation;
use crate::model::{IndexIntoFuncTable, Thread};

/// Where a call node selected by `func_path` ends up once `transform` has
/// been applied to `thread`.
///
/// `None` means the node no longer exists. Path transforms match their path
/// the way the transform does, skipping frames outside their
/// implementation.
pub fn path_after_transform(thread: &Thread, transform: &Transform, func_path: &[usize]) -> Option<FuncPath> {
    let matches = |func, implementation| func_matches_implementation(thread, func, implementation);
    match transform {
        Transform::FocusSubtree {
            inverted: true, ..
        } => Some(func_path.to_vec()),
        Transform::FocusSubtree {
            func_path: focused,
            implementation,
            ..
        } => {
            let root = focus_root(func_path, focused, |func| matches(func, *implementation))?;
            Some(func_path[root..].to_vec())
        }
        Transform::FocusFunction { func_index } => {
            let first = func_path.iter().position(|f| f == func_index)?;
            Some(func_path[first..].to_vec())
        }
        Transform::MergePathIntoCaller {
            func_path: merged,
            implementation,
        } => {
            let Some(at) = merged_frame(func_path, merged, |func| matches(func, *implementation)) else {
                return Some(func_path.to_vec());
            };
            let mut path = func_path.to_vec();
            path.remove(at);
            non_empty(path)
        }
        Transform::MergeFunction { func_index } => {
            non_empty(func_path.iter().copied().filter(|f| f != func_index).collect())
        }
        Transform::DropFunction { func_index } => {
            (!func_path.contains(func_index)).then(|| func_path.to_vec())
        }
        Transform::CollapseLib {
            lib_index,
            collapsed_func_index,
            implementation,
        } => {
            let mut path: FuncPath = Vec::with_capacity(func_path.len());
            let mut in_run = false;
            for &func in func_path {
                if thread.func_lib(func) == Some(*lib_index) {
                    if !in_run {
                        path.push(*collapsed_func_index);
                    }
                    in_run = true;
                } else if !in_run || matches(func, *implementation) {
                    path.push(func);
                    in_run = false;
                }
            }
            Some(path)
        }
        Transform::CollapseDirectRecursion {
            func_index,
            implementation,
        } => {
            let mut path: FuncPath = Vec::with_capacity(func_path.len());
            let mut recursive = false;
            for &func in func_path {
                if recursive && (func == *func_index || !matches(func, *implementation)) {
                    continue;
                }
                path.push(func);
                recursive = func == *func_index;
            }
            Some(path)
        }
        Transform::CollapseFunctionSubtree { func_index } => {
            let end = func_path
                .iter()
                .position(|f| f == func_index)
                .map_or(func_path.len(), |i| i + 1);
            Some(func_path[..end].to_vec())
        }
    }
}

/// Index of the frame that becomes the root when focusing on `focused`.
/// An empty focus keeps the whole path.
fn focus_root(
    func_path: &[IndexIntoFuncTable],
    focused: &[IndexIntoFuncTable],
    matches: impl Fn(IndexIntoFuncTable) -> bool,
) -> Option<usize> {
    if focused.is_empty() {
        return Some(0);
    }
    let mut matched = 0;
    for (i, &func) in func_path.iter().enumerate() {
        if func == focused[matched] {
            matched += 1;
            if matched == focused.len() {
                return Some(i);
            }
        } else if matches(func) {
            return None;
        }
    }
    None
}

/// Index of the frame a merge of `merged` removes, counting only frames
/// that match the merge's implementation.
fn merged_frame(
    func_path: &[IndexIntoFuncTable],
    merged: &[IndexIntoFuncTable],
    matches: impl Fn(IndexIntoFuncTable) -> bool,
) -> Option<usize> {
    let mut depth = 0;
    for (i, &func) in func_path.iter().enumerate() {
        if !matches(func) {
            continue;
        }
        if merged.get(depth) != Some(&func) {
            return None;
        }
        depth += 1;
        if depth == merged.len() {
            return Some(i);
        }
    }
    None
}

fn non_empty(path: FuncPath) -> Option<FuncPath> {
    (!path.is_empty()).then_some(path)
}

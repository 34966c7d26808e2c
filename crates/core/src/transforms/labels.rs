use hangscope_protocol::Transform;

use crate::model::Thread;

/// Human-readable label for one transform, with func and library names
/// resolved against `thread`.
pub fn transform_label(thread: &Thread, transform: &Transform) -> String {
    let func_name = |func| thread.func_name(func);
    match transform {
        Transform::FocusSubtree { func_path, .. } => {
            let last = func_path.last().map(|&f| func_name(f)).unwrap_or_default();
            format!("Focus Node: {last}")
        }
        Transform::FocusFunction { func_index } => format!("Focus: {}", func_name(*func_index)),
        Transform::MergePathIntoCaller { func_path, .. } => {
            let last = func_path.last().map(|&f| func_name(f)).unwrap_or_default();
            format!("Merge Node: {last}")
        }
        Transform::MergeFunction { func_index } => format!("Merge: {}", func_name(*func_index)),
        Transform::DropFunction { func_index } => format!("Drop: {}", func_name(*func_index)),
        Transform::CollapseLib { lib_index, .. } => {
            format!("Collapse: {}", thread.lib_name(*lib_index).unwrap_or_default())
        }
        Transform::CollapseDirectRecursion { func_index, .. } => {
            format!("Collapse recursion: {}", func_name(*func_index))
        }
        Transform::CollapseFunctionSubtree { func_index } => {
            format!("Collapse subtree: {}", func_name(*func_index))
        }
    }
}

//! Structural rewrites of a thread's stack table.
//!
//! Every transform takes a thread and returns a new one. Stack tables are
//! rebuilt in a single forward pass, recording for each old stack the new
//! stack it became (or `None` when it was removed), and sample stacks are
//! then remapped through that table. The number of samples never changes.

mod canonical;
mod collapse;
mod focus;
mod invert;
mod labels;
mod merge;
mod paths;

pub use canonical::post_process_transforms;
pub use collapse::{collapse_direct_recursion, collapse_function_subtree, collapse_lib};
pub use focus::{focus_function, focus_inverted_subtree, focus_subtree};
pub use invert::invert_callstack;
pub use labels::transform_label;
pub use merge::{drop_function, merge_function, merge_path_into_caller};
pub use paths::path_after_transform;

use hangscope_protocol::{Implementation, Transform};
use tracing::debug_span;

use crate::model::{IndexIntoFuncTable, IndexIntoStackTable, Thread};

/// Whether a func is visible to a transform under `implementation`.
/// Funcs without a native library are JS; funcs with one are C++.
pub fn func_matches_implementation(
    thread: &Thread,
    func: IndexIntoFuncTable,
    implementation: Implementation,
) -> bool {
    match implementation {
        Implementation::Combined => true,
        Implementation::Js => thread.func_lib(func).is_none(),
        Implementation::Cpp => thread.func_lib(func).is_some(),
    }
}

pub fn apply_transform(thread: &Thread, transform: &Transform) -> Thread {
    match transform {
        Transform::FocusSubtree {
            func_path,
            implementation,
            inverted: false,
        } => focus_subtree(thread, func_path, *implementation),
        Transform::FocusSubtree {
            func_path,
            implementation,
            inverted: true,
        } => focus_inverted_subtree(thread, func_path, *implementation),
        Transform::FocusFunction { func_index } => focus_function(thread, *func_index),
        Transform::MergePathIntoCaller {
            func_path,
            implementation,
        } => merge_path_into_caller(thread, func_path, *implementation),
        Transform::MergeFunction { func_index } => merge_function(thread, *func_index),
        Transform::DropFunction { func_index } => drop_function(thread, *func_index),
        Transform::CollapseLib {
            lib_index,
            collapsed_func_index,
            implementation,
        } => collapse_lib(thread, *lib_index, *collapsed_func_index, *implementation),
        Transform::CollapseDirectRecursion {
            func_index,
            implementation,
        } => collapse_direct_recursion(thread, *func_index, *implementation),
        Transform::CollapseFunctionSubtree { func_index } => {
            collapse_function_subtree(thread, *func_index)
        }
    }
}

/// Run a transform stack in order through `apply`, which gets the step
/// index, the current thread and the transform. Each label is resolved
/// against the thread its transform is applied to, so a func added by an
/// earlier `collapse-lib` still has a name.
pub fn fold_transform_stack(
    thread: &Thread,
    transforms: &[Transform],
    mut apply: impl FnMut(usize, &Thread, &Transform) -> Thread,
) -> (Thread, Vec<String>) {
    let _span = debug_span!("transform_stack", count = transforms.len()).entered();
    let mut labels = Vec::with_capacity(transforms.len());
    let mut current = thread.clone();
    for (step, transform) in transforms.iter().enumerate() {
        labels.push(transform_label(&current, transform));
        current = apply(step, &current, transform);
    }
    (current, labels)
}

/// Map every sample's stack through `old_stack_to_new_stack`.
///
/// The table must hold one entry per stack of the thread's current stack
/// table. A sample pointing past it means a transform broke the prefix
/// ordering invariant.
#[allow(clippy::panic)]
pub(crate) fn remap_sample_stacks(
    thread: &Thread,
    old_stack_to_new_stack: &[Option<IndexIntoStackTable>],
) -> Vec<Option<IndexIntoStackTable>> {
    thread
        .samples()
        .stack
        .iter()
        .map(|&old| {
            let old = old?;
            match old_stack_to_new_stack.get(old) {
                Some(&new) => new,
                None => panic!(
                    "stack {old} has no mapping ({} of {} stacks mapped)",
                    old_stack_to_new_stack.len(),
                    thread.stack_table().len()
                ),
            }
        })
        .collect()
}

use hangscope_protocol::Implementation;
use tracing::debug_span;

use super::{func_matches_implementation, remap_sample_stacks};
use crate::model::{IndexIntoFuncTable, IndexIntoStackTable, StackTable, Thread};

/// Keep only the stacks under `func_path`, re-rooted so that the last func
/// of the path becomes a root.
///
/// Matching runs left to right; frames that don't match `implementation`
/// are skipped without consuming a path entry. Once the whole path matched,
/// every descendant is kept as is. Samples outside the subtree lose their
/// stack.
pub fn focus_subtree(
    thread: &Thread,
    func_path: &[IndexIntoFuncTable],
    implementation: Implementation,
) -> Thread {
    let _span = debug_span!("focus_subtree", depth = func_path.len()).entered();
    let stack_table = thread.stack_table();
    let path_depth = func_path.len();
    let mut new_stack_table = StackTable::with_capacity(stack_table.len());
    let mut old_stack_to_new_stack = Vec::with_capacity(stack_table.len());
    // How much of `func_path` each stack has matched, `None` once it diverged.
    let mut matched_up_to: Vec<Option<usize>> = Vec::with_capacity(stack_table.len());

    for stack in 0..stack_table.len() {
        let prefix = stack_table.prefix[stack];
        let func = stack_table.func[stack];
        let prefix_matched = match prefix {
            Some(p) => matched_up_to[p],
            None => Some(0),
        };
        let matched = prefix_matched.and_then(|m| {
            if m == path_depth {
                Some(path_depth)
            } else if func_path[m] == func {
                Some(m + 1)
            } else if !func_matches_implementation(thread, func, implementation) {
                Some(m)
            } else {
                None
            }
        });

        let new_stack = if matched == Some(path_depth) {
            // The prefix of the stack completing the path was not kept, so
            // that stack becomes a root.
            let new_prefix = prefix.and_then(|p| old_stack_to_new_stack[p]);
            Some(new_stack_table.push(new_prefix, func))
        } else {
            None
        };
        old_stack_to_new_stack.push(new_stack);
        matched_up_to.push(matched);
    }

    let sample_stacks = remap_sample_stacks(thread, &old_stack_to_new_stack);
    thread.with_stacks(new_stack_table, sample_stacks)
}

/// Focus on a subtree of the inverted tree.
///
/// `func_path` is leaf-to-root. A sample is kept when the funcs walked up
/// from its stack match the path (skipping frames of another
/// implementation); it moves to the stack where the match completed, so the
/// inverted view of the result is rooted at the path's last func. The
/// stack table itself is unchanged.
pub fn focus_inverted_subtree(
    thread: &Thread,
    func_path: &[IndexIntoFuncTable],
    implementation: Implementation,
) -> Thread {
    let _span = debug_span!("focus_inverted_subtree", depth = func_path.len()).entered();
    if func_path.is_empty() {
        return thread.clone();
    }
    let stack_table = thread.stack_table();
    let convert = |leaf: IndexIntoStackTable| -> Option<IndexIntoStackTable> {
        let mut matched = 0;
        let mut current = Some(leaf);
        while let Some(stack) = current {
            let func = stack_table.func[stack];
            if func_path[matched] == func {
                matched += 1;
                if matched == func_path.len() {
                    return Some(stack);
                }
            } else if func_matches_implementation(thread, func, implementation) {
                return None;
            }
            current = stack_table.prefix[stack];
        }
        None
    };

    let mut converted: Vec<Option<Option<IndexIntoStackTable>>> = vec![None; stack_table.len()];
    let sample_stacks = thread
        .samples()
        .stack
        .iter()
        .map(|&stack| {
            let stack = stack?;
            *converted[stack].get_or_insert_with(|| convert(stack))
        })
        .collect();
    thread.with_sample_stacks(sample_stacks)
}

/// Re-root the tree at every outermost call of `func`. Stacks that don't
/// have `func` on them are dropped; nested calls below the first are kept.
pub fn focus_function(thread: &Thread, func_to_focus: IndexIntoFuncTable) -> Thread {
    let _span = debug_span!("focus_function", func = func_to_focus).entered();
    let stack_table = thread.stack_table();
    let mut new_stack_table = StackTable::with_capacity(stack_table.len());
    let mut old_stack_to_new_stack = Vec::with_capacity(stack_table.len());

    for stack in 0..stack_table.len() {
        let func = stack_table.func[stack];
        let new_prefix = stack_table.prefix[stack].and_then(|p| old_stack_to_new_stack[p]);
        let new_stack = if new_prefix.is_some() || func == func_to_focus {
            Some(new_stack_table.push(new_prefix, func))
        } else {
            None
        };
        old_stack_to_new_stack.push(new_stack);
    }

    let sample_stacks = remap_sample_stacks(thread, &old_stack_to_new_stack);
    thread.with_stacks(new_stack_table, sample_stacks)
}

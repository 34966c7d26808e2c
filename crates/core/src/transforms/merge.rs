use hangscope_protocol::Implementation;
use tracing::debug_span;

use super::{func_matches_implementation, remap_sample_stacks};
use crate::model::{IndexIntoFuncTable, StackTable, Thread};

/// Remove the call node at `func_path`, re-parenting its children to its
/// caller and moving its self time there.
///
/// Frames that don't match `implementation` are passed through: they keep
/// the match state of their prefix and don't consume a path entry. A path
/// deeper than any stack, or an empty path, merges nothing.
pub fn merge_path_into_caller(
    thread: &Thread,
    func_path: &[IndexIntoFuncTable],
    implementation: Implementation,
) -> Thread {
    let _span = debug_span!("merge_path_into_caller", depth = func_path.len()).entered();
    if func_path.is_empty() {
        return thread.clone();
    }
    let stack_table = thread.stack_table();
    let mut new_stack_table = StackTable::with_capacity(stack_table.len());
    let mut old_stack_to_new_stack = Vec::with_capacity(stack_table.len());
    // Number of implementation-matching frames from the root to each stack.
    let mut depths: Vec<usize> = Vec::with_capacity(stack_table.len());
    let mut matches: Vec<bool> = Vec::with_capacity(stack_table.len());

    for stack in 0..stack_table.len() {
        let prefix = stack_table.prefix[stack];
        let func = stack_table.func[stack];
        let prefix_depth = prefix.map_or(0, |p| depths[p]);
        let prefix_matches = prefix.is_none_or(|p| matches[p]);

        let mut depth = prefix_depth;
        let mut merge = false;
        let does_match = if prefix_depth >= func_path.len() {
            // Below the merged node.
            false
        } else if !func_matches_implementation(thread, func, implementation) {
            prefix_matches
        } else {
            depth += 1;
            let m = prefix_matches && func_path[prefix_depth] == func;
            merge = m && depth == func_path.len();
            m
        };
        depths.push(depth);
        matches.push(does_match);

        let new_prefix = prefix.and_then(|p| old_stack_to_new_stack[p]);
        if merge {
            old_stack_to_new_stack.push(new_prefix);
        } else {
            old_stack_to_new_stack.push(Some(new_stack_table.push(new_prefix, func)));
        }
    }

    let sample_stacks = remap_sample_stacks(thread, &old_stack_to_new_stack);
    thread.with_stacks(new_stack_table, sample_stacks)
}

/// Splice every call of `func` out of the tree. Children move to the
/// caller, self time goes to the caller, and samples whose stack is a root
/// call of `func` lose their stack.
pub fn merge_function(thread: &Thread, func_to_merge: IndexIntoFuncTable) -> Thread {
    let _span = debug_span!("merge_function", func = func_to_merge).entered();
    let stack_table = thread.stack_table();
    let mut new_stack_table = StackTable::with_capacity(stack_table.len());
    let mut old_stack_to_new_stack = Vec::with_capacity(stack_table.len());

    for stack in 0..stack_table.len() {
        let func = stack_table.func[stack];
        let new_prefix = stack_table.prefix[stack].and_then(|p| old_stack_to_new_stack[p]);
        if func == func_to_merge {
            old_stack_to_new_stack.push(new_prefix);
        } else {
            old_stack_to_new_stack.push(Some(new_stack_table.push(new_prefix, func)));
        }
    }

    let sample_stacks = remap_sample_stacks(thread, &old_stack_to_new_stack);
    thread.with_stacks(new_stack_table, sample_stacks)
}

/// Null out every sample that has `func` anywhere on its stack. The stack
/// table is left alone.
pub fn drop_function(thread: &Thread, func_to_drop: IndexIntoFuncTable) -> Thread {
    let _span = debug_span!("drop_function", func = func_to_drop).entered();
    let stack_table = thread.stack_table();
    let mut contains_func: Vec<bool> = Vec::with_capacity(stack_table.len());
    for stack in 0..stack_table.len() {
        let in_prefix = stack_table.prefix[stack].is_some_and(|p| contains_func[p]);
        contains_func.push(in_prefix || stack_table.func[stack] == func_to_drop);
    }
    let sample_stacks = thread
        .samples()
        .stack
        .iter()
        .map(|&s| s.filter(|&s| !contains_func[s]))
        .collect();
    thread.with_sample_stacks(sample_stacks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{funcs, sample_paths, self_time_by_path, thread_from_samples};

    fn paths(v: &[Option<&str>]) -> Vec<Option<String>> {
        v.iter().map(|p| p.map(str::to_string)).collect()
    }

    #[test]
    fn merge_path_reparents_children() {
        let thread = thread_from_samples(&[("A;B;C", 1.0), ("A;B", 2.0), ("A;D;B", 4.0), ("A", 8.0)]);
        let out = merge_path_into_caller(&thread, &funcs(&thread, "A;B"), Implementation::Combined);
        assert_eq!(
            sample_paths(&out),
            paths(&[Some("A;C"), Some("A"), Some("A;D;B"), Some("A")])
        );
    }

    #[test]
    fn merge_path_conserves_weight_at_parent() {
        let thread = thread_from_samples(&[("A;B", 3.0), ("A", 5.0), ("A;B;C", 7.0)]);
        let before = self_time_by_path(&thread);
        let out = merge_path_into_caller(&thread, &funcs(&thread, "A;B"), Implementation::Combined);
        let after = self_time_by_path(&out);
        assert_eq!(after["A"], before["A"] + before["A;B"]);
        assert_eq!(after["A;C"], before["A;B;C"]);
    }

    #[test]
    fn merge_path_skips_other_implementation() {
        let thread = thread_from_samples(&[("A:xul;js;B:xul;C:xul", 1.0)]);
        let out = merge_path_into_caller(&thread, &funcs(&thread, "A;B"), Implementation::Cpp);
        assert_eq!(sample_paths(&out), paths(&[Some("A;js;C")]));
    }

    #[test]
    fn merge_path_deeper_than_tree_is_noop() {
        let thread = thread_from_samples(&[("A;B", 1.0)]);
        let out = merge_path_into_caller(&thread, &funcs(&thread, "A;B;C"), Implementation::Combined);
        assert_eq!(sample_paths(&out), sample_paths(&thread));
        assert_eq!(out.stack_table().len(), thread.stack_table().len());
    }

    #[test]
    fn merge_function_removes_every_call() {
        let thread = thread_from_samples(&[("A;B;C", 1.0), ("B;D", 2.0), ("A;B", 4.0), ("B", 8.0)]);
        let b = funcs(&thread, "B")[0];
        let out = merge_function(&thread, b);
        assert_eq!(
            sample_paths(&out),
            paths(&[Some("A;C"), Some("D"), Some("A"), None])
        );
        let before = self_time_by_path(&thread);
        let after = self_time_by_path(&out);
        assert_eq!(after["A"], before["A;B"]);
    }

    #[test]
    fn drop_function_nulls_samples_only() {
        let thread = thread_from_samples(&[("A;B;C", 1.0), ("A;D", 2.0), ("B", 4.0)]);
        let b = funcs(&thread, "B")[0];
        let out = drop_function(&thread, b);
        assert_eq!(sample_paths(&out), paths(&[None, Some("A;D"), None]));
        assert_eq!(out.stack_table(), thread.stack_table());
    }
}

use rustc_hash::FxHashMap;
use tracing::debug_span;

use super::remap_sample_stacks;
use crate::model::{IndexIntoFuncTable, IndexIntoStackTable, StackTable, Thread};

/// Merge stacks that ended up with the same `(prefix, func)` pair into one
/// call node.
///
/// Transforms that re-parent stacks can leave several stacks with the same
/// caller and func. Returns the thread unchanged when there are none.
pub fn post_process_transforms(thread: &Thread) -> Thread {
    let _span = debug_span!("post_process_transforms").entered();
    let stack_table = thread.stack_table();
    let mut new_stack_table = StackTable::with_capacity(stack_table.len());
    let mut old_stack_to_new_stack = Vec::with_capacity(stack_table.len());
    let mut call_nodes: FxHashMap<(Option<IndexIntoStackTable>, IndexIntoFuncTable), IndexIntoStackTable> =
        FxHashMap::default();

    for stack in 0..stack_table.len() {
        let func = stack_table.func[stack];
        let new_prefix = stack_table.prefix[stack].and_then(|p| old_stack_to_new_stack[p]);
        let new_stack = *call_nodes
            .entry((new_prefix, func))
            .or_insert_with(|| new_stack_table.push(new_prefix, func));
        old_stack_to_new_stack.push(Some(new_stack));
    }

    if new_stack_table.len() == stack_table.len() {
        return thread.clone();
    }
    let sample_stacks = remap_sample_stacks(thread, &old_stack_to_new_stack);
    thread.with_stacks(new_stack_table, sample_stacks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{funcs, sample_paths, self_time_by_path, thread_from_samples};
    use crate::transforms::merge_function;

    #[test]
    fn merges_duplicate_call_nodes() {
        // Merging B leaves two `A;C` stacks: the old `A;C` and `A;B;C`.
        let thread = thread_from_samples(&[("A;C", 1.0), ("A;B;C", 2.0), ("A;B", 4.0)]);
        let merged = merge_function(&thread, funcs(&thread, "B")[0]);
        let before = merged.stack_table().len();
        let out = post_process_transforms(&merged);
        assert_eq!(out.stack_table().len(), before - 1);
        assert_eq!(self_time_by_path(&out)["A;C"], 3.0);
        assert_eq!(sample_paths(&out), sample_paths(&merged));
    }

    #[test]
    fn is_idempotent() {
        let thread = thread_from_samples(&[("A;C;D", 1.0), ("A;B;C;D", 2.0), ("A;B;E", 4.0)]);
        let merged = merge_function(&thread, funcs(&thread, "B")[0]);
        let once = post_process_transforms(&merged);
        let twice = post_process_transforms(&once);
        assert_eq!(once.stack_table(), twice.stack_table());
        assert_eq!(twice.id(), once.id());
    }
}

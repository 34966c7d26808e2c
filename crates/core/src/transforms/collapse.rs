use hangscope_protocol::Implementation;
use rustc_hash::FxHashMap;
use tracing::{debug_span, warn};

use super::{func_matches_implementation, remap_sample_stacks};
use crate::model::{FuncTable, IndexIntoFuncTable, IndexIntoLibs, IndexIntoStackTable, StackTable, Thread};

/// Replace each run of frames from library `lib` with a single frame of a
/// synthetic func named after the library.
///
/// Sibling runs under the same (new) prefix share one collapsed stack.
/// Frames that don't match `implementation` and sit directly below a
/// collapsed stack are absorbed into it. The synthetic func is appended to
/// a copy of the func table the first time something collapses and must
/// land at `collapsed_func`. A thread with no frame from `lib`, or whose
/// func table has moved on so the synthetic func would land elsewhere, is
/// returned unchanged.
pub fn collapse_lib(
    thread: &Thread,
    lib: IndexIntoLibs,
    collapsed_func: IndexIntoFuncTable,
    implementation: Implementation,
) -> Thread {
    let _span = debug_span!("collapse_lib", lib).entered();
    let Some(lib_name) = thread.lib_name(lib) else {
        warn!(lib, libs = thread.libs().len(), "collapse-lib refers to an unknown library");
        return thread.clone();
    };
    if thread.func_table().len() != collapsed_func {
        warn!(
            expected = collapsed_func,
            actual = thread.func_table().len(),
            "collapsed func index does not match the func table"
        );
        return thread.clone();
    }
    let stack_table = thread.stack_table();
    let mut new_stack_table = StackTable::with_capacity(stack_table.len());
    let mut old_stack_to_new_stack: Vec<Option<IndexIntoStackTable>> =
        Vec::with_capacity(stack_table.len());
    // Indexed by new stack.
    let mut is_collapsed: Vec<bool> = Vec::with_capacity(stack_table.len());
    let mut collapsed_by_prefix: FxHashMap<Option<IndexIntoStackTable>, IndexIntoStackTable> =
        FxHashMap::default();
    let mut new_func_table: Option<(FuncTable, IndexIntoFuncTable)> = None;

    for stack in 0..stack_table.len() {
        let func = stack_table.func[stack];
        let new_prefix = stack_table.prefix[stack].and_then(|p| old_stack_to_new_stack[p]);
        let prefix_collapsed = new_prefix.is_some_and(|p| is_collapsed[p]);

        if thread.func_lib(func) == Some(lib) {
            if prefix_collapsed {
                // Continues the run its prefix started.
                old_stack_to_new_stack.push(new_prefix);
                continue;
            }
            if let Some(&existing) = collapsed_by_prefix.get(&new_prefix) {
                old_stack_to_new_stack.push(Some(existing));
                continue;
            }
            let (_, synthetic) = new_func_table.get_or_insert_with(|| {
                let mut funcs = thread.func_table().clone();
                let name = thread.string_table().intern(&lib_name);
                let synthetic = funcs.push(name, Some(lib));
                (funcs, synthetic)
            });
            let new_stack = new_stack_table.push(new_prefix, *synthetic);
            is_collapsed.push(true);
            collapsed_by_prefix.insert(new_prefix, new_stack);
            old_stack_to_new_stack.push(Some(new_stack));
        } else if prefix_collapsed && !func_matches_implementation(thread, func, implementation) {
            old_stack_to_new_stack.push(new_prefix);
        } else {
            is_collapsed.push(false);
            old_stack_to_new_stack.push(Some(new_stack_table.push(new_prefix, func)));
        }
    }

    let Some((func_table, _)) = new_func_table else {
        return thread.clone();
    };
    let sample_stacks = remap_sample_stacks(thread, &old_stack_to_new_stack);
    thread.with_funcs_and_stacks(func_table, new_stack_table, sample_stacks)
}

/// Collapse direct recursion of `func` into its outermost call.
///
/// Frames that don't match `implementation` between two recursive calls
/// are collapsed along with them.
pub fn collapse_direct_recursion(
    thread: &Thread,
    func_to_collapse: IndexIntoFuncTable,
    implementation: Implementation,
) -> Thread {
    let _span = debug_span!("collapse_direct_recursion", func = func_to_collapse).entered();
    let stack_table = thread.stack_table();
    let mut new_stack_table = StackTable::with_capacity(stack_table.len());
    let mut old_stack_to_new_stack = Vec::with_capacity(stack_table.len());
    let mut recursive: Vec<bool> = Vec::with_capacity(stack_table.len());

    for stack in 0..stack_table.len() {
        let prefix = stack_table.prefix[stack];
        let func = stack_table.func[stack];
        let new_prefix = prefix.and_then(|p| old_stack_to_new_stack[p]);
        let recursive_prefix = prefix.is_some_and(|p| recursive[p]);

        if recursive_prefix
            && (func == func_to_collapse || !func_matches_implementation(thread, func, implementation))
        {
            old_stack_to_new_stack.push(new_prefix);
            recursive.push(true);
        } else {
            old_stack_to_new_stack.push(Some(new_stack_table.push(new_prefix, func)));
            recursive.push(func == func_to_collapse);
        }
    }

    let sample_stacks = remap_sample_stacks(thread, &old_stack_to_new_stack);
    thread.with_stacks(new_stack_table, sample_stacks)
}

/// Keep the first call of `func` on each path and fold everything below it
/// into that call's self time.
pub fn collapse_function_subtree(thread: &Thread, func_to_collapse: IndexIntoFuncTable) -> Thread {
    let _span = debug_span!("collapse_function_subtree", func = func_to_collapse).entered();
    let stack_table = thread.stack_table();
    let mut new_stack_table = StackTable::with_capacity(stack_table.len());
    let mut old_stack_to_new_stack = Vec::with_capacity(stack_table.len());
    let mut collapsed: Vec<bool> = Vec::with_capacity(stack_table.len());

    for stack in 0..stack_table.len() {
        let prefix = stack_table.prefix[stack];
        let new_prefix = prefix.and_then(|p| old_stack_to_new_stack[p]);
        if prefix.is_some_and(|p| collapsed[p]) {
            old_stack_to_new_stack.push(new_prefix);
            collapsed.push(true);
        } else {
            let func = stack_table.func[stack];
            old_stack_to_new_stack.push(Some(new_stack_table.push(new_prefix, func)));
            collapsed.push(func == func_to_collapse);
        }
    }

    let sample_stacks = remap_sample_stacks(thread, &old_stack_to_new_stack);
    thread.with_stacks(new_stack_table, sample_stacks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{funcs, sample_paths, self_time_by_path, thread_from_samples};

    fn paths(v: &[Option<&str>]) -> Vec<Option<String>> {
        v.iter().map(|p| p.map(str::to_string)).collect()
    }

    #[test]
    fn collapse_lib_merges_sibling_runs() {
        let thread = thread_from_samples(&[
            ("A;B:xul", 1.0),
            ("A;C:xul", 2.0),
            ("A;D:xul", 4.0),
            ("A", 8.0),
        ]);
        let collapsed = thread.func_table().len();
        let out = collapse_lib(&thread, 0, collapsed, Implementation::Combined);
        assert_eq!(out.func_table().len(), collapsed + 1);
        assert_eq!(out.func_name(collapsed), "xul");
        // A plus one synthetic xul stack.
        assert_eq!(out.stack_table().len(), 2);
        let by_path = self_time_by_path(&out);
        assert_eq!(by_path["A;xul"], 7.0);
        assert_eq!(by_path["A"], 8.0);
    }

    #[test]
    fn collapse_lib_keeps_frames_leaving_the_lib() {
        let thread = thread_from_samples(&[("A;B:xul;C:xul;D;E:xul", 1.0), ("A;B:xul;js", 2.0)]);
        let collapsed = thread.func_table().len();
        let out = collapse_lib(&thread, 0, collapsed, Implementation::Combined);
        assert_eq!(sample_paths(&out), paths(&[Some("A;xul;D;xul"), Some("A;xul;js")]));

        // Under "cpp", JS frames below a run are absorbed, so the run
        // continues through them.
        let out = collapse_lib(&thread, 0, collapsed, Implementation::Cpp);
        assert_eq!(sample_paths(&out), paths(&[Some("A;xul"), Some("A;xul")]));
    }

    #[test]
    fn collapse_lib_without_matches_is_unchanged() {
        let thread = thread_from_samples(&[("A;B:xul", 1.0)]);
        let out = collapse_lib(&thread, 5, 9, Implementation::Combined);
        assert_eq!(out.id(), thread.id());

        // The library exists but no stack uses it any more.
        let merged = crate::transforms::merge_function(&thread, funcs(&thread, "B")[0]);
        let out = collapse_lib(&merged, 0, 2, Implementation::Combined);
        assert_eq!(out.id(), merged.id());
        assert_eq!(out.func_table().len(), 2);
    }

    #[test]
    fn collapse_lib_with_a_stale_func_index_is_unchanged() {
        let thread = thread_from_samples(&[("A;B:xul", 1.0)]);
        let len = thread.func_table().len();
        for stale in [len - 1, len + 1] {
            let out = collapse_lib(&thread, 0, stale, Implementation::Combined);
            assert_eq!(out.id(), thread.id());
            assert_eq!(out.func_table().len(), len);
        }
        let out = collapse_lib(&thread, 0, len, Implementation::Combined);
        assert_ne!(out.id(), thread.id());
        assert_eq!(out.func_name(len), "xul");
    }

    #[test]
    fn collapse_direct_recursion_keeps_outermost() {
        let thread = thread_from_samples(&[("A;B;B;B;C", 1.0), ("A;B;C;B", 2.0), ("B;B", 4.0)]);
        let b = funcs(&thread, "B")[0];
        let out = collapse_direct_recursion(&thread, b, Implementation::Combined);
        assert_eq!(
            sample_paths(&out),
            paths(&[Some("A;B;C"), Some("A;B;C;B"), Some("B")])
        );
    }

    #[test]
    fn collapse_direct_recursion_through_other_implementation() {
        let thread = thread_from_samples(&[("A:xul;B:xul;js;B:xul;C:xul", 4.0)]);
        let b = funcs(&thread, "B")[0];
        let out = collapse_direct_recursion(&thread, b, Implementation::Cpp);
        assert_eq!(sample_paths(&out), paths(&[Some("A;B;C")]));
    }

    #[test]
    fn collapse_function_subtree_folds_descendants() {
        let thread = thread_from_samples(&[("A;B;C", 1.0), ("A;B;D;E", 2.0), ("A;B", 4.0), ("A;F", 8.0)]);
        let b = funcs(&thread, "B")[0];
        let out = collapse_function_subtree(&thread, b);
        let by_path = self_time_by_path(&out);
        assert_eq!(by_path["A;B"], 7.0);
        assert_eq!(by_path["A;F"], 8.0);
        assert_eq!(out.stack_table().len(), 3);
    }
}

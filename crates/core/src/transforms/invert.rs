use rustc_hash::FxHashMap;
use tracing::debug_span;

use crate::model::{IndexIntoStackTable, StackTable, Thread};

/// Reverse every sample's stack so that its leaf becomes the root.
///
/// Reversed stacks are built on demand, only for stacks that samples use,
/// and deduplicated on `(prefix, func)`.
pub fn invert_callstack(thread: &Thread) -> Thread {
    let _span = debug_span!("invert_callstack").entered();
    let stack_table = thread.stack_table();
    let func_count = thread.func_table().len() as i64;
    let mut new_stack_table = StackTable::with_capacity(stack_table.len());
    // Keyed by `prefix * func_count + func`, with -1 as the root prefix.
    let mut key_to_new_stack: FxHashMap<i64, IndexIntoStackTable> = FxHashMap::default();
    let mut converted: Vec<Option<IndexIntoStackTable>> = vec![None; stack_table.len()];

    let mut convert = |leaf: IndexIntoStackTable, new_stack_table: &mut StackTable| {
        let mut new_prefix: Option<IndexIntoStackTable> = None;
        let mut current = Some(leaf);
        while let Some(stack) = current {
            let func = stack_table.func[stack];
            let key = new_prefix.map_or(-1, |p| p as i64) * func_count + func as i64;
            let new_stack = *key_to_new_stack
                .entry(key)
                .or_insert_with(|| new_stack_table.push(new_prefix, func));
            new_prefix = Some(new_stack);
            current = stack_table.prefix[stack];
        }
        new_prefix
    };

    let sample_stacks = thread
        .samples()
        .stack
        .iter()
        .map(|&stack| {
            let stack = stack?;
            if converted[stack].is_none() {
                converted[stack] = convert(stack, &mut new_stack_table);
            }
            converted[stack]
        })
        .collect();
    thread.with_stacks(new_stack_table, sample_stacks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_prefix_order, sample_paths, self_time_by_path, thread_from_samples};

    #[test]
    fn reverses_every_sample() {
        let thread = thread_from_samples(&[("A;B;C", 1.0), ("A;D;C", 2.0), ("A", 4.0), ("", 8.0)]);
        let out = invert_callstack(&thread);
        assert_prefix_order(&out);
        assert_eq!(
            sample_paths(&out),
            vec![
                Some("C;B;A".to_string()),
                Some("C;D;A".to_string()),
                Some("A".to_string()),
                None
            ]
        );
    }

    #[test]
    fn shares_reversed_prefixes() {
        let thread = thread_from_samples(&[("A;B;C", 1.0), ("D;B;C", 2.0), ("X;C", 4.0)]);
        let out = invert_callstack(&thread);
        // C, C;B, C;B;A, C;B;D, C;X
        assert_eq!(out.stack_table().len(), 5);
        assert_eq!(out.stack_table().prefix.iter().filter(|p| p.is_none()).count(), 1);
        assert_eq!(self_time_by_path(&out)["C;X"], 4.0);
    }

    #[test]
    fn inverting_twice_restores_paths() {
        let thread = thread_from_samples(&[("A;B;C", 1.0), ("A;B", 2.0), ("E;F", 4.0)]);
        let out = invert_callstack(&invert_callstack(&thread));
        assert_eq!(sample_paths(&out), sample_paths(&thread));
    }
}

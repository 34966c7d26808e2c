use std::sync::Arc;

use hangscope_protocol::{FuncPath, SharedStr};
use serde::Deserialize;
use thiserror::Error;

pub type IndexIntoStackTable = usize;
pub type IndexIntoFuncTable = usize;
pub type IndexIntoStringTable = usize;
pub type IndexIntoLibs = usize;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stack {stack} has prefix {prefix}, which does not precede it")]
pub struct StackOrderError {
    pub stack: IndexIntoStackTable,
    pub prefix: IndexIntoStackTable,
}

/// The unique call stacks of a thread, stored column-wise.
///
/// Stack `i` is the call stack `prefix[i]` extended by `func[i]`; a `None`
/// prefix marks a root. Every prefix precedes the stack that refers to it,
/// so one forward pass always sees a stack's ancestors before the stack,
/// and one backward pass sees all descendants first. Transforms never edit
/// a table in place, they build a new one with [`StackTable::push`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackTable {
    pub prefix: Vec<Option<IndexIntoStackTable>>,
    pub func: Vec<IndexIntoFuncTable>,
    pub depth: Vec<u32>,
}

impl StackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            prefix: Vec::with_capacity(capacity),
            func: Vec::with_capacity(capacity),
            depth: Vec::with_capacity(capacity),
        }
    }

    /// Validate the prefix order of raw columns and derive the depth column.
    pub fn from_columns(
        prefix: Vec<Option<IndexIntoStackTable>>,
        func: Vec<IndexIntoFuncTable>,
    ) -> Result<Self, StackOrderError> {
        let mut depth = Vec::with_capacity(prefix.len());
        for (stack, p) in prefix.iter().enumerate() {
            match *p {
                None => depth.push(0),
                Some(p) if p < stack => depth.push(depth[p] + 1),
                Some(p) => return Err(StackOrderError { stack, prefix: p }),
            }
        }
        Ok(Self {
            prefix,
            func,
            depth,
        })
    }

    pub fn len(&self) -> usize {
        self.func.len()
    }

    pub fn is_empty(&self) -> bool {
        self.func.is_empty()
    }

    /// Append a stack and return its index.
    pub fn push(
        &mut self,
        prefix: Option<IndexIntoStackTable>,
        func: IndexIntoFuncTable,
    ) -> IndexIntoStackTable {
        let index = self.func.len();
        debug_assert!(
            prefix.is_none_or(|p| p < index),
            "prefix {prefix:?} must precede stack {index}"
        );
        let depth = prefix.map_or(0, |p| self.depth[p] + 1);
        self.prefix.push(prefix);
        self.func.push(func);
        self.depth.push(depth);
        index
    }

    /// Root-to-leaf funcs of a stack.
    pub fn func_path(&self, stack: IndexIntoStackTable) -> FuncPath {
        let mut path = Vec::with_capacity(self.depth.get(stack).map_or(0, |&d| d as usize + 1));
        let mut current = Some(stack);
        while let Some(s) = current {
            path.push(self.func[s]);
            current = self.prefix[s];
        }
        path.reverse();
        path
    }

    /// Find the first stack whose root-to-leaf funcs equal `func_path`.
    /// `None` means the path is not representable in this table.
    pub fn stack_from_func_path(&self, func_path: &[IndexIntoFuncTable]) -> Option<IndexIntoStackTable> {
        let mut matched: Option<IndexIntoStackTable> = None;
        let mut depth = 0;
        for stack in 0..self.len() {
            if depth == func_path.len() {
                break;
            }
            if self.prefix[stack] == matched && self.func[stack] == func_path[depth] {
                matched = Some(stack);
                depth += 1;
            }
        }
        if depth == func_path.len() { matched } else { None }
    }

    /// Check the prefix ordering in debug builds.
    pub fn debug_assert_sorted(&self) {
        debug_assert_eq!(self.prefix.len(), self.func.len());
        debug_assert_eq!(self.depth.len(), self.func.len());
        if cfg!(debug_assertions) {
            for (stack, prefix) in self.prefix.iter().enumerate() {
                debug_assert!(
                    prefix.is_none_or(|p| p < stack),
                    "stack {stack} has out-of-order prefix {prefix:?}"
                );
            }
        }
    }
}

/// Functions referenced by stacks: a name and the native library, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuncTable {
    pub name: Vec<IndexIntoStringTable>,
    pub lib: Vec<Option<IndexIntoLibs>>,
}

impl FuncTable {
    pub fn len(&self) -> usize {
        self.name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    pub fn push(&mut self, name: IndexIntoStringTable, lib: Option<IndexIntoLibs>) -> IndexIntoFuncTable {
        self.name.push(name);
        self.lib.push(lib);
        self.name.len() - 1
    }
}

/// A native library that functions can belong to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lib {
    pub name: SharedStr,
    #[serde(default)]
    pub debug_name: Option<SharedStr>,
    #[serde(default)]
    pub breakpad_id: Option<SharedStr>,
}

impl Lib {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.into(),
            debug_name: None,
            breakpad_id: None,
        }
    }
}

/// Per-sample columns. Each column is shared independently, so a filter that
/// rewrites `stack` keeps pointing at the same weight columns.
///
/// Samples are never removed: filters and transforms set `stack` to `None`
/// so every column, and every [`DateTable`], stays aligned by index.
#[derive(Debug, Clone)]
pub struct SampleTable {
    pub stack: Arc<[Option<IndexIntoStackTable>]>,
    pub sample_hang_ms: Arc<[f32]>,
    pub sample_hang_count: Arc<[f32]>,
    pub runnable: Arc<[Option<IndexIntoStringTable>]>,
    pub platform: Arc<[Option<IndexIntoStringTable>]>,
    pub user_interacting: Arc<[bool]>,
}

impl SampleTable {
    /// Samples with weights only; the descriptive columns are left empty.
    pub fn new(
        stack: Vec<Option<IndexIntoStackTable>>,
        sample_hang_ms: Vec<f32>,
        sample_hang_count: Vec<f32>,
    ) -> Self {
        let len = stack.len();
        Self {
            stack: stack.into(),
            sample_hang_ms: sample_hang_ms.into(),
            sample_hang_count: sample_hang_count.into(),
            runnable: vec![None; len].into(),
            platform: vec![None; len].into(),
            user_interacting: vec![false; len].into(),
        }
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn with_stack(&self, stack: Vec<Option<IndexIntoStackTable>>) -> Self {
        debug_assert_eq!(stack.len(), self.len());
        Self {
            stack: stack.into(),
            ..self.clone()
        }
    }

    pub fn with_weights(&self, sample_hang_ms: Vec<f32>, sample_hang_count: Vec<f32>) -> Self {
        debug_assert_eq!(sample_hang_ms.len(), self.len());
        debug_assert_eq!(sample_hang_count.len(), self.len());
        Self {
            sample_hang_ms: sample_hang_ms.into(),
            sample_hang_count: sample_hang_count.into(),
            ..self.clone()
        }
    }
}

/// Hang weights of every sample for a single date.
#[derive(Debug, Clone, PartialEq)]
pub struct DateTable {
    pub date: SharedStr,
    pub sample_hang_ms: Arc<[f32]>,
    pub sample_hang_count: Arc<[f32]>,
}

impl DateTable {
    pub fn zeroed(date: SharedStr, sample_count: usize) -> Self {
        Self {
            date,
            sample_hang_ms: vec![0.0; sample_count].into(),
            sample_hang_count: vec![0.0; sample_count].into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stacks() -> StackTable {
        // 0: A, 1: A>B, 2: A>B>C, 3: A>D, 4: E
        StackTable::from_columns(
            vec![None, Some(0), Some(1), Some(0), None],
            vec![0, 1, 2, 3, 4],
        )
        .unwrap_or_default()
    }

    #[test]
    fn depth_is_derived() {
        assert_eq!(sample_stacks().depth, vec![0, 1, 2, 1, 0]);
    }

    #[test]
    fn rejects_forward_prefix() {
        let err = StackTable::from_columns(vec![Some(1), None], vec![0, 1]);
        assert_eq!(err, Err(StackOrderError { stack: 0, prefix: 1 }));
    }

    #[test]
    fn func_path_walks_to_root() {
        let stacks = sample_stacks();
        assert_eq!(stacks.func_path(2), vec![0, 1, 2]);
        assert_eq!(stacks.func_path(4), vec![4]);
    }

    #[test]
    fn stack_from_func_path() {
        let stacks = sample_stacks();
        assert_eq!(stacks.stack_from_func_path(&[0, 1, 2]), Some(2));
        assert_eq!(stacks.stack_from_func_path(&[0, 3]), Some(3));
        assert_eq!(stacks.stack_from_func_path(&[0, 2]), None);
        assert_eq!(stacks.stack_from_func_path(&[]), None);
    }

    #[test]
    fn push_tracks_depth() {
        let mut stacks = StackTable::new();
        let a = stacks.push(None, 0);
        let b = stacks.push(Some(a), 1);
        assert_eq!(stacks.depth[b], 1);
        stacks.debug_assert_sorted();
    }

    #[test]
    fn replacing_stack_column_shares_weights() {
        let samples = SampleTable::new(vec![Some(0), Some(1)], vec![1.0, 2.0], vec![1.0, 1.0]);
        let filtered = samples.with_stack(vec![None, Some(1)]);
        assert!(Arc::ptr_eq(&samples.sample_hang_ms, &filtered.sample_hang_ms));
        assert_eq!(filtered.len(), 2);
    }
}

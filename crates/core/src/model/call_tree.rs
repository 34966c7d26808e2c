use std::cell::OnceCell;

use hangscope_protocol::{FuncPath, SharedStr};
use serde::Serialize;
use tracing::debug_span;

use super::tables::{IndexIntoFuncTable, IndexIntoStackTable};
use super::thread::Thread;
use crate::one_to_many::{OneToManyIndex, sample_index_for_stacks};

/// Self time and self count per stack, summed over the samples that resolve
/// to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FuncStackTimes {
    pub self_time: Vec<f32>,
    pub self_count: Vec<f32>,
}

pub fn compute_func_stack_times(thread: &Thread) -> FuncStackTimes {
    let stack_count = thread.stack_table().len();
    let samples = thread.samples();
    let mut self_time = vec![0.0; stack_count];
    let mut self_count = vec![0.0; stack_count];
    for (i, stack) in samples.stack.iter().enumerate() {
        if let Some(stack) = *stack {
            self_time[stack] += samples.sample_hang_ms[i];
            self_count[stack] += samples.sample_hang_count[i];
        }
    }
    FuncStackTimes {
        self_time,
        self_count,
    }
}

/// Display data of one call node. Times are raw milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallNode {
    pub stack: IndexIntoStackTable,
    pub func: IndexIntoFuncTable,
    pub name: SharedStr,
    pub lib: Option<SharedStr>,
    pub depth: u32,
    pub self_time: f32,
    pub total_time: f32,
    pub total_time_ratio: f32,
    pub self_count: f32,
    pub total_count: f32,
}

/// Aggregated call tree over a thread's stack table.
///
/// Stack indices are the node ids and `prefix` is the parent pointer.
/// Totals are computed up front; child lists and node views are built on
/// first access. Nodes with zero total time are left out of every child
/// list.
#[derive(Debug)]
pub struct CallTree {
    thread: Thread,
    times: FuncStackTimes,
    total_time: Vec<f32>,
    total_count: Vec<f32>,
    child_count: Vec<u32>,
    root_total_time: f32,
    root_count: u32,
    roots: OnceCell<Vec<IndexIntoStackTable>>,
    children: Vec<OnceCell<Vec<IndexIntoStackTable>>>,
    nodes: Vec<OnceCell<CallNode>>,
    samples_by_stack: OnceCell<OneToManyIndex>,
}

impl CallTree {
    pub fn new(thread: &Thread, times: FuncStackTimes) -> Self {
        let _span = debug_span!("call_tree", stacks = thread.stack_table().len()).entered();
        let stack_table = thread.stack_table();
        let len = stack_table.len();
        let mut total_time = times.self_time.clone();
        let mut total_count = times.self_count.clone();
        let mut child_count = vec![0u32; len];
        let mut root_total_time = 0.0;
        let mut root_count = 0;

        for stack in (0..len).rev() {
            if total_time[stack] == 0.0 {
                continue;
            }
            match stack_table.prefix[stack] {
                Some(prefix) => {
                    total_time[prefix] += total_time[stack];
                    total_count[prefix] += total_count[stack];
                    child_count[prefix] += 1;
                }
                None => {
                    root_total_time += total_time[stack];
                    root_count += 1;
                }
            }
        }

        Self {
            thread: thread.clone(),
            times,
            total_time,
            total_count,
            child_count,
            root_total_time,
            root_count,
            roots: OnceCell::new(),
            children: (0..len).map(|_| OnceCell::new()).collect(),
            nodes: (0..len).map(|_| OnceCell::new()).collect(),
            samples_by_stack: OnceCell::new(),
        }
    }

    /// Build the tree straight from the thread's samples.
    pub fn from_thread(thread: &Thread) -> Self {
        Self::new(thread, compute_func_stack_times(thread))
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    pub fn root_total_time(&self) -> f32 {
        self.root_total_time
    }

    pub fn root_count(&self) -> u32 {
        self.root_count
    }

    pub fn total_time(&self, stack: IndexIntoStackTable) -> f32 {
        self.total_time.get(stack).copied().unwrap_or(0.0)
    }

    pub fn roots(&self) -> &[IndexIntoStackTable] {
        self.roots
            .get_or_init(|| self.collect_children(None, 0, self.root_count))
            .as_slice()
    }

    /// Direct children of `stack`, heaviest first. Ties keep stack order.
    pub fn children(&self, stack: IndexIntoStackTable) -> &[IndexIntoStackTable] {
        match self.children.get(stack) {
            Some(cell) => cell.get_or_init(|| {
                self.collect_children(Some(stack), stack + 1, self.child_count[stack])
            }).as_slice(),
            None => &[],
        }
    }

    fn collect_children(
        &self,
        parent: Option<IndexIntoStackTable>,
        start: usize,
        expected: u32,
    ) -> Vec<IndexIntoStackTable> {
        let prefix = &self.thread.stack_table().prefix;
        let mut children = Vec::with_capacity(expected as usize);
        for stack in start..prefix.len() {
            if children.len() == expected as usize {
                break;
            }
            if prefix[stack] == parent && self.total_time[stack] != 0.0 {
                children.push(stack);
            }
        }
        children.sort_by(|&a, &b| self.total_time[b].total_cmp(&self.total_time[a]));
        children
    }

    pub fn has_children(&self, stack: IndexIntoStackTable) -> bool {
        self.child_count.get(stack).is_some_and(|&c| c > 0)
    }

    pub fn node(&self, stack: IndexIntoStackTable) -> Option<&CallNode> {
        let cell = self.nodes.get(stack)?;
        Some(cell.get_or_init(|| {
            let thread = &self.thread;
            let func = thread.stack_table().func[stack];
            let total_time = self.total_time[stack];
            CallNode {
                stack,
                func,
                name: thread.func_name(func),
                lib: thread.func_lib(func).and_then(|lib| thread.lib_name(lib)),
                depth: thread.stack_table().depth[stack],
                self_time: self.times.self_time[stack],
                total_time,
                total_time_ratio: if self.root_total_time == 0.0 {
                    0.0
                } else {
                    total_time / self.root_total_time
                },
                self_count: self.times.self_count[stack],
                total_count: self.total_count[stack],
            }
        }))
    }

    pub fn parent(&self, stack: IndexIntoStackTable) -> Option<IndexIntoStackTable> {
        self.thread.stack_table().prefix.get(stack).copied().flatten()
    }

    pub fn func_path(&self, stack: IndexIntoStackTable) -> FuncPath {
        self.thread.stack_table().func_path(stack)
    }

    /// The root with the largest total time, used when nothing is selected.
    pub fn heaviest_root(&self) -> Option<IndexIntoStackTable> {
        self.roots().first().copied()
    }

    /// Follow the heaviest child from `stack` down to a leaf, `stack`
    /// included.
    pub fn heaviest_path_under(&self, stack: IndexIntoStackTable) -> Vec<IndexIntoStackTable> {
        let mut path = vec![stack];
        let mut current = stack;
        while let Some(&child) = self.children(current).first() {
            path.push(child);
            current = child;
        }
        path
    }

    /// Every visible node below `stack`, in depth-first order.
    pub fn all_descendants(&self, stack: IndexIntoStackTable) -> Vec<IndexIntoStackTable> {
        let mut out = Vec::new();
        let mut pending: Vec<IndexIntoStackTable> = self.children(stack).iter().rev().copied().collect();
        while let Some(next) = pending.pop() {
            out.push(next);
            pending.extend(self.children(next).iter().rev());
        }
        out
    }

    /// Samples that land on `stack` or on one of its visible descendants,
    /// grouped by node in depth-first order.
    pub fn sample_indices(&self, stack: IndexIntoStackTable) -> Vec<usize> {
        if stack >= self.total_time.len() {
            return Vec::new();
        }
        let index = self
            .samples_by_stack
            .get_or_init(|| sample_index_for_stacks(&self.thread));
        let mut stacks = vec![stack];
        stacks.extend(self.all_descendants(stack));
        index.row_indices(&stacks)
    }
}

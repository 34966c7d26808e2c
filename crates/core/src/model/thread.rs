use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hangscope_protocol::SharedStr;

use super::string_table::StringTable;
use super::tables::{
    DateTable, FuncTable, IndexIntoFuncTable, IndexIntoLibs, IndexIntoStackTable, Lib,
    SampleTable, StackTable,
};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Generation id of a [`Thread`] value.
///
/// Every operation that derives a new thread assigns a fresh id, so the id
/// identifies the content and can key memoization caches. Cloning a thread
/// keeps its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl ThreadId {
    fn next() -> Self {
        ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Everything needed to assemble a [`Thread`].
#[derive(Debug, Clone)]
pub struct ThreadParts {
    pub name: SharedStr,
    pub process_type: SharedStr,
    pub stack_table: StackTable,
    pub func_table: FuncTable,
    pub samples: SampleTable,
    pub dates: Vec<DateTable>,
    pub string_table: Arc<StringTable>,
    pub libs: Arc<[Lib]>,
}

/// One thread of a hang profile, treated as an immutable value.
///
/// Derived threads share every unchanged table with their source.
#[derive(Debug, Clone)]
pub struct Thread {
    id: ThreadId,
    name: SharedStr,
    process_type: SharedStr,
    stack_table: Arc<StackTable>,
    func_table: Arc<FuncTable>,
    samples: SampleTable,
    dates: Arc<[DateTable]>,
    string_table: Arc<StringTable>,
    libs: Arc<[Lib]>,
}

impl From<ThreadParts> for Thread {
    fn from(parts: ThreadParts) -> Self {
        parts.stack_table.debug_assert_sorted();
        Self {
            id: ThreadId::next(),
            name: parts.name,
            process_type: parts.process_type,
            stack_table: Arc::new(parts.stack_table),
            func_table: Arc::new(parts.func_table),
            samples: parts.samples,
            dates: parts.dates.into(),
            string_table: parts.string_table,
            libs: parts.libs,
        }
    }
}

impl Thread {
    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &SharedStr {
        &self.name
    }

    pub fn process_type(&self) -> &SharedStr {
        &self.process_type
    }

    pub fn stack_table(&self) -> &StackTable {
        &self.stack_table
    }

    pub fn func_table(&self) -> &FuncTable {
        &self.func_table
    }

    pub fn samples(&self) -> &SampleTable {
        &self.samples
    }

    pub fn dates(&self) -> &[DateTable] {
        &self.dates
    }

    pub fn string_table(&self) -> &Arc<StringTable> {
        &self.string_table
    }

    pub fn libs(&self) -> &[Lib] {
        &self.libs
    }

    pub fn func_name(&self, func: IndexIntoFuncTable) -> SharedStr {
        self.func_table
            .name
            .get(func)
            .map(|&name| self.string_table.get_string(name))
            .unwrap_or_default()
    }

    pub fn func_lib(&self, func: IndexIntoFuncTable) -> Option<IndexIntoLibs> {
        self.func_table.lib.get(func).copied().flatten()
    }

    pub fn lib_name(&self, lib: IndexIntoLibs) -> Option<SharedStr> {
        self.libs.get(lib).map(|l| l.name.clone())
    }

    /// A thread with a new stack table and sample stacks, sharing everything
    /// else.
    pub fn with_stacks(
        &self,
        stack_table: StackTable,
        sample_stacks: Vec<Option<IndexIntoStackTable>>,
    ) -> Self {
        stack_table.debug_assert_sorted();
        Self {
            id: ThreadId::next(),
            stack_table: Arc::new(stack_table),
            samples: self.samples.with_stack(sample_stacks),
            ..self.clone()
        }
    }

    /// Like [`Thread::with_stacks`], also replacing the func table.
    pub fn with_funcs_and_stacks(
        &self,
        func_table: FuncTable,
        stack_table: StackTable,
        sample_stacks: Vec<Option<IndexIntoStackTable>>,
    ) -> Self {
        Self {
            func_table: Arc::new(func_table),
            ..self.with_stacks(stack_table, sample_stacks)
        }
    }

    /// A thread whose samples point at other stacks of the same table.
    pub fn with_sample_stacks(&self, sample_stacks: Vec<Option<IndexIntoStackTable>>) -> Self {
        Self {
            id: ThreadId::next(),
            samples: self.samples.with_stack(sample_stacks),
            ..self.clone()
        }
    }

    pub fn with_sample_weights(&self, sample_hang_ms: Vec<f32>, sample_hang_count: Vec<f32>) -> Self {
        Self {
            id: ThreadId::next(),
            samples: self.samples.with_weights(sample_hang_ms, sample_hang_count),
            ..self.clone()
        }
    }
}

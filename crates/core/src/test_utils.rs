//! Builders for small threads described as `;`-separated call paths.
//!
//! A frame written `name:lib` belongs to native library `lib`; a bare name
//! has no library and counts as JS. `::` is part of a name.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::model::{
    DateTable, FuncTable, IndexIntoFuncTable, IndexIntoStackTable, Lib, SampleTable, StackTable,
    StringTable, Thread, ThreadParts,
};

fn split_frame(frame: &str) -> (&str, Option<&str>) {
    match frame.rsplit_once(':') {
        Some((name, lib)) if !name.ends_with(':') && !lib.is_empty() => (name, Some(lib)),
        _ => (frame, None),
    }
}

pub(crate) const TEST_DATE: &str = "2017-09-01";

#[derive(Default)]
struct Builder {
    strings: Vec<String>,
    libs: Vec<String>,
    func_table: FuncTable,
    funcs: FxHashMap<String, IndexIntoFuncTable>,
    stack_table: StackTable,
    stacks: FxHashMap<(Option<IndexIntoStackTable>, IndexIntoFuncTable), IndexIntoStackTable>,
}

impl Builder {
    fn string(&mut self, s: &str) -> usize {
        match self.strings.iter().position(|x| x == s) {
            Some(i) => i,
            None => {
                self.strings.push(s.to_string());
                self.strings.len() - 1
            }
        }
    }

    fn func(&mut self, frame: &str) -> IndexIntoFuncTable {
        if let Some(&f) = self.funcs.get(frame) {
            return f;
        }
        let (name, lib) = split_frame(frame);
        let lib = lib.map(|lib| match self.libs.iter().position(|l| l == lib) {
            Some(i) => i,
            None => {
                self.libs.push(lib.to_string());
                self.libs.len() - 1
            }
        });
        let name = self.string(name);
        let f = self.func_table.push(name, lib);
        self.funcs.insert(frame.to_string(), f);
        f
    }

    fn stack(&mut self, path: &str) -> Option<IndexIntoStackTable> {
        let mut prefix = None;
        for frame in path.split(';').filter(|f| !f.is_empty()) {
            let func = self.func(frame);
            let stack = match self.stacks.get(&(prefix, func)) {
                Some(&s) => s,
                None => {
                    let s = self.stack_table.push(prefix, func);
                    self.stacks.insert((prefix, func), s);
                    s
                }
            };
            prefix = Some(stack);
        }
        prefix
    }

    fn finish(self, samples: SampleTable, dates: Vec<DateTable>) -> Thread {
        Thread::from(ThreadParts {
            name: "Gecko".into(),
            process_type: "default".into(),
            stack_table: self.stack_table,
            func_table: self.func_table,
            samples,
            dates,
            string_table: Arc::new(StringTable::from_strings(self.strings)),
            libs: self.libs.iter().map(|l| Lib::named(l)).collect(),
        })
    }
}

/// One sample per entry, weighted by hang ms, each with a hang count of 1.
/// The weights also form the thread's single date table.
pub(crate) fn thread_from_samples(samples: &[(&str, f32)]) -> Thread {
    let mut b = Builder::default();
    let stacks: Vec<_> = samples.iter().map(|(path, _)| b.stack(path)).collect();
    let ms: Vec<f32> = samples.iter().map(|&(_, ms)| ms).collect();
    let count = vec![1.0; samples.len()];
    let date = DateTable {
        date: TEST_DATE.into(),
        sample_hang_ms: ms.clone().into(),
        sample_hang_count: count.clone().into(),
    };
    b.finish(SampleTable::new(stacks, ms, count), vec![date])
}

/// One sample per path with explicit per-date hang ms; counts are 1 where
/// the weight is non-zero. The aggregate weights are the plain mean.
pub(crate) fn thread_with_dates(paths: &[&str], dates: &[(&str, &[f32])]) -> Thread {
    let mut b = Builder::default();
    let stacks: Vec<_> = paths.iter().map(|path| b.stack(path)).collect();
    let n = dates.len().max(1) as f32;
    let mut ms = vec![0.0; paths.len()];
    let mut count = vec![0.0; paths.len()];
    let tables = dates
        .iter()
        .map(|(date, weights)| {
            let counts: Vec<f32> = weights.iter().map(|&w| if w > 0.0 { 1.0 } else { 0.0 }).collect();
            for i in 0..paths.len() {
                ms[i] += weights[i] / n;
                count[i] += counts[i] / n;
            }
            DateTable {
                date: (*date).into(),
                sample_hang_ms: weights.to_vec().into(),
                sample_hang_count: counts.into(),
            }
        })
        .collect();
    b.finish(SampleTable::new(stacks, ms, count), tables)
}

/// The same thread with other sample columns.
pub(crate) fn with_samples(thread: &Thread, samples: SampleTable) -> Thread {
    Thread::from(ThreadParts {
        name: thread.name().clone(),
        process_type: thread.process_type().clone(),
        stack_table: thread.stack_table().clone(),
        func_table: thread.func_table().clone(),
        samples,
        dates: thread.dates().to_vec(),
        string_table: thread.string_table().clone(),
        libs: thread.libs().into(),
    })
}

/// Func index by name (or `name:lib`).
pub(crate) fn func(thread: &Thread, name: &str) -> IndexIntoFuncTable {
    let (name, _) = split_frame(name);
    (0..thread.func_table().len())
        .find(|&f| thread.func_name(f) == name)
        .unwrap_or(usize::MAX)
}

/// Func indices for a `;`-separated path of names.
pub(crate) fn funcs(thread: &Thread, path: &str) -> Vec<IndexIntoFuncTable> {
    path.split(';').map(|name| func(thread, name)).collect()
}

pub(crate) fn path_string(thread: &Thread, stack: IndexIntoStackTable) -> String {
    thread
        .stack_table()
        .func_path(stack)
        .iter()
        .map(|&f| thread.func_name(f).to_string())
        .collect::<Vec<_>>()
        .join(";")
}

/// Each sample's stack as a `;`-separated path.
pub(crate) fn sample_paths(thread: &Thread) -> Vec<Option<String>> {
    thread
        .samples()
        .stack
        .iter()
        .map(|s| s.map(|s| path_string(thread, s)))
        .collect()
}

/// Hang ms per distinct sample path; samples without a stack are skipped.
pub(crate) fn self_time_by_path(thread: &Thread) -> BTreeMap<String, f32> {
    let mut out = BTreeMap::new();
    for (path, &ms) in sample_paths(thread)
        .into_iter()
        .zip(thread.samples().sample_hang_ms.iter())
    {
        if let Some(path) = path {
            *out.entry(path).or_insert(0.0) += ms;
        }
    }
    out
}

pub(crate) fn assert_prefix_order(thread: &Thread) {
    let stacks = thread.stack_table();
    for (i, prefix) in stacks.prefix.iter().enumerate() {
        assert!(prefix.is_none_or(|p| p < i), "stack {i} has prefix {prefix:?}");
    }
    for stack in thread.samples().stack.iter().flatten() {
        assert!(*stack < stacks.len(), "sample points past the table");
    }
}

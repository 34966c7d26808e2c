//! Sample filters.
//!
//! Filters never touch the stack table. They either null the stack of the
//! samples that fail a predicate or, for date ranges, re-weight samples.

use serde::{Deserialize, Serialize};
use tracing::debug_span;

use crate::categories::SampleCategorizer;
use crate::model::{IndexIntoStackTable, IndexIntoStringTable, Thread};

/// Half-open range of date indices into the profile's date axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: usize,
    pub end: usize,
}

impl DateRange {
    pub fn contains(&self, date: usize) -> bool {
        self.start <= date && date < self.end
    }
}

fn keep_samples_where(thread: &Thread, mut keep: impl FnMut(usize, IndexIntoStackTable) -> bool) -> Thread {
    let sample_stacks = thread
        .samples()
        .stack
        .iter()
        .enumerate()
        .map(|(i, &stack)| stack.filter(|&s| keep(i, s)))
        .collect();
    thread.with_sample_stacks(sample_stacks)
}

/// Keep samples whose stack mentions every comma-separated term of
/// `search`, case-insensitively, in a func name or library name of any of
/// its frames. A search without terms keeps everything.
pub fn filter_to_search_string(thread: &Thread, search: &str) -> Thread {
    let terms: Vec<String> = search
        .split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        return thread.clone();
    }
    let _span = debug_span!("filter_to_search_string", terms = terms.len()).entered();

    let func_text: Vec<(String, String)> = (0..thread.func_table().len())
        .map(|func| {
            let lib = thread
                .func_lib(func)
                .and_then(|lib| thread.lib_name(lib))
                .map(|name| name.to_lowercase())
                .unwrap_or_default();
            (thread.func_name(func).to_lowercase(), lib)
        })
        .collect();

    // Per stack, which terms it or one of its callers matches.
    let stack_table = thread.stack_table();
    let mut matched: Vec<Vec<bool>> = Vec::with_capacity(stack_table.len());
    for stack in 0..stack_table.len() {
        let (name, lib) = &func_text[stack_table.func[stack]];
        let row = terms
            .iter()
            .enumerate()
            .map(|(t, term)| {
                stack_table.prefix[stack].is_some_and(|p| matched[p][t])
                    || name.contains(term.as_str())
                    || lib.contains(term.as_str())
            })
            .collect();
        matched.push(row);
    }
    keep_samples_where(thread, |_, stack| matched[stack].iter().all(|&m| m))
}

/// Keep samples in the listed categories. A leading `-` inverts the list:
/// samples in any other known category are kept.
pub fn filter_to_category(thread: &Thread, categorizer: &SampleCategorizer, categories: &str) -> Thread {
    let (negate, list) = match categories.trim().strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, categories.trim()),
    };
    let listed: Vec<&str> = list.split(',').map(str::trim).filter(|c| !c.is_empty()).collect();
    if listed.is_empty() && !negate {
        return thread.clone();
    }
    let _span = debug_span!("filter_to_category", categories).entered();
    let allowed: Vec<String> = if negate {
        categorizer
            .all_categories()
            .iter()
            .filter(|c| !listed.contains(&c.as_str()))
            .map(ToString::to_string)
            .collect()
    } else {
        listed.iter().map(ToString::to_string).collect()
    };
    keep_samples_where(thread, |_, stack| {
        let category = categorizer.category_of(stack);
        allowed.iter().any(|a| a.as_str() == &*category)
    })
}

fn filter_to_string_column(
    thread: &Thread,
    column: &[Option<IndexIntoStringTable>],
    wanted: &str,
) -> Thread {
    let wanted = thread.string_table().index_of(wanted);
    keep_samples_where(thread, |i, _| wanted.is_some() && column[i] == wanted)
}

/// Keep samples reported from `platform`. An empty platform keeps
/// everything.
pub fn filter_to_platform(thread: &Thread, platform: &str) -> Thread {
    if platform.is_empty() {
        return thread.clone();
    }
    let _span = debug_span!("filter_to_platform", platform).entered();
    filter_to_string_column(thread, &thread.samples().platform, platform)
}

/// Keep samples whose hang happened while running `runnable`.
pub fn filter_to_runnable(thread: &Thread, runnable: &str) -> Thread {
    if runnable.is_empty() {
        return thread.clone();
    }
    let _span = debug_span!("filter_to_runnable", runnable).entered();
    filter_to_string_column(thread, &thread.samples().runnable, runnable)
}

pub fn filter_to_user_interacting(thread: &Thread) -> Thread {
    let _span = debug_span!("filter_to_user_interacting").entered();
    let user_interacting = &thread.samples().user_interacting;
    keep_samples_where(thread, |i, _| user_interacting[i])
}

/// Re-weight every sample as the usage-hours weighted average of its date
/// tables inside `range`. Dates without usage hours count equally when no
/// date in the range has any.
pub fn filter_to_date_range(thread: &Thread, range: DateRange, usage_hours_by_date: &[f64]) -> Thread {
    let _span = debug_span!("filter_to_date_range", start = range.start, end = range.end).entered();
    let dates = thread.dates();
    let in_range: Vec<usize> = (0..dates.len()).filter(|&d| range.contains(d)).collect();
    let hours = |d: usize| usage_hours_by_date.get(d).copied().unwrap_or(0.0);
    let total: f64 = in_range.iter().map(|&d| hours(d)).sum();
    let weight = |d: usize| {
        if total > 0.0 {
            hours(d) / total
        } else {
            1.0 / in_range.len() as f64
        }
    };

    let sample_count = thread.samples().len();
    let mut ms = vec![0.0f64; sample_count];
    let mut count = vec![0.0f64; sample_count];
    for &d in &in_range {
        let w = weight(d);
        let date = &dates[d];
        for i in 0..sample_count {
            ms[i] += w * f64::from(date.sample_hang_ms[i]);
            count[i] += w * f64::from(date.sample_hang_count[i]);
        }
    }
    thread.with_sample_weights(
        ms.into_iter().map(|v| v as f32).collect(),
        count.into_iter().map(|v| v as f32).collect(),
    )
}

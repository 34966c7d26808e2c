//! Whole-thread breakdowns by category and by runnable.

use hangscope_protocol::SharedStr;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::debug_span;

use crate::categories::SampleCategorizer;
use crate::model::Thread;

pub const UNKNOWN_RUNNABLE: &str = "(unknown)";

/// Hang ms per category for every date of a thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub categories: Vec<SharedStr>,
    pub dates: Vec<SharedStr>,
    /// `hang_ms[date][category]`.
    pub hang_ms: Vec<Vec<f32>>,
}

impl CategorySummary {
    pub fn total(&self, category: &str) -> f32 {
        match self.categories.iter().position(|c| &**c == category) {
            Some(c) => self.hang_ms.iter().map(|date| date[c]).sum(),
            None => 0.0,
        }
    }
}

pub fn summarize_categories(thread: &Thread, categorizer: &SampleCategorizer) -> CategorySummary {
    let _span = debug_span!("summarize_categories").entered();
    let categories = categorizer.all_categories();
    let position: FxHashMap<SharedStr, usize> = categories
        .iter()
        .enumerate()
        .map(|(i, c)| (c.clone(), i))
        .collect();
    let sample_category: Vec<Option<usize>> = thread
        .samples()
        .stack
        .iter()
        .map(|stack| stack.and_then(|s| position.get(&categorizer.category_of(s)).copied()))
        .collect();

    let hang_ms = thread
        .dates()
        .iter()
        .map(|date| {
            let mut row = vec![0.0; categories.len()];
            for (i, category) in sample_category.iter().enumerate() {
                if let Some(c) = *category {
                    row[c] += date.sample_hang_ms[i];
                }
            }
            row
        })
        .collect();
    CategorySummary {
        dates: thread.dates().iter().map(|d| d.date.clone()).collect(),
        categories,
        hang_ms,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnableSummary {
    pub name: SharedStr,
    pub hang_ms: f32,
    pub hang_count: f32,
}

/// Aggregate hang time per runnable, heaviest first. Samples without a
/// stack are skipped; samples without a runnable are grouped under
/// [`UNKNOWN_RUNNABLE`].
pub fn summarize_runnables(thread: &Thread) -> Vec<RunnableSummary> {
    let _span = debug_span!("summarize_runnables").entered();
    let samples = thread.samples();
    let mut by_runnable: FxHashMap<Option<usize>, (f32, f32)> = FxHashMap::default();
    for i in 0..samples.len() {
        if samples.stack[i].is_none() {
            continue;
        }
        let entry = by_runnable.entry(samples.runnable[i]).or_default();
        entry.0 += samples.sample_hang_ms[i];
        entry.1 += samples.sample_hang_count[i];
    }
    let mut out: Vec<RunnableSummary> = by_runnable
        .into_iter()
        .map(|(runnable, (hang_ms, hang_count))| RunnableSummary {
            name: match runnable {
                Some(s) => thread.string_table().get_string(s),
                None => UNKNOWN_RUNNABLE.into(),
            },
            hang_ms,
            hang_count,
        })
        .collect();
    out.sort_by(|a, b| b.hang_ms.total_cmp(&a.hang_ms).then_with(|| a.name.cmp(&b.name)));
    out
}

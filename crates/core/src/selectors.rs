//! From a profile thread and view options to what gets displayed.

use std::hash::Hash;
use std::sync::Arc;

use hangscope_protocol::{FuncPath, Transform, TransformStack};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, debug_span};

use crate::categories::{CategoryTable, SampleCategorizer};
use crate::filters::{
    DateRange, filter_to_category, filter_to_date_range, filter_to_platform, filter_to_runnable,
    filter_to_search_string, filter_to_user_interacting,
};
use crate::model::{CallTree, IndexIntoStackTable, Profile, Thread, ThreadId};
use crate::transforms::{
    apply_transform, fold_transform_stack, invert_callstack, path_after_transform,
    post_process_transforms,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("thread {index} does not exist, the profile has {count} threads")]
    UnknownThread { index: usize, count: usize },
}

/// Everything that shapes the view of one thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewOptions {
    pub transforms: TransformStack,
    pub invert: bool,
    pub search: String,
    pub category: String,
    pub platform: String,
    pub runnable: String,
    pub only_user_interacting: bool,
    pub date_range: Option<DateRange>,
    /// Selected call node, root first (leaf first when inverted).
    pub selected_func_path: Option<FuncPath>,
}

#[derive(Debug)]
pub struct ThreadView {
    pub filtered_thread: Thread,
    pub call_tree: CallTree,
    /// `None` when nothing is selected or the selection no longer exists.
    pub selected_stack: Option<IndexIntoStackTable>,
    pub transform_labels: Vec<String>,
}

/// Latest result of one pipeline step, per slot.
///
/// A slot keeps a single entry; computing it for a different input replaces
/// the previous result.
#[derive(Debug)]
struct StepMemo<S, K> {
    entries: Mutex<FxHashMap<S, (K, Thread)>>,
}

impl<S, K> Default for StepMemo<S, K> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
        }
    }
}

impl<S: Hash + Eq, K: PartialEq> StepMemo<S, K> {
    fn get_or_compute(&self, slot: S, input: K, compute: impl FnOnce() -> Thread) -> Thread {
        if let Some((cached, thread)) = self.entries.lock().get(&slot)
            && *cached == input
        {
            return thread.clone();
        }
        let out = compute();
        self.entries.lock().insert(slot, (input, out.clone()));
        out
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Builds [`ThreadView`]s, memoizing the expensive steps.
///
/// Each step keeps its latest result per thread index (and per position in
/// the transform stack), so repeated selects with unchanged options reuse
/// the previous threads and memory stays bounded by the threads viewed.
#[derive(Debug)]
pub struct ThreadSelector {
    categories: Arc<CategoryTable>,
    ranged: StepMemo<usize, (ThreadId, DateRange)>,
    transformed: StepMemo<(usize, usize), (ThreadId, Transform)>,
    post_processed: StepMemo<usize, ThreadId>,
}

impl Default for ThreadSelector {
    fn default() -> Self {
        Self::new(Arc::new(CategoryTable::default()))
    }
}

impl ThreadSelector {
    pub fn new(categories: Arc<CategoryTable>) -> Self {
        Self {
            categories,
            ranged: StepMemo::default(),
            transformed: StepMemo::default(),
            post_processed: StepMemo::default(),
        }
    }

    pub fn categories(&self) -> &Arc<CategoryTable> {
        &self.categories
    }

    fn thread<'p>(&self, profile: &'p Profile, index: usize) -> Result<&'p Thread, SelectError> {
        profile.thread(index).ok_or(SelectError::UnknownThread {
            index,
            count: profile.threads.len(),
        })
    }

    fn range_filtered(
        &self,
        profile: &Profile,
        thread_index: usize,
        thread: &Thread,
        range: Option<DateRange>,
    ) -> Thread {
        let Some(range) = range else {
            return thread.clone();
        };
        self.ranged.get_or_compute(thread_index, (thread.id(), range), || {
            filter_to_date_range(thread, range, &profile.usage_hours_by_date)
        })
    }

    fn apply_memoized(
        &self,
        thread_index: usize,
        step: usize,
        thread: &Thread,
        transform: &Transform,
    ) -> Thread {
        self.transformed
            .get_or_compute((thread_index, step), (thread.id(), transform.clone()), || {
                debug!(transform = transform.short_key(), step, "applying transform");
                apply_transform(thread, transform)
            })
    }

    /// The thread after the date range and the transform stack, before
    /// sample filters, plus one label per transform.
    pub fn transformed_thread(
        &self,
        profile: &Profile,
        thread_index: usize,
        options: &ViewOptions,
    ) -> Result<(Thread, Vec<String>), SelectError> {
        let thread = self.thread(profile, thread_index)?;
        let ranged = self.range_filtered(profile, thread_index, thread, options.date_range);
        let (transformed, labels) =
            fold_transform_stack(&ranged, &options.transforms, |step, current, transform| {
                self.apply_memoized(thread_index, step, current, transform)
            });
        let post_processed = self
            .post_processed
            .get_or_compute(thread_index, transformed.id(), || post_process_transforms(&transformed));
        Ok((post_processed, labels))
    }

    pub fn select(
        &self,
        profile: &Profile,
        thread_index: usize,
        options: &ViewOptions,
    ) -> Result<ThreadView, SelectError> {
        let _span = debug_span!("select", thread_index).entered();
        let (transformed, transform_labels) = self.transformed_thread(profile, thread_index, options)?;

        let mut filtered = filter_to_search_string(&transformed, &options.search);
        if !options.category.trim().is_empty() {
            let categorizer = SampleCategorizer::new(&filtered, self.categories.clone());
            filtered = filter_to_category(&filtered, &categorizer, &options.category);
        }
        filtered = filter_to_platform(&filtered, &options.platform);
        filtered = filter_to_runnable(&filtered, &options.runnable);
        if options.only_user_interacting {
            filtered = filter_to_user_interacting(&filtered);
        }
        if options.invert {
            filtered = invert_callstack(&filtered);
        }

        let call_tree = CallTree::from_thread(&filtered);
        let selected_stack = options
            .selected_func_path
            .as_deref()
            .and_then(|path| filtered.stack_table().stack_from_func_path(path));
        if options.selected_func_path.is_some() && selected_stack.is_none() {
            debug!("selected call node is not in the current view");
        }
        Ok(ThreadView {
            filtered_thread: filtered,
            call_tree,
            selected_stack,
            transform_labels,
        })
    }

    /// `options` with `transform` pushed, carrying the selected call node
    /// over to where it lands after the transform.
    pub fn push_transform(
        &self,
        profile: &Profile,
        thread_index: usize,
        options: &ViewOptions,
        transform: Transform,
    ) -> Result<ViewOptions, SelectError> {
        let (transformed, _) = self.transformed_thread(profile, thread_index, options)?;
        let selected_func_path = match &options.selected_func_path {
            Some(path) if !options.invert => path_after_transform(&transformed, &transform, path),
            _ => None,
        };
        let mut next = options.clone();
        next.transforms.push(transform);
        next.selected_func_path = selected_func_path;
        Ok(next)
    }
}

//! Per-date totals under one call node.
//!
//! A date graph is one [`DateTotals`] per date of a thread. Each date is an
//! independent unit of work, so rebuilding a graph can be split over
//! workers with [`DateGraphScheduler`], which also drops work that a newer
//! request for the same key has superseded.

use hangscope_protocol::SharedStr;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, debug_span, warn};

use crate::model::{IndexIntoStackTable, Thread, ThreadId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DateTotals {
    pub time: f32,
    pub count: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateGraph {
    pub dates: Vec<SharedStr>,
    pub time: Vec<f32>,
    pub count: Vec<f32>,
}

impl DateGraph {
    fn from_totals(thread: &Thread, totals: &[DateTotals]) -> Self {
        Self {
            dates: thread.dates().iter().map(|d| d.date.clone()).collect(),
            time: totals.iter().map(|t| t.time).collect(),
            count: totals.iter().map(|t| t.count).collect(),
        }
    }
}

/// Hang time and count under `stack` on one date, or over the whole thread
/// when `stack` is `None`. An unknown date or stack yields zeros.
pub fn date_totals(thread: &Thread, stack: Option<IndexIntoStackTable>, date_index: usize) -> DateTotals {
    let Some(date) = thread.dates().get(date_index) else {
        return DateTotals::default();
    };
    let stack_table = thread.stack_table();
    let mut time = vec![0.0f32; stack_table.len()];
    let mut count = vec![0.0f32; stack_table.len()];
    for (i, sample_stack) in thread.samples().stack.iter().enumerate() {
        if let Some(s) = *sample_stack {
            time[s] += date.sample_hang_ms[i];
            count[s] += date.sample_hang_count[i];
        }
    }

    let mut whole_thread = DateTotals::default();
    for s in (0..stack_table.len()).rev() {
        if stack == Some(s) {
            // Every descendant has a higher index and was already folded in.
            return DateTotals {
                time: time[s],
                count: count[s],
            };
        }
        match stack_table.prefix[s] {
            Some(prefix) => {
                time[prefix] += time[s];
                count[prefix] += count[s];
            }
            None => {
                whole_thread.time += time[s];
                whole_thread.count += count[s];
            }
        }
    }
    if stack.is_some() {
        return DateTotals::default();
    }
    whole_thread
}

/// The date graph of `stack`, computed date by date on the caller's thread.
pub fn build_date_graph(thread: &Thread, stack: Option<IndexIntoStackTable>) -> DateGraph {
    let _span = debug_span!("build_date_graph", ?stack).entered();
    let totals: Vec<_> = (0..thread.dates().len())
        .map(|date| date_totals(thread, stack, date))
        .collect();
    DateGraph::from_totals(thread, &totals)
}

/// Which share of the dates a worker computes: dates `index`,
/// `index + count`, `index + 2 * count` and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub count: usize,
}

impl Partition {
    pub fn whole() -> Self {
        Self { index: 0, count: 1 }
    }

    pub fn dates(self, date_count: usize) -> impl Iterator<Item = usize> {
        (self.index..date_count).step_by(self.count.max(1))
    }
}

/// Proof that a rebuild was requested, checked before each unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    key: String,
    epoch: u64,
}

impl Ticket {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Per-date totals of the thread generation rebuilt last. Totals of any
/// other generation are dropped when a new one comes in.
#[derive(Debug, Default)]
struct TotalsMemo {
    thread: Option<ThreadId>,
    totals: FxHashMap<(Option<IndexIntoStackTable>, usize), DateTotals>,
}

/// Schedules date-graph rebuilds and memoizes per-date totals.
///
/// Requests are grouped under a caller-chosen key (one per graph on
/// screen). Requesting a key again supersedes every ticket issued for it
/// before; units of work holding a stale ticket are discarded unrun. One
/// epoch is kept per key.
#[derive(Debug, Default)]
pub struct DateGraphScheduler {
    epochs: Mutex<FxHashMap<String, u64>>,
    memo: Mutex<TotalsMemo>,
}

impl DateGraphScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, key: &str) -> Ticket {
        let mut epochs = self.epochs.lock();
        let epoch = epochs.entry(key.to_string()).or_insert(0);
        *epoch += 1;
        Ticket {
            key: key.to_string(),
            epoch: *epoch,
        }
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.epochs.lock().get(&ticket.key) == Some(&ticket.epoch)
    }

    /// Totals for one date, from the memo when this thread, stack and date
    /// were computed before.
    pub fn totals(&self, thread: &Thread, stack: Option<IndexIntoStackTable>, date_index: usize) -> DateTotals {
        let key = (stack, date_index);
        {
            let memo = self.memo.lock();
            if memo.thread == Some(thread.id())
                && let Some(&totals) = memo.totals.get(&key)
            {
                return totals;
            }
        }
        let totals = date_totals(thread, stack, date_index);
        let mut memo = self.memo.lock();
        if memo.thread != Some(thread.id()) {
            debug!(entries = memo.totals.len(), "date totals memo reset for a new thread");
            memo.totals.clear();
            memo.thread = Some(thread.id());
        }
        memo.totals.insert(key, totals);
        totals
    }

    /// Compute the dates of one partition. Returns `None` as soon as the
    /// ticket is superseded; results computed so far are kept in the memo.
    pub fn run_partition(
        &self,
        ticket: &Ticket,
        thread: &Thread,
        stack: Option<IndexIntoStackTable>,
        partition: Partition,
    ) -> Option<Vec<(usize, DateTotals)>> {
        let mut out = Vec::new();
        for date in partition.dates(thread.dates().len()) {
            if !self.is_current(ticket) {
                debug!(key = ticket.key(), date, "date graph work superseded");
                return None;
            }
            out.push((date, self.totals(thread, stack, date)));
        }
        Some(out)
    }

    /// Rebuild the graph of `stack` over `workers` scoped threads.
    ///
    /// Returns `None` when a newer request for `key` arrived before the
    /// rebuild finished.
    pub fn rebuild(
        &self,
        thread: &Thread,
        stack: Option<IndexIntoStackTable>,
        key: &str,
        workers: usize,
    ) -> Option<DateGraph> {
        let _span = debug_span!("rebuild_date_graph", key, workers).entered();
        let ticket = self.request(key);
        let count = workers.max(1);
        let (tx, rx) = crossbeam::channel::unbounded();

        let scoped = crossbeam::scope(|s| {
            for index in 0..count {
                let tx = tx.clone();
                let ticket = &ticket;
                s.spawn(move |_| {
                    let result = self.run_partition(ticket, thread, stack, Partition { index, count });
                    // The receiver outlives the scope.
                    let _ = tx.send(result);
                });
            }
        });
        drop(tx);
        if scoped.is_err() {
            warn!(key, "a date graph worker panicked");
            return None;
        }

        let mut totals = vec![DateTotals::default(); thread.dates().len()];
        for result in rx {
            for (date, t) in result? {
                totals[date] = t;
            }
        }
        if !self.is_current(&ticket) {
            debug!(key, "date graph superseded after completion");
            return None;
        }
        Some(DateGraph::from_totals(thread, &totals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::thread_with_dates;

    fn two_day_thread() -> Thread {
        thread_with_dates(
            &["A;B", "A;C", "D"],
            &[("2017-09-01", &[1.0, 2.0, 4.0]), ("2017-09-02", &[8.0, 0.0, 16.0])],
        )
    }

    #[test]
    fn totals_under_a_stack() {
        let thread = two_day_thread();
        // Stack 0 is A.
        assert_eq!(date_totals(&thread, Some(0), 0).time, 3.0);
        assert_eq!(date_totals(&thread, Some(0), 1).time, 8.0);
        assert_eq!(date_totals(&thread, Some(0), 1).count, 1.0);
        assert_eq!(date_totals(&thread, Some(1), 0).time, 1.0);
    }

    #[test]
    fn totals_for_whole_thread() {
        let thread = two_day_thread();
        assert_eq!(date_totals(&thread, None, 0).time, 7.0);
        assert_eq!(date_totals(&thread, None, 1).time, 24.0);
        assert_eq!(date_totals(&thread, None, 5), DateTotals::default());
        assert_eq!(date_totals(&thread, Some(99), 0), DateTotals::default());
    }

    #[test]
    fn graph_lists_every_date() {
        let thread = two_day_thread();
        let graph = build_date_graph(&thread, None);
        assert_eq!(graph.dates.len(), 2);
        assert_eq!(graph.time, vec![7.0, 24.0]);
    }

    #[test]
    fn partitions_cover_all_dates_once() {
        let mut seen: Vec<usize> = (0..3)
            .flat_map(|index| Partition { index, count: 3 }.dates(10))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn parallel_rebuild_matches_sequential() {
        let thread = two_day_thread();
        let scheduler = DateGraphScheduler::new();
        let graph = scheduler.rebuild(&thread, Some(0), "selected", 4).unwrap();
        assert_eq!(graph, build_date_graph(&thread, Some(0)));
    }

    #[test]
    fn superseded_ticket_discards_work() {
        let thread = two_day_thread();
        let scheduler = DateGraphScheduler::new();
        let stale = scheduler.request("selected");
        let fresh = scheduler.request("selected");
        assert!(!scheduler.is_current(&stale));
        assert!(scheduler
            .run_partition(&stale, &thread, None, Partition::whole())
            .is_none());
        let done = scheduler
            .run_partition(&fresh, &thread, None, Partition::whole())
            .unwrap();
        assert_eq!(done.len(), 2);
        // Other keys are independent.
        let other = scheduler.request("root");
        assert!(scheduler.is_current(&other));
        assert!(scheduler.is_current(&fresh));
    }

    #[test]
    fn memo_only_holds_the_latest_thread() {
        let thread = two_day_thread();
        let scheduler = DateGraphScheduler::new();
        scheduler.rebuild(&thread, None, "root", 2).unwrap();
        scheduler.rebuild(&thread, Some(0), "selected", 2).unwrap();
        assert_eq!(scheduler.memo.lock().totals.len(), 4);

        let derived = thread.with_sample_stacks(vec![Some(0), None, Some(2)]);
        assert_ne!(derived.id(), thread.id());
        let graph = scheduler.rebuild(&derived, None, "root", 2).unwrap();
        assert_eq!(graph.time, vec![5.0, 24.0]);
        let memo = scheduler.memo.lock();
        assert_eq!(memo.thread, Some(derived.id()));
        assert_eq!(memo.totals.len(), 2);
    }
}

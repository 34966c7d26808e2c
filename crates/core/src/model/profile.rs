use std::sync::Arc;

use hangscope_protocol::SharedStr;

use super::string_table::StringTable;
use super::tables::Lib;
use super::thread::Thread;

/// A parsed hang profile: threads over one shared, sorted date axis.
#[derive(Debug, Clone)]
pub struct Profile {
    pub threads: Vec<Thread>,
    /// Sorted union of every thread's dates. Each thread carries one
    /// [`DateTable`](super::DateTable) per entry, in this order.
    pub dates: Vec<SharedStr>,
    /// Usage hours per entry of `dates`; zero when unknown.
    pub usage_hours_by_date: Vec<f64>,
    pub string_table: Arc<StringTable>,
    pub libs: Arc<[Lib]>,
}

impl Profile {
    pub fn thread(&self, index: usize) -> Option<&Thread> {
        self.threads.get(index)
    }

    pub fn total_usage_hours(&self) -> f64 {
        self.usage_hours_by_date.iter().sum()
    }

    pub fn date_index(&self, date: &str) -> Option<usize> {
        self.dates.binary_search_by(|d| d.as_str().cmp(date)).ok()
    }
}

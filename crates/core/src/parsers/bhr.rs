use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use hangscope_protocol::SharedStr;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info_span};

use crate::model::{
    DateTable, FuncTable, Lib, Profile, SampleTable, StackOrderError, StackTable, StringTable,
    Thread, ThreadParts,
};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("thread {thread}: {column} has {actual} entries, expected {expected}")]
    ColumnLength {
        thread: usize,
        column: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("thread {thread}: {source}")]
    StackOrder {
        thread: usize,
        source: StackOrderError,
    },
    #[error("thread {thread}: {column} refers to index {index}, but there are only {len}")]
    IndexOutOfRange {
        thread: usize,
        column: &'static str,
        index: i64,
        len: usize,
    },
    #[error("thread {thread}: date {date} appears more than once")]
    DuplicateDate { thread: usize, date: String },
}

/// Background hang report top level.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProfile {
    #[serde(default)]
    string_array: Vec<String>,
    #[serde(default)]
    libs: Vec<Lib>,
    #[serde(default)]
    usage_hours_by_date: BTreeMap<String, f64>,
    #[serde(default)]
    threads: Vec<RawThread>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawThread {
    #[serde(default)]
    name: String,
    #[serde(default)]
    process_type: Option<String>,
    stack_table: RawStackTable,
    func_table: RawFuncTable,
    sample_table: RawSampleTable,
    #[serde(default)]
    dates: Vec<RawDate>,
}

/// Prefixes and libs use `null` or `-1` for "none".
#[derive(Debug, Deserialize)]
struct RawStackTable {
    prefix: Vec<Option<i64>>,
    func: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct RawFuncTable {
    name: Vec<usize>,
    lib: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSampleTable {
    stack: Vec<Option<usize>>,
    #[serde(default)]
    runnable: Option<Vec<Option<usize>>>,
    #[serde(default)]
    platform: Option<Vec<Option<usize>>>,
    #[serde(default)]
    user_interacting: Option<Vec<bool>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDate {
    date: String,
    sample_hang_ms: Vec<f32>,
    sample_hang_count: Vec<f32>,
}

/// Parse a hang profile and prepare it for analysis.
///
/// Besides validating every column, this derives the stack depth column,
/// puts every thread on the profile's sorted date axis (dates a thread
/// lacks get all-zero tables) and computes each sample's aggregate weight
/// as the usage-hours weighted average over all dates.
pub fn parse_profile(data: &[u8]) -> Result<Profile, IngestError> {
    let raw: RawProfile = serde_json::from_slice(data)?;
    let _span = info_span!("parse_profile", threads = raw.threads.len()).entered();

    let dates: Vec<SharedStr> = raw
        .threads
        .iter()
        .flat_map(|t| t.dates.iter().map(|d| d.date.as_str()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(SharedStr::from)
        .collect();
    let usage_hours_by_date: Vec<f64> = dates
        .iter()
        .map(|d| raw.usage_hours_by_date.get(d.as_str()).copied().unwrap_or(0.0))
        .collect();
    let date_weights = date_weights(&usage_hours_by_date);
    debug!(dates = dates.len(), "profile date axis");

    let string_table = Arc::new(StringTable::from_strings(raw.string_array));
    let libs: Arc<[Lib]> = raw.libs.into();

    let threads = raw
        .threads
        .into_iter()
        .enumerate()
        .map(|(index, thread)| {
            let ctx = ThreadContext {
                index,
                string_table: &string_table,
                libs: &libs,
            };
            ctx.build(thread, &dates, &date_weights).map(Thread::from)
        })
        .collect::<Result<Vec<_>, IngestError>>()?;

    Ok(Profile {
        threads,
        dates,
        usage_hours_by_date,
        string_table,
        libs,
    })
}

/// Weight of each date in a sample's aggregate; uniform when no date has
/// usage hours.
fn date_weights(usage_hours: &[f64]) -> Vec<f64> {
    let total: f64 = usage_hours.iter().sum();
    if total > 0.0 {
        usage_hours.iter().map(|h| h / total).collect()
    } else {
        vec![1.0 / usage_hours.len().max(1) as f64; usage_hours.len()]
    }
}

struct ThreadContext<'a> {
    index: usize,
    string_table: &'a Arc<StringTable>,
    libs: &'a Arc<[Lib]>,
}

impl ThreadContext<'_> {
    fn check_len(&self, column: &'static str, expected: usize, actual: usize) -> Result<(), IngestError> {
        if expected == actual {
            Ok(())
        } else {
            Err(IngestError::ColumnLength {
                thread: self.index,
                column,
                expected,
                actual,
            })
        }
    }

    fn check_index(&self, column: &'static str, index: usize, len: usize) -> Result<usize, IngestError> {
        if index < len {
            Ok(index)
        } else {
            Err(self.out_of_range(column, index as i64, len))
        }
    }

    fn out_of_range(&self, column: &'static str, index: i64, len: usize) -> IngestError {
        IngestError::IndexOutOfRange {
            thread: self.index,
            column,
            index,
            len,
        }
    }

    /// `null` and `-1` both mean "none".
    fn optional_index(
        &self,
        column: &'static str,
        value: Option<i64>,
        len: usize,
    ) -> Result<Option<usize>, IngestError> {
        match value {
            None | Some(-1) => Ok(None),
            Some(v) if v >= 0 && (v as usize) < len => Ok(Some(v as usize)),
            Some(v) => Err(self.out_of_range(column, v, len)),
        }
    }

    fn string_column(
        &self,
        column: &'static str,
        values: Option<Vec<Option<usize>>>,
        sample_count: usize,
    ) -> Result<Vec<Option<usize>>, IngestError> {
        let Some(values) = values else {
            return Ok(vec![None; sample_count]);
        };
        self.check_len(column, sample_count, values.len())?;
        for s in values.iter().flatten() {
            self.check_index(column, *s, self.string_table.len())?;
        }
        Ok(values)
    }

    fn build(
        &self,
        raw: RawThread,
        dates: &[SharedStr],
        date_weights: &[f64],
    ) -> Result<ThreadParts, IngestError> {
        let funcs = &raw.func_table;
        self.check_len("funcTable.lib", funcs.name.len(), funcs.lib.len())?;
        let mut func_table = FuncTable::default();
        for (&name, &lib) in funcs.name.iter().zip(&funcs.lib) {
            let name = self.check_index("funcTable.name", name, self.string_table.len())?;
            let lib = self.optional_index("funcTable.lib", lib, self.libs.len())?;
            func_table.push(name, lib);
        }

        let stacks = raw.stack_table;
        self.check_len("stackTable.prefix", stacks.func.len(), stacks.prefix.len())?;
        let prefix = stacks
            .prefix
            .iter()
            .map(|&p| self.optional_index("stackTable.prefix", p, stacks.func.len()))
            .collect::<Result<Vec<_>, _>>()?;
        for &func in &stacks.func {
            self.check_index("stackTable.func", func, func_table.len())?;
        }
        let stack_table = StackTable::from_columns(prefix, stacks.func).map_err(|source| {
            IngestError::StackOrder {
                thread: self.index,
                source,
            }
        })?;

        let samples = raw.sample_table;
        let sample_count = samples.stack.len();
        for s in samples.stack.iter().flatten() {
            self.check_index("sampleTable.stack", *s, stack_table.len())?;
        }
        let runnable = self.string_column("sampleTable.runnable", samples.runnable, sample_count)?;
        let platform = self.string_column("sampleTable.platform", samples.platform, sample_count)?;
        let user_interacting = match samples.user_interacting {
            Some(v) => {
                self.check_len("sampleTable.userInteracting", sample_count, v.len())?;
                v
            }
            None => vec![false; sample_count],
        };

        let mut by_date: FxHashMap<String, RawDate> = FxHashMap::default();
        for date in raw.dates {
            self.check_len("dates.sampleHangMs", sample_count, date.sample_hang_ms.len())?;
            self.check_len("dates.sampleHangCount", sample_count, date.sample_hang_count.len())?;
            if by_date.contains_key(&date.date) {
                return Err(IngestError::DuplicateDate {
                    thread: self.index,
                    date: date.date,
                });
            }
            by_date.insert(date.date.clone(), date);
        }

        let mut sample_hang_ms = vec![0.0f64; sample_count];
        let mut sample_hang_count = vec![0.0f64; sample_count];
        let date_tables: Vec<DateTable> = dates
            .iter()
            .zip(date_weights)
            .map(|(date, &weight)| match by_date.remove(date.as_str()) {
                Some(raw) => {
                    for i in 0..sample_count {
                        sample_hang_ms[i] += weight * f64::from(raw.sample_hang_ms[i]);
                        sample_hang_count[i] += weight * f64::from(raw.sample_hang_count[i]);
                    }
                    DateTable {
                        date: date.clone(),
                        sample_hang_ms: raw.sample_hang_ms.into(),
                        sample_hang_count: raw.sample_hang_count.into(),
                    }
                }
                None => DateTable::zeroed(date.clone(), sample_count),
            })
            .collect();

        let samples = SampleTable {
            stack: samples.stack.into(),
            sample_hang_ms: sample_hang_ms.into_iter().map(|v| v as f32).collect(),
            sample_hang_count: sample_hang_count.into_iter().map(|v| v as f32).collect(),
            runnable: runnable.into(),
            platform: platform.into(),
            user_interacting: user_interacting.into(),
        };

        Ok(ThreadParts {
            name: raw.name.into(),
            process_type: raw.process_type.as_deref().unwrap_or("default").into(),
            stack_table,
            func_table,
            samples,
            dates: date_tables,
            string_table: self.string_table.clone(),
            libs: self.libs.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "stringArray": ["main", "Paint", "xul.dll", "RefreshDriverTick", "win"],
        "libs": [{"name": "xul.dll", "debugName": "xul.pdb", "breakpadId": "ABC1"}],
        "usageHoursByDate": {"2017-09-01": 1.0, "2017-09-02": 3.0},
        "threads": [
            {
                "name": "Gecko",
                "processType": "default",
                "stackTable": {"prefix": [null, 0], "func": [0, 1]},
                "funcTable": {"name": [0, 1], "lib": [-1, 0]},
                "sampleTable": {
                    "stack": [1, 0, null],
                    "runnable": [3, null, null],
                    "platform": [4, 4, 4],
                    "userInteracting": [true, false, false]
                },
                "dates": [
                    {"date": "2017-09-02", "sampleHangMs": [8.0, 4.0, 1.0], "sampleHangCount": [1.0, 1.0, 1.0]},
                    {"date": "2017-09-01", "sampleHangMs": [4.0, 0.0, 1.0], "sampleHangCount": [1.0, 0.0, 1.0]}
                ]
            },
            {
                "name": "Gecko_Child",
                "stackTable": {"prefix": [-1], "func": [0]},
                "funcTable": {"name": [0], "lib": [null]},
                "sampleTable": {"stack": [0]},
                "dates": [{"date": "2017-09-03", "sampleHangMs": [2.0], "sampleHangCount": [1.0]}]
            }
        ]
    }"#;

    #[test]
    fn parses_and_aligns_dates() {
        let profile = parse_profile(SAMPLE.as_bytes()).unwrap();
        let dates: Vec<&str> = profile.dates.iter().map(SharedStr::as_str).collect();
        assert_eq!(dates, ["2017-09-01", "2017-09-02", "2017-09-03"]);
        assert_eq!(profile.usage_hours_by_date, vec![1.0, 3.0, 0.0]);

        let gecko = &profile.threads[0];
        assert_eq!(gecko.dates().len(), 3);
        assert_eq!(&*gecko.dates()[0].sample_hang_ms, &[4.0, 0.0, 1.0]);
        assert_eq!(&*gecko.dates()[2].sample_hang_ms, &[0.0, 0.0, 0.0]);
        assert_eq!(gecko.stack_table().depth, vec![0, 1]);
        assert_eq!(gecko.func_lib(0), None);
        assert_eq!(gecko.func_lib(1), Some(0));
        assert!(gecko.samples().user_interacting[0]);

        let child = &profile.threads[1];
        assert_eq!(&**child.process_type(), "default");
        assert_eq!(child.stack_table().prefix, vec![None]);
        assert_eq!(&*child.dates()[0].sample_hang_ms, &[0.0]);
    }

    #[test]
    fn aggregate_weights_follow_usage_hours() {
        let profile = parse_profile(SAMPLE.as_bytes()).unwrap();
        let ms = &profile.threads[0].samples().sample_hang_ms;
        // 0.25 * 4 + 0.75 * 8
        assert_eq!(ms[0], 7.0);
        assert_eq!(ms[1], 3.0);
        let count = &profile.threads[0].samples().sample_hang_count;
        assert_eq!(count[1], 0.75);
    }

    #[test]
    fn uniform_weights_without_usage_hours() {
        assert_eq!(date_weights(&[0.0, 0.0]), vec![0.5, 0.5]);
        assert!(date_weights(&[]).is_empty());
    }

    #[test]
    fn rejects_broken_tables() {
        let misordered = r#"{"stringArray": ["a"], "threads": [{
            "stackTable": {"prefix": [1, null], "func": [0, 0]},
            "funcTable": {"name": [0], "lib": [null]},
            "sampleTable": {"stack": []}
        }]}"#;
        assert!(matches!(
            parse_profile(misordered.as_bytes()),
            Err(IngestError::StackOrder { thread: 0, .. })
        ));

        let bad_func = r#"{"stringArray": ["a"], "threads": [{
            "stackTable": {"prefix": [null], "func": [3]},
            "funcTable": {"name": [0], "lib": [null]},
            "sampleTable": {"stack": []}
        }]}"#;
        assert!(matches!(
            parse_profile(bad_func.as_bytes()),
            Err(IngestError::IndexOutOfRange { column: "stackTable.func", index: 3, .. })
        ));

        let short_date = r#"{"stringArray": ["a"], "threads": [{
            "stackTable": {"prefix": [null], "func": [0]},
            "funcTable": {"name": [0], "lib": [null]},
            "sampleTable": {"stack": [0, 0]},
            "dates": [{"date": "d", "sampleHangMs": [1.0], "sampleHangCount": [1.0, 1.0]}]
        }]}"#;
        assert!(matches!(
            parse_profile(short_date.as_bytes()),
            Err(IngestError::ColumnLength { column: "dates.sampleHangMs", .. })
        ));

        assert!(matches!(parse_profile(b"[1, 2"), Err(IngestError::Json(_))));
    }
}

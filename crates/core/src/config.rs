//! Analysis settings loaded from JSON.
//!
//! Every field has a default, so `{}` is a valid configuration. Dates and
//! transform strings stay unresolved until they meet a profile.

use hangscope_protocol::parse_transforms;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::categories::{CategoryRuleConfig, CategoryTable};
use crate::filters::DateRange;
use crate::model::Profile;
use crate::selectors::ViewOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid category pattern: {0}")]
    Regex(#[from] regex::Error),
    #[error("date {0} is not in the profile")]
    UnknownDate(String),
    #[error("date range starts at {start} but ends at {end}")]
    EmptyDateRange { start: String, end: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfig {
    #[serde(default)]
    pub view: ViewOptionsConfig,
    #[serde(default = "default_date_graph_workers")]
    pub date_graph_workers: usize,
    /// Replaces the built-in category rules when present.
    #[serde(default)]
    pub categories: Option<Vec<CategoryRuleConfig>>,
}

fn default_date_graph_workers() -> usize {
    4
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            view: ViewOptionsConfig::default(),
            date_graph_workers: default_date_graph_workers(),
            categories: None,
        }
    }
}

impl AnalysisConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn category_table(&self) -> Result<CategoryTable, ConfigError> {
        match &self.categories {
            Some(rules) => Ok(CategoryTable::from_config(rules)?),
            None => Ok(CategoryTable::default()),
        }
    }
}

/// `view` section: the transforms and filters applied to a thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewOptionsConfig {
    /// Transform stack in its URL form, e.g. `f-combined-0w2~mf-3`.
    pub transforms: String,
    pub invert: bool,
    pub search: String,
    pub category: String,
    pub platform: String,
    pub runnable: String,
    pub only_user_interacting: bool,
    pub date_range: Option<DateRangeConfig>,
}

/// Dates from `start` up to but excluding `end`. A missing bound extends
/// the range to that end of the profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DateRangeConfig {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl DateRangeConfig {
    pub fn resolve(&self, profile: &Profile) -> Result<DateRange, ConfigError> {
        let lookup = |date: &str| {
            profile
                .date_index(date)
                .ok_or_else(|| ConfigError::UnknownDate(date.to_string()))
        };
        let start = self.start.as_deref().map_or(Ok(0), lookup)?;
        let end = self.end.as_deref().map_or(Ok(profile.dates.len()), lookup)?;
        if end < start {
            return Err(ConfigError::EmptyDateRange {
                start: self.start.clone().unwrap_or_default(),
                end: self.end.clone().unwrap_or_default(),
            });
        }
        Ok(DateRange { start, end })
    }
}

impl ViewOptionsConfig {
    /// Resolve against `profile`. Transform entries that don't parse are
    /// logged and skipped.
    pub fn to_view_options(&self, profile: &Profile) -> Result<ViewOptions, ConfigError> {
        let parsed = parse_transforms(&self.transforms);
        for error in &parsed.errors {
            warn!(%error, "dropping transform");
        }
        let date_range = match &self.date_range {
            Some(range) => Some(range.resolve(profile)?),
            None => None,
        };
        Ok(ViewOptions {
            transforms: parsed.transforms,
            invert: self.invert,
            search: self.search.clone(),
            category: self.category.clone(),
            platform: self.platform.clone(),
            runnable: self.runnable.clone(),
            only_user_interacting: self.only_user_interacting,
            date_range,
            selected_func_path: None,
        })
    }
}

mod output;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use hangscope_core::categories::SampleCategorizer;
use hangscope_core::config::{AnalysisConfig, DateRangeConfig};
use hangscope_core::date_graph::DateGraphScheduler;
use hangscope_core::model::Profile;
use hangscope_core::parsers::parse_profile;
use hangscope_core::selectors::{ThreadSelector, ThreadView, ViewOptions};
use hangscope_core::summary::{summarize_categories, summarize_runnables};
use hangscope_protocol::uint_array::decode_uint_array;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hangscope")]
#[command(about = "Explore background hang reports from the command line", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the threads of a profile
    Threads {
        /// Hang profile JSON
        profile: PathBuf,
    },
    /// Print the call tree of a thread as JSON
    Tree {
        #[command(flatten)]
        view: ViewArgs,
        /// Stop expanding below this depth
        #[arg(long)]
        max_depth: Option<u32>,
    },
    /// Print per-date hang totals under the selected call node
    Graph {
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Print hang time by category and by runnable
    Summary {
        #[command(flatten)]
        view: ViewArgs,
    },
}

#[derive(Args)]
struct ViewArgs {
    /// Hang profile JSON
    profile: PathBuf,
    /// Analysis configuration JSON
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Thread index
    #[arg(short, long, default_value_t = 0)]
    thread: usize,
    /// Transform stack in URL form, replacing the configured one
    #[arg(long)]
    transforms: Option<String>,
    #[arg(long)]
    invert: bool,
    /// Comma-separated search terms
    #[arg(short, long)]
    search: Option<String>,
    /// Comma-separated categories; a leading '-' excludes them
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    platform: Option<String>,
    #[arg(long)]
    runnable: Option<String>,
    /// Only samples taken while the user was interacting
    #[arg(long)]
    user_interacting: bool,
    /// First date to include
    #[arg(long)]
    date_start: Option<String>,
    /// First date to leave out
    #[arg(long)]
    date_end: Option<String>,
    /// Selected call node as a URL-encoded func path
    #[arg(long)]
    select: Option<String>,
    /// Date graph worker threads, replacing the configured count
    #[arg(long)]
    workers: Option<usize>,
}

struct Session {
    profile: Profile,
    config: AnalysisConfig,
    selector: ThreadSelector,
    options: ViewOptions,
}

impl Session {
    fn select(&self, thread: usize) -> Result<ThreadView> {
        Ok(self.selector.select(&self.profile, thread, &self.options)?)
    }
}

impl ViewArgs {
    fn open(&self) -> Result<Session> {
        let profile = load_profile(&self.profile)?;
        let config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                AnalysisConfig::from_json(&json)?
            }
            None => AnalysisConfig::default(),
        };
        let selector = ThreadSelector::new(Arc::new(config.category_table()?));
        let options = self.view_options(&config, &profile)?;
        Ok(Session {
            profile,
            config,
            selector,
            options,
        })
    }

    /// Configured view settings with the command-line flags applied on top.
    fn view_options(&self, config: &AnalysisConfig, profile: &Profile) -> Result<ViewOptions> {
        let mut view = config.view.clone();
        if let Some(transforms) = &self.transforms {
            view.transforms.clone_from(transforms);
        }
        for (flag, field) in [
            (&self.search, &mut view.search),
            (&self.category, &mut view.category),
            (&self.platform, &mut view.platform),
            (&self.runnable, &mut view.runnable),
        ] {
            if let Some(value) = flag {
                field.clone_from(value);
            }
        }
        view.invert |= self.invert;
        view.only_user_interacting |= self.user_interacting;
        if self.date_start.is_some() || self.date_end.is_some() {
            view.date_range = Some(DateRangeConfig {
                start: self.date_start.clone(),
                end: self.date_end.clone(),
            });
        }
        let mut options = view.to_view_options(profile)?;
        options.selected_func_path = self
            .select
            .as_deref()
            .map(decode_uint_array)
            .transpose()
            .context("decoding --select")?;
        Ok(options)
    }
}

fn load_profile(path: &Path) -> Result<Profile> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let profile = parse_profile(&data).with_context(|| format!("parsing {}", path.display()))?;
    info!(
        threads = profile.threads.len(),
        dates = profile.dates.len(),
        "loaded profile"
    );
    Ok(profile)
}

fn write_json<T: Serialize>(value: &T) -> Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Threads { profile } => {
            let profile = load_profile(&profile)?;
            write_json(&output::thread_list(&profile))
        }
        Commands::Tree { view, max_depth } => {
            let session = view.open()?;
            let selected = session.select(view.thread)?;
            write_json(&output::TreeReport::new(&selected, max_depth))
        }
        Commands::Graph { view } => {
            let session = view.open()?;
            let selected = session.select(view.thread)?;
            if session.options.selected_func_path.is_some() && selected.selected_stack.is_none() {
                bail!("the selected call node is not part of this view");
            }
            let workers = view.workers.unwrap_or(session.config.date_graph_workers);
            let graph = DateGraphScheduler::new()
                .rebuild(&selected.filtered_thread, selected.selected_stack, "cli", workers)
                .ok_or_else(|| anyhow!("date graph rebuild was superseded"))?;
            write_json(&graph)
        }
        Commands::Summary { view } => {
            let session = view.open()?;
            let selected = session.select(view.thread)?;
            let thread = &selected.filtered_thread;
            let categorizer =
                SampleCategorizer::new(thread, session.selector.categories().clone());
            write_json(&output::SummaryReport {
                categories: summarize_categories(thread, &categorizer),
                runnables: summarize_runnables(thread),
            })
        }
    }
}

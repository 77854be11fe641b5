// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! Every `run` option that maps to a configuration key is turned into a
//! dotted-key override (see [`RunOptions::overrides`]), so the same values
//! flow through `args.json`, replay and `avocado config`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};

use crate::config::ConfigDict;
use crate::errors::{AvocadoError, Result};
use crate::jobdata::replay::ReplayIgnore;
use crate::types::ExecutionOrder;

/// Command-line arguments for `avocado`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "avocado",
    version,
    about = "Test execution engine: resolve references, run them as tasks, record results.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `AVOCADO_CONFIG`, then `~/.config/avocado/avocado.toml` if
    /// present, then built-in defaults.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `AVOCADO_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Resolve references and run them.
    Run(RunArgs),
    /// List the tests references resolve to.
    List(ListArgs),
    /// Show how each reference resolves.
    Resolve(ListArgs),
    /// Inspect previous jobs.
    Jobs {
        #[command(subcommand)]
        action: JobsCommand,
    },
    /// Re-run a previous job.
    Replay(ReplayArgs),
    /// Show the differences between two jobs.
    Diff(DiffArgs),
    /// Show the effective configuration.
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommand>,
    },
    /// Run a single runnable, printing status messages.
    RunnableRun(RunnableRunArgs),
    /// Run a single task, printing status messages.
    TaskRun(TaskRunArgs),
    /// Run the task described by a recipe file (used by the spawner).
    TaskRunRecipe(TaskRunRecipeArgs),
}

impl Command {
    /// Subcommands that run inside a spawned execution context.
    pub fn is_runner(&self) -> bool {
        matches!(
            self,
            Command::RunnableRun(_) | Command::TaskRun(_) | Command::TaskRunRecipe(_)
        )
    }
}

/// `on` / `off` switches.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OnOff {
    On,
    Off,
}

impl OnOff {
    pub fn is_on(self) -> bool {
        self == OnOff::On
    }
}

/// Options shared by `run` and `replay`.
#[derive(Debug, Clone, Default, Args)]
pub struct RunOptions {
    /// Directory where job results directories are created.
    #[arg(long, value_name = "DIR")]
    pub job_results_dir: Option<PathBuf>,

    /// Cancel remaining tests after the first failure.
    #[arg(long, value_enum, value_name = "on|off")]
    pub failfast: Option<OnOff>,

    /// How tests and variants are interleaved.
    #[arg(long, value_enum, value_name = "ORDER")]
    pub execution_order: Option<ExecutionOrder>,

    /// Create sysinfo directories and run sysinfo collectors.
    #[arg(long, value_enum, value_name = "on|off")]
    pub sysinfo: Option<OnOff>,

    /// Keep each test's work directory.
    #[arg(long)]
    pub keep_tmp: bool,

    /// Resolve and create tasks, but report them as CANCEL without running.
    #[arg(long)]
    pub dry_run: bool,

    /// Run even if some references do not resolve.
    #[arg(long, value_enum, value_name = "on|off")]
    pub ignore_missing_references: Option<OnOff>,

    /// Per-test timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    /// Whole-job timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub job_timeout: Option<f64>,

    /// Maximum number of tests running at the same time.
    #[arg(long, value_name = "N")]
    pub max_parallel_tasks: Option<usize>,

    /// Tag filter group (comma separated); may be repeated.
    #[arg(long = "filter-by-tags", value_name = "TAGS")]
    pub filter_by_tags: Vec<String>,

    /// Keep tests without tags when filtering.
    #[arg(long = "filter-by-tags-include-empty")]
    pub filter_by_tags_include_empty: bool,

    /// Accept `key:val` filters for tests lacking the key.
    #[arg(long = "filter-by-tags-include-empty-key")]
    pub filter_by_tags_include_empty_key: bool,

    /// JSON file with the variants to run every test with.
    #[arg(long, value_name = "PATH")]
    pub variants_file: Option<PathBuf>,

    /// `key=value` parameter exposed to every test; may be repeated.
    #[arg(short = 'p', long = "test-parameter", value_name = "KEY=VALUE")]
    pub test_parameters: Vec<String>,
}

impl RunOptions {
    /// Dotted-key overrides for the options given on the command line.
    pub fn overrides(&self) -> Result<ConfigDict> {
        let mut out = ConfigDict::new();
        if let Some(dir) = &self.job_results_dir {
            out.insert("datadir.logs_dir".into(), json!(dir));
        }
        if let Some(v) = self.failfast {
            out.insert("run.failfast".into(), json!(v.is_on()));
        }
        if let Some(order) = self.execution_order {
            out.insert("run.execution_order".into(), json!(order.to_string()));
        }
        if let Some(v) = self.sysinfo {
            out.insert("run.sysinfo".into(), json!(v.is_on()));
        }
        if self.keep_tmp {
            out.insert("run.keep_tmp".into(), json!(true));
        }
        if self.dry_run {
            out.insert("run.dry_run".into(), json!(true));
        }
        if let Some(v) = self.ignore_missing_references {
            out.insert("run.ignore_missing_references".into(), json!(v.is_on()));
        }
        if let Some(secs) = self.timeout {
            out.insert("task.timeout".into(), json!(secs));
        }
        if let Some(secs) = self.job_timeout {
            out.insert("run.job_timeout".into(), json!(secs));
        }
        if let Some(n) = self.max_parallel_tasks {
            out.insert("scheduler.max_running_tasks".into(), json!(n));
        }
        if !self.filter_by_tags.is_empty() {
            out.insert("run.tags".into(), json!(self.filter_by_tags));
        }
        if self.filter_by_tags_include_empty {
            out.insert("run.tags_include_empty".into(), json!(true));
        }
        if self.filter_by_tags_include_empty_key {
            out.insert("run.tags_include_empty_key".into(), json!(true));
        }
        if let Some(path) = &self.variants_file {
            out.insert("run.variants_file".into(), json!(path));
        }
        if !self.test_parameters.is_empty() {
            let mut params = serde_json::Map::new();
            for item in &self.test_parameters {
                let (key, value) = item.split_once('=').ok_or_else(|| {
                    AvocadoError::Config(format!("test parameter without '=': {item}"))
                })?;
                params.insert(key.to_string(), Value::String(value.to_string()));
            }
            out.insert("run.test_parameters".into(), Value::Object(params));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Test references: executables, recipe files, `kind:uri` or directories.
    #[arg(value_name = "REFERENCE")]
    pub references: Vec<String>,

    #[command(flatten)]
    pub options: RunOptions,

    /// Replay a previous job (results dir, id file, `latest` or job id).
    #[arg(long, value_name = "JOB")]
    pub replay: Option<String>,

    /// Only re-run tests that previously ended with these statuses
    /// (comma separated).
    #[arg(long, value_name = "STATUSES", requires = "replay")]
    pub replay_test_status: Option<String>,

    /// Parts of the replayed job to ignore.
    #[arg(long, value_enum, value_delimiter = ',', requires = "replay")]
    pub replay_ignore: Vec<ReplayIgnore>,
}

impl RunArgs {
    /// Overrides including the references, when given.
    pub fn overrides(&self) -> Result<ConfigDict> {
        let mut out = self.options.overrides()?;
        if !self.references.is_empty() {
            out.insert("run.references".into(), json!(self.references));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Args)]
pub struct ReplayArgs {
    /// Job to replay (results dir, id file, `latest` or job id).
    #[arg(value_name = "JOB")]
    pub job: String,

    /// Only re-run tests that previously ended with these statuses
    /// (comma separated).
    #[arg(long, value_name = "STATUSES")]
    pub replay_test_status: Option<String>,

    /// Parts of the replayed job to ignore.
    #[arg(long, value_enum, value_delimiter = ',')]
    pub replay_ignore: Vec<ReplayIgnore>,

    #[command(flatten)]
    pub options: RunOptions,
}

#[derive(Debug, Clone, Args)]
pub struct ListArgs {
    #[arg(value_name = "REFERENCE")]
    pub references: Vec<String>,

    /// Tag filter group (comma separated); may be repeated.
    #[arg(long = "filter-by-tags", value_name = "TAGS")]
    pub filter_by_tags: Vec<String>,

    #[arg(long = "filter-by-tags-include-empty")]
    pub filter_by_tags_include_empty: bool,

    #[arg(long = "filter-by-tags-include-empty-key")]
    pub filter_by_tags_include_empty_key: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum JobsCommand {
    /// List every job under the results directory.
    List {
        #[arg(long, value_name = "DIR")]
        job_results_dir: Option<PathBuf>,
    },
    /// Show one job and its test results.
    Show {
        /// Results dir, id file, `latest` or job id.
        #[arg(value_name = "JOB")]
        job: String,
        #[arg(long, value_name = "DIR")]
        job_results_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct DiffArgs {
    #[arg(value_name = "JOB1")]
    pub job1: String,

    #[arg(value_name = "JOB2")]
    pub job2: String,

    /// Sections to compare: all, cmdline, time, variants, results, config,
    /// sysinfo; prefix with `-` to exclude.
    #[arg(long, value_name = "FILTER", default_value = "all")]
    pub diff_filter: String,

    #[arg(long, value_name = "DIR")]
    pub job_results_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigCommand {
    /// Every configuration key with its default and description.
    Reference,
}

#[derive(Debug, Clone, Args)]
pub struct RunnableRunArgs {
    /// Runnable recipe (JSON) to run instead of `-k/-u/-a`.
    #[arg(long, value_name = "PATH", conflicts_with = "kind")]
    pub recipe: Option<PathBuf>,

    #[command(flatten)]
    pub runnable: RunnableSpec,
}

#[derive(Debug, Clone, Args)]
pub struct TaskRunArgs {
    /// Task identifier stamped on every status message.
    #[arg(short = 'i', long, value_name = "ID")]
    pub identifier: String,

    #[arg(long, value_name = "JOB_ID")]
    pub job_id: Option<String>,

    #[command(flatten)]
    pub runnable: RunnableSpec,
}

/// A runnable spelled out on the command line.
#[derive(Debug, Clone, Default, Args)]
pub struct RunnableSpec {
    #[arg(short = 'k', long, value_name = "KIND")]
    pub kind: Option<String>,

    #[arg(short = 'u', long, value_name = "URI")]
    pub uri: Option<String>,

    /// Positional argument of the runnable; may be repeated.
    #[arg(short = 'a', long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// `key=value` keyword arguments (`key=json:<value>` for JSON).
    #[arg(value_name = "KEY=VALUE")]
    pub kwargs: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct TaskRunRecipeArgs {
    /// `exec-test` exit code that means SKIP; may be repeated.
    #[arg(long = "skip-code", value_name = "CODE", allow_negative_numbers = true)]
    pub skip_codes: Vec<i32>,

    /// Keep the task work directory.
    #[arg(long)]
    pub keep_tmp: bool,

    /// Task recipe (JSON) written by the spawner.
    #[arg(value_name = "RECIPE")]
    pub recipe: PathBuf,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_become_overrides() {
        let args = CliArgs::try_parse_from([
            "avocado",
            "run",
            "a.sh",
            "b.sh",
            "--failfast",
            "on",
            "--execution-order",
            "tests-per-variant",
            "--timeout",
            "1.5",
            "-p",
            "speed=fast",
        ])
        .unwrap();
        let Command::Run(run) = args.command else {
            panic!("expected run");
        };
        let overrides = run.overrides().unwrap();
        assert_eq!(overrides["run.references"], json!(["a.sh", "b.sh"]));
        assert_eq!(overrides["run.failfast"], json!(true));
        assert_eq!(overrides["run.execution_order"], json!("tests-per-variant"));
        assert_eq!(overrides["task.timeout"], json!(1.5));
        assert_eq!(overrides["run.test_parameters"], json!({"speed": "fast"}));
        assert!(!overrides.contains_key("run.sysinfo"));
    }

    #[test]
    fn replay_flags_require_replay() {
        assert!(CliArgs::try_parse_from(["avocado", "run", "--replay-test-status", "FAIL"]).is_err());
        let args = CliArgs::try_parse_from([
            "avocado",
            "run",
            "--replay",
            "latest",
            "--replay-test-status",
            "FAIL",
            "--replay-ignore",
            "variants,config",
        ])
        .unwrap();
        let Command::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.replay.as_deref(), Some("latest"));
        assert_eq!(run.replay_ignore, vec![ReplayIgnore::Variants, ReplayIgnore::Config]);
    }

    #[test]
    fn runner_subcommands_parse() {
        let args = CliArgs::try_parse_from([
            "avocado",
            "task-run-recipe",
            "--skip-code",
            "2",
            "--skip-code",
            "77",
            "--keep-tmp",
            "/r/task.json",
        ])
        .unwrap();
        assert!(args.command.is_runner());
        let Command::TaskRunRecipe(recipe) = args.command else {
            panic!("expected task-run-recipe");
        };
        assert_eq!(recipe.skip_codes, vec![2, 77]);
        assert!(recipe.keep_tmp);

        let args = CliArgs::try_parse_from([
            "avocado", "task-run", "-i", "1-x", "-k", "exec", "-u", "/bin/echo", "-a", "hi",
            "MODE=fast",
        ])
        .unwrap();
        let Command::TaskRun(task) = args.command else {
            panic!("expected task-run");
        };
        assert_eq!(task.identifier, "1-x");
        assert_eq!(task.runnable.args, vec!["hi"]);
        assert_eq!(task.runnable.kwargs, vec!["MODE=fast"]);
    }
}

//! sumac: copies Harvest time entries into Redmine and keeps the two in line.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::{error, info};
use serde::Serialize;
use sumac_api::{HarvestClient, RedmineClient};

pub mod commands;
pub mod config;
pub mod duplicates;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod model;
pub mod notify;
pub mod project_map;
pub mod reference;
pub mod report;
pub mod spelling;
pub mod text;
pub mod tracker;
pub mod unattended;
pub mod user_map;

#[cfg(test)]
mod testing;

use config::{ConfigManager, Settings};
use error::{ConfigError, Result};
use model::DateRange;
use notify::{Notifier, SlackNotifier};

/// Harvest to Redmine time sync
#[derive(Parser, Debug)]
#[command(name = "sumac")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (defaults to the platform config dir, then ./config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Copy Harvest entries into Redmine
    Sync(SyncArgs),

    /// List Harvest entries copied into Redmine more than once
    FindDuplicates(ScanArgs),

    /// Delete all but the newest copy of each duplicated entry
    RemoveDuplicates {
        /// Groups as printed by find-duplicates; computed when omitted
        ids_json: Option<String>,
    },

    /// List Redmine entries whose Harvest entry no longer exists
    FindOrphans(ScanArgs),

    /// Show a Harvest entry and the Redmine entries carrying it
    CheckSourceId {
        id: u64,
        /// Days searched for Redmine copies (defaults to the entry's own day)
        #[arg(long)]
        range: Option<DateRange>,
    },

    /// List Redmine issues opened from outside the team that nobody on it has answered
    FindUnattendedTasks {
        /// YYYYMMDD, YYYY-MM-DD or FROM:TO; defaults to today
        range: Option<DateRange>,

        /// Post the list to the team channel
        #[arg(long)]
        notify: bool,
    },

    /// Write a default config file
    InitConfig,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// YYYYMMDD, YYYY-MM-DD or FROM:TO; defaults to today
    pub range: Option<DateRange>,

    /// Rewrite entries that already exist in Redmine
    #[arg(long)]
    pub update: bool,

    /// Decide everything but write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Reject entries from Harvest projects not linked to Redmine
    #[arg(long)]
    pub strict: bool,

    /// Message affected users with their problems
    #[arg(long)]
    pub notify: bool,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Print target entry ids only
    #[arg(long)]
    pub short: bool,

    /// Limit the scan to these days (YYYYMMDD or FROM:TO)
    #[arg(long)]
    pub range: Option<DateRange>,
}

/// Initialises env_logger with `info` as the default filter.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

/// Loads `.env`, sets up logging, runs the command. Exit status 2 on fatal errors, 1 when the
/// command recorded problems.
pub async fn run(cli: Cli) -> ExitCode {
    let _ = dotenvy::dotenv();
    init_logging();

    match execute(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{}", text::redact_log_details(&err.to_string()));
            ExitCode::from(2)
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    if let Commands::InitConfig = cli.command {
        let manager = match cli.config {
            Some(path) => ConfigManager::at(path),
            None => ConfigManager::platform()?,
        };
        commands::init_config(manager.path())?;
        info!("Wrote {}", manager.path().display());
        return Ok(ExitCode::SUCCESS);
    }

    let manager = ConfigManager::locate(cli.config);
    let settings = manager.load_with_env(|key| std::env::var(key).ok())?;
    let source = HarvestClient::new(settings.harvest_config())?;
    let target = RedmineClient::new(settings.redmine_config())?;
    let field_id = settings.fields.time_entry_source_id;

    match cli.command {
        Commands::Sync(args) => sync(&source, &target, &settings, args).await,
        Commands::FindDuplicates(args) => {
            let groups = commands::find_duplicates(&target, field_id, args.range).await?;
            if args.short {
                print_json(&duplicates::plan_removal(&groups))?;
            } else {
                print_json(&groups)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::RemoveDuplicates { ids_json } => {
            let groups = ids_json.as_deref().map(commands::parse_groups).transpose()?;
            let report = commands::remove_duplicate_entries(&target, field_id, groups).await?;
            for problem in &report.problems {
                error!("{}", problem.format());
            }
            println!(
                "{} removed, {} already gone, {} failed",
                report.outcome.removed.len(),
                report.outcome.missing.len(),
                report.outcome.failed.len()
            );
            Ok(exit_code(report.problems.is_empty()))
        }
        Commands::FindOrphans(args) => {
            let orphans = commands::find_orphans(&source, &target, field_id, args.range).await?;
            if args.short {
                let ids: Vec<u64> = orphans.iter().map(|orphan| orphan.target_id).collect();
                print_json(&ids)?;
            } else {
                print_json(&orphans)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckSourceId { id, range } => {
            let Some(entry) = commands::check_source_id(&source, id).await? else {
                println!("Harvest entry {} does not exist", id);
                return Ok(ExitCode::from(1));
            };
            print_json(&entry)?;
            let range = range.unwrap_or_else(|| DateRange::single(entry.spent_on));
            let copies = commands::target_entries_for(&target, field_id, id, range).await?;
            println!("Redmine time entries: {:?}", copies);
            Ok(ExitCode::SUCCESS)
        }
        Commands::FindUnattendedTasks { range, notify } => {
            let range = range.unwrap_or_else(DateRange::today);
            unattended_tasks(&target, &settings, range, notify).await
        }
        Commands::InitConfig => Ok(ExitCode::SUCCESS),
    }
}

async fn unattended_tasks(
    target: &RedmineClient,
    settings: &Settings,
    range: DateRange,
    notify: bool,
) -> Result<ExitCode> {
    let slack = if notify {
        let webhook = settings
            .auth
            .slack
            .notify_webhook_url
            .clone()
            .ok_or(ConfigError::Missing("auth.slack.notify_webhook_url"))?;
        Some(SlackNotifier::new(
            webhook,
            settings.auth.slack.debug_user.clone(),
            settings.http.timeout(),
        )?)
    } else {
        None
    };
    let notifier = slack.as_ref().map(|slack| slack as &dyn Notifier);

    let issues = commands::find_unattended_tasks(target, settings, range, notifier).await?;
    print_json(&issues)?;
    Ok(ExitCode::SUCCESS)
}

async fn sync(
    source: &HarvestClient,
    target: &RedmineClient,
    settings: &Settings,
    args: SyncArgs,
) -> Result<ExitCode> {
    let mut options = settings.sync_options(args.range.unwrap_or_else(DateRange::today));
    options.update = args.update;
    options.dry_run = args.dry_run;
    options.strict |= args.strict;

    let slack = if args.notify {
        let webhook = settings
            .auth
            .slack
            .webhook_url
            .clone()
            .ok_or(ConfigError::Missing("auth.slack.webhook_url"))?;
        Some(SlackNotifier::new(
            webhook,
            settings.auth.slack.debug_user.clone(),
            settings.http.timeout(),
        )?)
    } else {
        None
    };
    let notifier = slack.as_ref().map(|slack| slack as &dyn Notifier);

    if options.dry_run {
        info!("Dry run: nothing will be written to Redmine");
    }
    let report = commands::sync(source, target, settings, &options, notifier).await?;
    println!("{}", report.render_table());
    Ok(exit_code(!report.has_errors()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::from)?;
    println!("{}", json);
    Ok(())
}

fn exit_code(clean: bool) -> ExitCode {
    if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_sync_flags_and_range() {
        let cli = Cli::try_parse_from([
            "sumac", "sync", "20240301:20240305", "--update", "--dry-run", "--notify",
        ])
        .expect("valid arguments");
        let Commands::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert!(args.update && args.dry_run && args.notify && !args.strict);
        let range = args.range.expect("range given");
        assert_eq!(range.to.to_string(), "2024-03-05");
    }

    #[test]
    fn rejects_malformed_dates() {
        assert!(Cli::try_parse_from(["sumac", "sync", "March"]).is_err());
    }

    #[test]
    fn unattended_tasks_default_to_today_without_notifying() {
        let cli = Cli::try_parse_from(["sumac", "find-unattended-tasks"]).expect("valid arguments");
        assert!(matches!(
            cli.command,
            Commands::FindUnattendedTasks {
                range: None,
                notify: false
            }
        ));

        let cli = Cli::try_parse_from(["sumac", "find-unattended-tasks", "20240301:20240305", "--notify"])
            .expect("valid arguments");
        let Commands::FindUnattendedTasks { range, notify } = cli.command else {
            panic!("expected find-unattended-tasks");
        };
        assert!(notify);
        assert_eq!(range.map(|range| range.from.to_string()).as_deref(), Some("2024-03-01"));
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["sumac", "find-duplicates", "--short", "--config", "/tmp/c.json"])
            .expect("valid arguments");
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
        assert!(matches!(cli.command, Commands::FindDuplicates(ScanArgs { short: true, .. })));
    }
}

use std::io;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::discovery::{DiscoveryContext, InventoryDiscovery};
use crate::engine::{AuditRun, Engine, EngineOptions};
use crate::ui::UiConfig;

#[derive(Debug, Parser)]
#[command(
    name = "cloudaudit",
    version,
    about = "クラウド環境のリソースをチェックカタログで監査し、復旧準備と健全性スコアをレポートする"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Audit an inventory and write the JSON and CSV reports.
    Run(RunArgs),
    /// Audit an inventory and print the report to stdout.
    Report(ReportArgs),
    /// List the check catalog.
    Checks,
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct InventoryArgs {
    /// Inventory snapshot (JSON).
    #[arg(long)]
    pub inventory: PathBuf,
    /// Audit clock (RFC 3339). Defaults to the current time.
    #[arg(long)]
    pub now: Option<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: InventoryArgs,
    #[arg(long, default_value = ".")]
    pub out: PathBuf,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[command(flatten)]
    pub input: InventoryArgs,
    #[arg(long)]
    pub markdown: bool,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = home_dir()?;
    let env_config_path = std::env::var_os("CLOUDAUDIT_CONFIG").map(PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;
    tracing::debug!(config_path = ?cfg.config_path, "configuration loaded");

    let ui_cfg = UiConfig {
        color: stdout_is_tty && cfg.ui.color && !cli.no_color,
        stdout_is_tty,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };
    let show_progress = ui_cfg.stderr_is_tty && !cli.quiet && !cli.json;

    match cli.command {
        Commands::Run(args) => {
            let run = audit(&args.input, &cfg.audit, show_progress)?;
            crate::engine::write_outputs(&run.report, &args.out)?;
            tracing::info!(out = %args.out.display(), "reports written");
            if cli.json {
                crate::export::write_json_stdout(&run.report)?;
            } else {
                crate::ui::print_summary(&run.report, &ui_cfg, Some(&args.out));
            }
        }
        Commands::Report(args) => {
            let run = audit(&args.input, &cfg.audit, show_progress)?;
            if cli.json {
                crate::export::write_json_stdout(&run.report)?;
            } else if args.markdown {
                let md = crate::export::format_markdown_summary(&run.report);
                crate::export::write_stdout(md.as_bytes())?;
            } else {
                crate::ui::print_summary(&run.report, &ui_cfg, None);
            }
        }
        Commands::Checks => {
            if cli.json {
                let buf = serde_json::to_vec_pretty(crate::rules::CATALOG)?;
                crate::export::write_stdout(&buf)?;
                crate::export::write_stdout(b"\n")?;
            } else {
                crate::ui::print_checks(crate::rules::CATALOG, &ui_cfg);
            }
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "cloudaudit", &mut out);
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    let buf = serde_json::to_vec_pretty(&cfg)?;
                    crate::export::write_stdout(&buf)?;
                    crate::export::write_stdout(b"\n")?;
                } else {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: `cloudaudit config --show` を使用してください");
            }
        }
    }

    Ok(())
}

fn audit(
    input: &InventoryArgs,
    config: &crate::config::AuditConfig,
    show_progress: bool,
) -> Result<AuditRun> {
    let now = parse_now(input.now.as_deref())?;
    let source = load_inventory(&input.inventory)?;
    let engine = Engine::new(
        EngineOptions { now, show_progress },
        config.clone(),
        DiscoveryContext::new(Box::new(source)),
    )
    .map_err(crate::exit::invalid_args_err)?;
    engine.run()
}

fn load_inventory(path: &Path) -> Result<InventoryDiscovery> {
    let source = InventoryDiscovery::load(path).map_err(crate::exit::invalid_args_err)?;
    tracing::debug!(
        path = %path.display(),
        resources = source.inventory().resources.len(),
        "inventory loaded"
    );
    Ok(source)
}

fn parse_now(s: Option<&str>) -> Result<OffsetDateTime> {
    let Some(s) = s else {
        return Ok(OffsetDateTime::now_utc());
    };
    OffsetDateTime::parse(s.trim(), &Rfc3339).map_err(|err| {
        crate::exit::invalid_args(format!(
            "--now は RFC 3339 形式で指定してください: {s}（{err}）"
        ))
    })
}

/// `RUST_LOG` wins over the level picked from `--verbose`/`--quiet`.
fn init_tracing(verbose: bool, quiet: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("環境変数 HOME が設定されていません"))
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "未対応のシェルです: {other}（bash|zsh|fish を指定してください）"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn now_accepts_rfc3339_and_rejects_other_formats() {
        assert_eq!(
            parse_now(Some("2024-06-10T12:00:00Z")).expect("parse"),
            datetime!(2024-06-10 12:00 UTC)
        );
        let err = parse_now(Some("2024-06-10 12:00")).unwrap_err();
        assert_eq!(crate::exit::exit_code(&err), 2);
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn unknown_shell_is_invalid_args() {
        let err = parse_shell("powershell-ish").unwrap_err();
        assert_eq!(crate::exit::exit_code(&err), 2);
        assert!(matches!(parse_shell(" ZSH "), Ok(clap_complete::Shell::Zsh)));
    }
}

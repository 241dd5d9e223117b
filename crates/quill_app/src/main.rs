mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use quill_core::config::QuillConfig;
use quill_core::{ErrorCategory, classify_error, logging};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

use commands::{MergeArgs, RuleArgs};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "quill", version)]
#[command(about = "Fill a Word template once per spreadsheet row")]
struct Cli {
    /// Config file (default: ~/.quill/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for the merge crates
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a template's paragraphs and tables with formatting markers
    Preview {
        /// Word template (.docx)
        template: PathBuf,
    },
    /// Show the columns and first rows of a data file
    Inspect {
        /// Data file (.xlsx, .xlsm, .xls, .ods, .csv)
        data: PathBuf,
        /// Worksheet name (default: first sheet)
        #[arg(long)]
        sheet: Option<String>,
        /// Number of rows to show (default from config)
        #[arg(long)]
        rows: Option<usize>,
    },
    /// Check or export replacement rules
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
    /// Render one document per data row
    Merge(MergeArgs),
}

#[derive(Subcommand)]
enum RulesCommand {
    /// Verify rule columns against a data file and count keyword hits
    Check {
        #[command(flatten)]
        rules: RuleArgs,
        #[arg(long)]
        template: PathBuf,
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        sheet: Option<String>,
    },
    /// Write the rules as JSON
    Export {
        #[command(flatten)]
        rules: RuleArgs,
        #[arg(long)]
        out: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<QuillConfig> {
    match path {
        Some(path) => QuillConfig::load_from_path(path),
        None => QuillConfig::load(),
    }
}

fn run(cli: Cli, config: &QuillConfig) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    match cli.command {
        Commands::Preview { template } => commands::preview(&template, &mut stdout),
        Commands::Inspect { data, sheet, rows } => {
            commands::inspect(&data, sheet.as_deref(), rows, config, &mut stdout)
        }
        Commands::Rules { command } => match command {
            RulesCommand::Check {
                rules,
                template,
                data,
                sheet,
            } => commands::rules_check(
                &rules,
                &template,
                &data,
                sheet.as_deref(),
                config,
                &mut stdout,
            ),
            RulesCommand::Export { rules, out } => {
                commands::rules_export(&rules, &out, config, &mut stdout)
            }
        },
        Commands::Merge(args) => commands::merge(&args, config, &mut stdout),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let filter = logging::default_filter(&config.log_level, cli.verbose);
    let _log_guard = match logging::init_logging(&filter) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: file logging disabled: {e:#}");
            None
        }
    };
    info!("Starting quill v{VERSION}");

    match run(cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let classified = classify_error(&e);
            match classified.category {
                ErrorCategory::Row => warn!("{}", classified.message),
                _ => error!("{e:#}"),
            }
            eprintln!("error: {}", classified.user_message);
            eprintln!("  {}", classified.message);
            match classified.category {
                ErrorCategory::Input => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_requires_an_output() {
        let result = Cli::try_parse_from([
            "quill", "merge", "--template", "t.docx", "--data", "d.csv",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_rejects_both_outputs() {
        let result = Cli::try_parse_from([
            "quill", "merge", "--template", "t.docx", "--data", "d.csv", "--out", "a.zip",
            "--out-dir", "out",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_collects_repeated_rules() {
        let cli = Cli::try_parse_from([
            "quill",
            "--verbose",
            "merge",
            "--template",
            "t.docx",
            "--data",
            "d.xlsx",
            "--rule",
            "[NAME]=Name",
            "--rule",
            "{city}=City",
            "--scope",
            "brackets",
            "--rows",
            "2-5",
            "--out",
            "merged.zip",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Merge(args) = cli.command else {
            panic!("expected merge");
        };
        assert_eq!(args.rules.rule, vec!["[NAME]=Name", "{city}=City"]);
        assert_eq!(args.rules.scope.as_deref(), Some("brackets"));
        assert_eq!(args.rows.as_deref(), Some("2-5"));
        assert_eq!(args.out, Some(PathBuf::from("merged.zip")));
    }

    #[test]
    fn test_rules_subcommands_parse() {
        let cli = Cli::try_parse_from([
            "quill", "rules", "export", "--rule", "a=b", "--out", "rules.json",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Rules {
                command: RulesCommand::Export { .. }
            }
        ));
    }

    #[test]
    fn test_config_flag_is_global() {
        let cli = Cli::try_parse_from(["quill", "preview", "t.docx", "--config", "c.json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.json")));
    }
}

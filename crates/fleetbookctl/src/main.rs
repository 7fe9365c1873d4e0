mod config;

use anyhow::{Context as AnyhowContext, Result};
use clap::{Arg, ArgMatches, Command, CommandFactory, FromArgMatches, Parser, Subcommand};
use config::Config;
use fleetbook_engine::{
    BuiltinValidator, DdlDirectory, HttpRpcClient, InputSet, OptionDescriptor, Playbook, PlaybookContext,
    PlaybookDefinition, Services,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const LOG_LEVELS: [&str; 5] = ["debug", "info", "warn", "error", "fatal"];

/// Flags the runner itself owns; inputs with these names are not exposed.
const RESERVED_FLAGS: [&str; 7] = ["help", "version", "loglevel", "verbose", "rpc-url", "ddl-path", "report"];

#[derive(Parser)]
#[command(name = "fleetbook")]
#[command(version, about = "Fleetbook Playbook Runner", long_about = None)]
#[command(after_help = "Passing --help after a PLAYBOOK shows the inputs of that playbook.\n\
Inputs to the playbook are given as flags, for example --cluster alpha.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the loglevel set in the playbook (debug, info, warn, error, fatal)
    #[arg(long, global = true, value_name = "LEVEL", value_parser = LOG_LEVELS)]
    loglevel: Option<String>,

    /// Log at debug level unless --loglevel is given
    #[arg(short, long, global = true)]
    verbose: bool,

    /// RPC gateway URL (overrides config and FLEETBOOK_RPC_URL)
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// Colon separated agent descriptor directories
    #[arg(long, global = true, value_name = "PATHS")]
    ddl_path: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Preview the playbook
    Show {
        /// Playbook YAML file
        #[arg(value_name = "PLAYBOOK")]
        playbook: PathBuf,
    },
    /// Run the playbook
    Run {
        /// Playbook YAML file
        #[arg(value_name = "PLAYBOOK")]
        playbook: PathBuf,

        /// File to store the report in
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },
}

/// First argument that looks like a playbook file.
fn find_playbook_arg(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .skip(1)
        .find(|a| a.ends_with(".yaml") || a.ends_with(".yml"))
        .map(PathBuf::from)
}

fn input_arg_id(name: &str) -> String {
    format!("input:{}", name)
}

/// Load input option descriptors from a playbook, ignoring unreadable files
/// so the real load reports the error.
fn playbook_options(path: &Path, set_required: bool) -> Vec<OptionDescriptor> {
    match PlaybookDefinition::from_file(path) {
        Ok(definition) => InputSet::from_declaration(
            PlaybookContext::new(definition.name()),
            Arc::new(BuiltinValidator::new()),
            &definition.inputs,
        )
        .option_descriptors(set_required),
        Err(_) => Vec::new(),
    }
}

/// Playbook inputs exposed as flags, and the inputs left out because their
/// flag belongs to the runner.
struct InputArgs {
    options: Vec<OptionDescriptor>,
    clashes: Vec<String>,
}

impl InputArgs {
    /// Log the left out inputs; call once tracing is initialised.
    fn warn_clashes(&self) {
        for input in &self.clashes {
            tracing::warn!(input = %input, "Input clashes with a runner flag and cannot be set from the command line");
        }
    }
}

fn add_input_args(mut cmd: Command, options: &[OptionDescriptor], clashes: &mut Vec<String>) -> Command {
    for option in options {
        let long = option.flag.trim_start_matches('-').to_string();
        if RESERVED_FLAGS.contains(&long.as_str()) || cmd.get_arguments().any(|a| a.get_long() == Some(long.as_str())) {
            clashes.push(option.name.clone());
            continue;
        }

        let required = option.required.unwrap_or(false) && option.default.as_ref().map_or(true, Value::is_null);

        cmd = cmd.arg(
            Arg::new(input_arg_id(&option.name))
                .long(long)
                .value_name(option.value_name.clone())
                .help(option.description.clone())
                .help_heading("Playbook Inputs")
                .required(required),
        );
    }
    cmd
}

fn build_command(args: &[String]) -> (Command, InputArgs) {
    let mut cmd = Cli::command();
    let mut inputs = InputArgs {
        options: Vec::new(),
        clashes: Vec::new(),
    };

    if let Some(path) = find_playbook_arg(args) {
        let running = args.iter().any(|a| a == "run");
        let options = playbook_options(&path, running);

        let subcommand = if running { "run" } else { "show" };
        let mut clashes = Vec::new();
        cmd = cmd.mut_subcommand(subcommand, |sub| add_input_args(sub, &options, &mut clashes));

        inputs.options = options
            .into_iter()
            .filter(|option| !clashes.contains(&option.name))
            .collect();
        inputs.clashes = clashes;
    }

    (cmd, inputs)
}

fn input_values(matches: &ArgMatches, inputs: &InputArgs) -> HashMap<String, Value> {
    let Some((_, sub)) = matches.subcommand() else {
        return HashMap::new();
    };

    inputs
        .options
        .iter()
        .filter_map(|option| {
            sub.try_get_one::<String>(&input_arg_id(&option.name))
                .ok()
                .flatten()
                .map(|value| (option.name.clone(), Value::String(value.clone())))
        })
        .collect()
}

/// Map a playbook log level to a tracing filter directive.
fn filter_directive(level: &str) -> &'static str {
    match level {
        "debug" => "debug",
        "warn" => "warn",
        "error" | "fatal" => "error",
        _ => "info",
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(level))),
        )
        .with_target(false)
        .init();
}

fn effective_level(cli: &Cli, playbook_level: Option<&str>) -> String {
    match (&cli.loglevel, cli.verbose, playbook_level) {
        (Some(level), _, _) => level.clone(),
        (None, true, _) => "debug".to_string(),
        (None, false, Some(level)) => level.to_string(),
        (None, false, None) => "info".to_string(),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load()?;

    if let Some(url) = &cli.rpc_url {
        config.rpc_url = url.clone();
    }
    if let Some(paths) = &cli.ddl_path {
        config.ddl_paths = config::split_paths(paths);
    }

    Ok(config)
}

fn services(config: &Config) -> Services {
    let rpc = Arc::new(HttpRpcClient::new(&config.rpc_url, config.rpc_timeout()));
    let ddl = Arc::new(DdlDirectory::new(config.ddl_paths.clone()));
    Services::new(rpc, ddl)
}

fn show_command(cli: &Cli, path: &Path, inputs: &InputArgs) -> Result<bool> {
    let definition = PlaybookDefinition::from_file(path)
        .with_context(|| format!("Cannot load playbook {}", path.display()))?;
    init_tracing(&effective_level(cli, Some(&definition.metadata.loglevel)));
    inputs.warn_clashes();

    let rendered = serde_yaml::to_string(definition.raw()).context("Failed to render playbook")?;
    print!("{}", rendered);
    Ok(true)
}

async fn run_command(
    cli: &Cli,
    path: &Path,
    report: Option<&Path>,
    inputs: &InputArgs,
    values: &HashMap<String, Value>,
) -> Result<bool> {
    let config = load_config(cli)?;
    let mut playbook = Playbook::from_file(path, services(&config))
        .with_context(|| format!("Cannot load playbook {}", path.display()))?;

    init_tracing(&effective_level(cli, Some(playbook.log_level())));
    inputs.warn_clashes();
    tracing::debug!(
        rpc_url = %config.rpc_url,
        rpc_timeout = config.rpc_timeout,
        ddl_paths = ?config.ddl_paths,
        "Configuration loaded"
    );

    let success = playbook.run(values).await;

    if let Some(report_path) = report {
        playbook
            .report()
            .write_to(report_path)
            .with_context(|| format!("Failed to write report to {}", report_path.display()))?;
        tracing::info!(path = %report_path.display(), "Report written");
    }

    Ok(success)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let (cmd, inputs) = build_command(&args);
    let matches = cmd.get_matches_from(&args);
    let cli = Cli::from_arg_matches(&matches)?;
    let values = input_values(&matches, &inputs);

    let success = match &cli.command {
        Commands::Show { playbook } => show_command(&cli, playbook, &inputs)?,
        Commands::Run { playbook, report } => {
            run_command(&cli, playbook, report.as_deref(), &inputs, &values).await?
        }
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

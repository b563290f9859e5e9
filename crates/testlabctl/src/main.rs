//! testlabctl - terminal console for the test management service
//!
//! Views test cases, runs them step by step while polling the server, edits
//! and reorders steps, and exports results.

mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use mimalloc::MiMalloc;
use testlab_console::{Client, ClientError, ExportError, TestCaseView, TestLabApi, ViewError};
use testlab_core::config::ConfigError;
use testlab_core::reorder::DropPosition;
use testlab_core::{Config, ConsoleEvent, TestCaseScope};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Terminal console for the test management service.
#[derive(Parser)]
#[command(name = "testlabctl")]
#[command(about = "Run, edit, and export test cases from the terminal")]
#[command(version)]
struct Cli {
    /// API base URL (overrides the config file)
    #[arg(long, global = true, env = "TESTLAB_BASE_URL")]
    base_url: Option<String>,

    /// Config file path (layered over the default config file)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Which project and module a command works in.
#[derive(Args, Debug, Clone)]
struct ModuleArgs {
    /// Project id (default: default_project from config)
    #[arg(long, env = "TESTLAB_PROJECT")]
    project: Option<String>,

    /// Module id (default: default_module from config)
    #[arg(long, env = "TESTLAB_MODULE")]
    module: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct CaseArgs {
    #[command(flatten)]
    module: ModuleArgs,

    /// Test case id
    test_case: String,
}

#[derive(Subcommand)]
enum Command {
    /// Show a test case and its steps
    Show {
        #[command(flatten)]
        case: CaseArgs,
    },

    /// List the test cases of a module
    Cases {
        #[command(flatten)]
        module: ModuleArgs,
    },

    /// Execute a test case and follow it until every step finishes
    Run {
        #[command(flatten)]
        case: CaseArgs,

        /// Export results when the run ends (default dir: export_dir from config)
        #[arg(long, num_args = 0..=1, value_name = "DIR")]
        export: Option<Option<PathBuf>>,
    },

    /// Add, remove, or move steps
    Steps {
        #[command(subcommand)]
        command: StepsCommand,
    },

    /// Inspect or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum StepsCommand {
    /// Append a step
    Add {
        #[command(flatten)]
        case: CaseArgs,

        /// What the step does
        description: String,

        /// Test data for the step
        #[arg(long)]
        data: Option<String>,
    },

    /// Delete a step
    Rm {
        #[command(flatten)]
        case: CaseArgs,

        step_id: String,
    },

    /// Move a step next to another one
    Mv {
        #[command(flatten)]
        case: CaseArgs,

        /// Step to move
        step_id: String,

        /// Step to drop it on
        target: String,

        /// Place before the target (default follows move direction)
        #[arg(long, conflicts_with = "after")]
        before: bool,

        /// Place after the target
        #[arg(long)]
        after: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print effective configuration
    Show,
    /// Print the default config file path
    Path,
    /// Persist the API base URL
    SetBaseUrl { url: String },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    View(#[from] ViewError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("no {0} given: pass --{0}, set TESTLAB_{1}, or set default_{0} in the config file")]
    MissingScope(&'static str, &'static str),
    #[error("run interrupted")]
    Interrupted,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = dispatch(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = load_config(cli.base_url.as_deref(), cli.config.as_deref())?;
    debug!(api_root = %config.api_root(), poll_ms = config.poll_interval_ms, "config loaded");

    match cli.command {
        Command::Show { case } => run_show(&config, &case).await,
        Command::Cases { module } => run_cases(&config, &module).await,
        Command::Run { case, export } => run_run(&config, &case, export).await,
        Command::Steps { command } => run_steps(&config, command).await,
        Command::Config { command } => run_config(&config, cli.config.as_deref(), command),
    }
}

fn load_config(base_url: Option<&str>, path: Option<&Path>) -> Result<Config, CliError> {
    let mut config = Config::load(path)?;
    if let Some(url) = base_url {
        config.base_url = url.trim_end_matches('/').to_string();
    }
    Ok(config)
}

fn resolve_module(args: &ModuleArgs, config: &Config) -> Result<(String, String), CliError> {
    let project = args
        .project
        .clone()
        .or_else(|| config.default_project.clone())
        .ok_or(CliError::MissingScope("project", "PROJECT"))?;
    let module = args
        .module
        .clone()
        .or_else(|| config.default_module.clone())
        .ok_or(CliError::MissingScope("module", "MODULE"))?;
    Ok((project, module))
}

fn resolve_scope(args: &CaseArgs, config: &Config) -> Result<TestCaseScope, CliError> {
    let (project, module) = resolve_module(&args.module, config)?;
    Ok(TestCaseScope::new(project, module, args.test_case.clone()))
}

fn api(config: &Config) -> Result<Arc<dyn TestLabApi>, CliError> {
    let client: Arc<dyn TestLabApi> = Arc::new(Client::from_config(config)?);
    Ok(client)
}

async fn open_view(config: &Config, args: &CaseArgs) -> Result<TestCaseView, CliError> {
    let scope = resolve_scope(args, config)?;
    Ok(TestCaseView::open(api(config)?, scope, config.poll_interval()).await?)
}

async fn run_show(config: &Config, args: &CaseArgs) -> Result<(), CliError> {
    let scope = resolve_scope(args, config)?;
    let mut test_case = api(config)?.get_test_case(&scope).await?;
    test_case.sort_steps();
    render::print_case(&test_case);
    Ok(())
}

async fn run_cases(config: &Config, args: &ModuleArgs) -> Result<(), CliError> {
    let (project, module) = resolve_module(args, config)?;
    let cases = api(config)?.list_test_cases(&project, &module).await?;
    render::print_case_list(&cases);
    Ok(())
}

async fn run_run(
    config: &Config,
    args: &CaseArgs,
    export: Option<Option<PathBuf>>,
) -> Result<(), CliError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut view = open_view(config, args).await?.with_observer(tx);

    let result = drive_run(&mut view, &mut rx).await;
    drain_events(&mut rx);
    result?;

    render::print_run_summary(view.test_case(), view.progress());

    if let Some(dir) = export {
        let dir = dir.unwrap_or_else(|| config.export_dir.clone());
        let outcome = view.export(&dir).await?;
        render::print_export(&outcome);
    }
    Ok(())
}

/// Start the run and step it to the end, rendering events as they arrive.
async fn drive_run(
    view: &mut TestCaseView,
    events: &mut mpsc::UnboundedReceiver<ConsoleEvent>,
) -> Result<(), CliError> {
    view.start_run().await?;
    drain_events(events);

    while view.is_executing() {
        let interrupted = tokio::select! {
            result = view.step() => {
                result?;
                false
            }
            _ = tokio::signal::ctrl_c() => true,
        };
        if interrupted {
            debug!(test_case = %view.scope(), "interrupt received");
            view.teardown();
            return Err(CliError::Interrupted);
        }
        drain_events(events);
    }
    Ok(())
}

fn drain_events(events: &mut mpsc::UnboundedReceiver<ConsoleEvent>) {
    while let Ok(event) = events.try_recv() {
        debug!(event = event.event_type().as_str(), "console event");
        render::print_event(&event);
    }
}

async fn run_steps(config: &Config, command: StepsCommand) -> Result<(), CliError> {
    match command {
        StepsCommand::Add {
            case,
            description,
            data,
        } => {
            let mut view = open_view(config, &case).await?;
            let step = view.add_step(&description, data.as_deref()).await?;
            render::print_step_created(&step);
            println!();
            render::print_steps(&view.test_case().test_steps);
        }
        StepsCommand::Rm { case, step_id } => {
            let mut view = open_view(config, &case).await?;
            view.delete_step(&step_id).await?;
            println!("Deleted step: {step_id}");
            println!();
            render::print_steps(&view.test_case().test_steps);
        }
        StepsCommand::Mv {
            case,
            step_id,
            target,
            before,
            after,
        } => {
            let position = match (before, after) {
                (true, _) => Some(DropPosition::Before),
                (_, true) => Some(DropPosition::After),
                _ => None,
            };
            let mut view = open_view(config, &case).await?;
            let report = view.reorder(&step_id, &target, position).await?;
            render::print_reorder(&report, view.test_case());
        }
    }
    Ok(())
}

fn run_config(
    config: &Config,
    explicit: Option<&Path>,
    command: ConfigCommand,
) -> Result<(), CliError> {
    match command {
        ConfigCommand::Show => {
            let path = explicit.map(Path::to_path_buf).or_else(Config::default_path);
            render::print_config(config, path.as_deref());
        }
        ConfigCommand::Path => {
            let path = Config::default_path().ok_or(ConfigError::NoConfigDir)?;
            println!("{}", path.display());
        }
        ConfigCommand::SetBaseUrl { url } => {
            let path = explicit
                .map(Path::to_path_buf)
                .or_else(Config::default_path)
                .ok_or(ConfigError::NoConfigDir)?;
            let url = url.trim_end_matches('/');
            Config::set_value(&path, "base_url", url)?;
            println!("base_url={url} saved to {}", path.display());
        }
    }
    Ok(())
}

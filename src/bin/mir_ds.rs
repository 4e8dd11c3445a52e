use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use mir_datasets::app::{App, ValidateRequest};
use mir_datasets::config::ConfigLoader;
use mir_datasets::error::DatasetError;
use mir_datasets::output::{JsonOutput, OutputMode, TextOutput};
use mir_datasets::registry::{Context, DatasetRegistry, InitOptions};

#[derive(Parser)]
#[command(name = "mir-ds")]
#[command(about = "Validate and access versioned music research datasets")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, help = "Path to a mir-datasets.json config file")]
    config: Option<String>,

    #[arg(long, global = true, help = "Print machine-readable JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "List registered datasets")]
    List,
    #[command(about = "Show a dataset's index summary")]
    Info(TargetArgs),
    #[command(about = "Check files under the dataset root against the index")]
    Validate(ValidateArgs),
    #[command(about = "Download a dataset's remote resources")]
    Download(DownloadArgs),
    #[command(about = "Pick a random track and show its files")]
    RandomTrack(RandomTrackArgs),
}

#[derive(Args, Clone)]
struct TargetArgs {
    name: String,

    #[arg(long)]
    version: Option<String>,

    #[arg(long, help = "Dataset root, overriding <data_home>/<DisplayName>")]
    root: Option<Utf8PathBuf>,
}

impl TargetArgs {
    fn init_options(&self) -> InitOptions {
        InitOptions {
            version: self.version.clone(),
            root: self.root.clone(),
        }
    }
}

#[derive(Args)]
struct ValidateArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(long, help = "Check at most this many files, chosen reproducibly from --seed")]
    sample: Option<usize>,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    #[arg(long, help = "Checksum files on a worker pool")]
    parallel: bool,

    #[arg(long = "skip", help = "File keys that are allowed to be absent")]
    skip_keys: Vec<String>,

    #[arg(long, help = "Remote keys that were downloaded; files of other remotes may be absent")]
    partial: Vec<String>,
}

#[derive(Args)]
struct DownloadArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(long, help = "Only download these remote keys")]
    partial: Vec<String>,

    #[arg(long)]
    force: bool,

    #[arg(long, help = "Delete archives after extracting them")]
    cleanup: bool,
}

#[derive(Args)]
struct RandomTrackArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<DatasetError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &DatasetError) -> u8 {
    match error {
        DatasetError::UnknownDataset { .. }
        | DatasetError::UnknownVersion { .. }
        | DatasetError::UnknownId { .. }
        | DatasetError::UnknownRemote { .. }
        | DatasetError::RootNotFound(_) => 2,
        DatasetError::IndexIntegrity { .. }
        | DatasetError::RemoteIntegrity { .. }
        | DatasetError::RemoteHttp(_)
        | DatasetError::RemoteStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let context = Context::new(config.store)?;
    let mut registry = DatasetRegistry::new(context);
    registry.load_definitions(&config.definitions_dir)?;
    let app = App::new(registry);
    let cancel = app.cancel_token().clone();
    ctrlc::set_handler(move || cancel.cancel()).into_diagnostic()?;

    match cli.command {
        Command::List => run_list(&app, output_mode),
        Command::Info(args) => run_info(&app, args, output_mode),
        Command::Validate(args) => run_validate(&app, args, output_mode),
        Command::Download(args) => run_download(&app, args, output_mode),
        Command::RandomTrack(args) => run_random_track(&app, args, output_mode),
    }
}

fn run_list(app: &App, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => {
            let result = app.list(&JsonOutput)?;
            JsonOutput::print_list(&result).into_diagnostic()?;
        }
        OutputMode::Text => {
            let result = app.list(&TextOutput)?;
            TextOutput::print_list(&result);
        }
    }
    Ok(())
}

fn run_info(app: &App, args: TargetArgs, output_mode: OutputMode) -> miette::Result<()> {
    let options = args.init_options();
    match output_mode {
        OutputMode::Json => {
            let result = app.info(&args.name, &options, &JsonOutput)?;
            JsonOutput::print_info(&result).into_diagnostic()?;
        }
        OutputMode::Text => {
            let result = app.info(&args.name, &options, &TextOutput)?;
            TextOutput::print_info(&result);
        }
    }
    Ok(())
}

fn run_validate(app: &App, args: ValidateArgs, output_mode: OutputMode) -> miette::Result<()> {
    let request = ValidateRequest {
        version: args.target.version.clone(),
        root: args.target.root.clone(),
        sample: args.sample,
        seed: args.seed,
        parallel: args.parallel,
        skip_keys: args.skip_keys,
        partial: (!args.partial.is_empty()).then_some(args.partial),
    };
    let result = match output_mode {
        OutputMode::Json => {
            let result = app.validate(&args.target.name, &request, &JsonOutput)?;
            JsonOutput::print_validate(&result).into_diagnostic()?;
            result
        }
        OutputMode::Text => {
            let result = app.validate(&args.target.name, &request, &TextOutput)?;
            TextOutput::print_validate(&result);
            result
        }
    };
    if !result.valid {
        return Err(miette::Report::msg("dataset failed validation"));
    }
    Ok(())
}

fn run_download(app: &App, args: DownloadArgs, output_mode: OutputMode) -> miette::Result<()> {
    let options = args.target.init_options();
    let partial = (!args.partial.is_empty()).then_some(args.partial.as_slice());
    match output_mode {
        OutputMode::Json => {
            let result = app.download(
                &args.target.name,
                &options,
                partial,
                args.force,
                args.cleanup,
                &JsonOutput,
            )?;
            JsonOutput::print_download(&result).into_diagnostic()?;
        }
        OutputMode::Text => {
            let result = app.download(
                &args.target.name,
                &options,
                partial,
                args.force,
                args.cleanup,
                &TextOutput,
            )?;
            TextOutput::print_download(&result);
        }
    }
    Ok(())
}

fn run_random_track(
    app: &App,
    args: RandomTrackArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let options = args.target.init_options();
    match output_mode {
        OutputMode::Json => {
            let result = app.random_track(&args.target.name, &options, args.seed, &JsonOutput)?;
            JsonOutput::print_random_track(&result).into_diagnostic()?;
        }
        OutputMode::Text => {
            let result = app.random_track(&args.target.name, &options, args.seed, &TextOutput)?;
            TextOutput::print_random_track(&result);
        }
    }
    Ok(())
}

//! Binary entry point for the Tapline CLI.

use std::io::{self, Write};
use std::process;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tapline::{
    BuildRecipe, CloudProvider, ConfigError, ConfigurationError, DockerCli, ImageSyncError,
    ImageSynchronizer, PipelineConfig, ProcessCommandRunner, Provider, ProviderError,
    RecipeBuilder, SyncOptions, ToolConfig,
};

mod cli;

use cli::{Cli, Command, PipelineArgs, RenderCommand, UpdateCommand};

/// Environment variable holding the log filter.
const LOG_ENV: &str = "TAPLINE_LOG";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("pipeline configuration error: {0}")]
    Pipeline(#[from] ConfigurationError),
    #[error("provisioning failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("image synchronisation failed: {0}")]
    Sync(#[from] ImageSyncError),
    #[error("failed to write recipe: {0}")]
    Io(#[from] io::Error),
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let exit_code = match dispatch(cli.command) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn dispatch(command: Command) -> Result<(), CliError> {
    match command {
        Command::Init(args) => init_command(&args),
        Command::Update(args) => update_command(&args),
        Command::Render(args) => render_command(&args),
    }
}

fn load_pipeline(args: &PipelineArgs) -> Result<PipelineConfig, CliError> {
    let path = utf8_path(args.config.clone())?;
    Ok(PipelineConfig::load(&path)?)
}

fn load_tool_config() -> Result<ToolConfig, CliError> {
    let tool = ToolConfig::load_without_cli_args()?;
    tool.validate()?;
    Ok(tool)
}

fn utf8_path(path: std::path::PathBuf) -> Result<Utf8PathBuf, CliError> {
    Utf8PathBuf::from_path_buf(path)
        .map_err(|original| CliError::NonUtf8Path(original.display().to_string()))
}

fn init_command(args: &PipelineArgs) -> Result<(), CliError> {
    let pipeline = load_pipeline(args)?;
    let provider_config = pipeline.provider_config()?;
    let tool = load_tool_config()?;

    let provider = Provider::new(provider_config, &tool, ProcessCommandRunner);
    info!(pipeline = %pipeline.name, "provisioning infrastructure");
    provider.sync()?;

    writeln!(
        io::stdout(),
        "infrastructure for '{}' is ready",
        pipeline.name
    )
    .ok();
    Ok(())
}

fn update_command(args: &UpdateCommand) -> Result<(), CliError> {
    let pipeline = load_pipeline(&args.pipeline)?;
    // Configuration problems surface before any network call.
    let recipe = RecipeBuilder::new().render(&pipeline)?;
    let provider_config = pipeline.provider_config()?;
    let tool = load_tool_config()?;

    let provider = Provider::new(provider_config, &tool, ProcessCommandRunner);
    info!(pipeline = %pipeline.name, "provisioning infrastructure");
    provider.sync()?;

    let engine = DockerCli::with_process_runner(tool.docker_bin.clone());
    let synchronizer = ImageSynchronizer::new(engine, provider, tool.local_namespace.clone())
        .with_options(SyncOptions {
            force_new_image: args.force_new_image,
            bypass_build_cache: args.no_cache,
        });
    let outcome = synchronizer.sync_image(&recipe)?;

    writeln!(io::stdout(), "{}", outcome.reference.remote_uri).ok();
    Ok(())
}

fn render_command(args: &RenderCommand) -> Result<(), CliError> {
    let pipeline = load_pipeline(&args.pipeline)?;
    let recipe = RecipeBuilder::new().render(&pipeline)?;

    match args.output.clone() {
        Some(dir) => write_recipe(&recipe, &utf8_path(dir)?),
        None => {
            let mut stdout = io::stdout();
            write!(stdout, "{}", recipe.as_str())?;
            writeln!(stdout, "# fingerprint: {}", recipe.fingerprint())?;
            Ok(())
        }
    }
}

fn write_recipe(recipe: &BuildRecipe, dir: &Utf8Path) -> Result<(), CliError> {
    let path = recipe.write_to(dir)?;
    writeln!(
        io::stdout(),
        "wrote {path} (fingerprint {})",
        recipe.fingerprint()
    )?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

//! Command-line interface definitions for the `tapline` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `tapline` binary.
#[derive(Debug, Parser)]
#[command(
    name = "tapline",
    about = "Build, publish and provision the container image for a data pipeline",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log at debug level regardless of `TAPLINE_LOG`.
    #[arg(long, global = true)]
    pub(crate) debug: bool,
    /// Subcommand to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of `tapline`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Provision the bucket, registry repository and cluster.
    #[command(name = "init", about = "Provision the bucket, registry repository and cluster")]
    Init(PipelineArgs),
    /// Provision, then build and publish the pipeline image when it changed.
    #[command(
        name = "update",
        about = "Provision, then build and publish the pipeline image when it changed"
    )]
    Update(UpdateCommand),
    /// Print or write the build recipe and its fingerprint.
    #[command(name = "render", about = "Print or write the build recipe and its fingerprint")]
    Render(RenderCommand),
}

/// Arguments shared by commands that read a pipeline configuration.
#[derive(Debug, Args)]
pub(crate) struct PipelineArgs {
    /// Path to the pipeline YAML configuration.
    #[arg(value_name = "CONFIG")]
    pub(crate) config: PathBuf,
}

/// Arguments for the `tapline update` subcommand.
#[derive(Debug, Args)]
pub(crate) struct UpdateCommand {
    /// Pipeline to synchronise.
    #[command(flatten)]
    pub(crate) pipeline: PipelineArgs,
    /// Rebuild and push even when the image already exists.
    #[arg(long)]
    pub(crate) force_new_image: bool,
    /// Build without reusing cached layers.
    #[arg(long)]
    pub(crate) no_cache: bool,
}

/// Arguments for the `tapline render` subcommand.
#[derive(Debug, Args)]
pub(crate) struct RenderCommand {
    /// Pipeline to render.
    #[command(flatten)]
    pub(crate) pipeline: PipelineArgs,
    /// Write `Dockerfile` into this directory instead of printing it.
    #[arg(long, value_name = "DIR")]
    pub(crate) output: Option<PathBuf>,
}

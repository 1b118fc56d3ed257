//! [`ContainerEngine`] implementation that shells out to the `docker` CLI.

use std::ffi::OsString;

use tracing::debug;

use super::{ContainerEngine, EngineError, ImageHandle, ImageStream, StreamMessage};
use crate::provider::RegistryAuth;
use crate::recipe::BuildRecipe;
use crate::runner::{CommandOutput, CommandRunner, ProcessCommandRunner, ProcessEvent, ProcessEvents};

/// Default Docker CLI binary name.
pub const DEFAULT_DOCKER_BIN: &str = "docker";

const LOCAL_NOT_FOUND: &[&str] = &["no such image"];
const REMOTE_NOT_FOUND: &[&str] = &["no such manifest", "manifest unknown", "not found"];
const ERROR_PREFIXES: &[&str] = &["ERROR", "error:", "denied:", "unauthorized:"];

/// Drives image operations through the Docker CLI.
#[derive(Clone, Debug)]
pub struct DockerCli<R: CommandRunner> {
    docker_bin: String,
    runner: R,
}

impl DockerCli<ProcessCommandRunner> {
    /// Creates an engine wired to the real process runner.
    #[must_use]
    pub fn with_process_runner(docker_bin: impl Into<String>) -> Self {
        Self::new(docker_bin, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> DockerCli<R> {
    /// Creates an engine using `runner` to execute `docker_bin`.
    #[must_use]
    pub fn new(docker_bin: impl Into<String>, runner: R) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            runner,
        }
    }

    fn failure(&self, operation: &str, output: &CommandOutput) -> EngineError {
        EngineError::CommandFailure {
            program: self.docker_bin.clone(),
            operation: operation.to_owned(),
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        }
    }

    fn stream(
        &self,
        operation: &str,
        args: &[OsString],
        input: Option<&[u8]>,
    ) -> Result<ImageStream, EngineError> {
        let events = self.runner.stream(&self.docker_bin, args, input)?;
        Ok(Box::new(DockerStream::new(
            format!("{} {operation}", self.docker_bin),
            events,
        )))
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<OsString> {
    parts.into_iter().map(OsString::from).collect()
}

fn mentions_any(stderr: &str, needles: &[&str]) -> bool {
    let lowered = stderr.to_ascii_lowercase();
    needles.iter().any(|needle| lowered.contains(needle))
}

impl<R: CommandRunner> ContainerEngine for DockerCli<R> {
    fn login(&self, auth: &RegistryAuth) -> Result<(), EngineError> {
        debug!(
            registry = %auth.registry_endpoint,
            force_reauth = auth.force_reauth,
            "logging in to registry"
        );
        let login_args = args([
            "login",
            "--username",
            auth.username.as_str(),
            "--password-stdin",
            auth.registry_endpoint.as_str(),
        ]);
        let output =
            self.runner
                .run_with_input(&self.docker_bin, &login_args, auth.password.as_bytes())?;
        if output.is_success() {
            return Ok(());
        }
        Err(self.failure("login", &output))
    }

    fn find_local_image(&self, reference: &str) -> Result<Option<ImageHandle>, EngineError> {
        let inspect = args(["image", "inspect", "--format", "{{.Id}}", reference]);
        let output = self.runner.run(&self.docker_bin, &inspect)?;
        if output.is_success() {
            return Ok(Some(ImageHandle {
                id: output.stdout.trim().to_owned(),
                reference: reference.to_owned(),
            }));
        }
        if mentions_any(&output.stderr, LOCAL_NOT_FOUND) {
            return Ok(None);
        }
        Err(self.failure("image inspect", &output))
    }

    fn remote_image_exists(&self, reference: &str) -> Result<bool, EngineError> {
        let inspect = args(["manifest", "inspect", reference]);
        let output = self.runner.run(&self.docker_bin, &inspect)?;
        if output.is_success() {
            return Ok(true);
        }
        if mentions_any(&output.stderr, REMOTE_NOT_FOUND) {
            return Ok(false);
        }
        Err(self.failure("manifest inspect", &output))
    }

    fn build(
        &self,
        recipe: &BuildRecipe,
        tag: &str,
        no_cache: bool,
    ) -> Result<ImageStream, EngineError> {
        let mut build = args(["build", "--progress=plain", "--tag", tag]);
        if no_cache {
            build.push(OsString::from("--no-cache"));
        }
        // The recipe is the whole build context, read from stdin.
        build.push(OsString::from("-"));
        self.stream("build", &build, Some(recipe.as_bytes()))
    }

    fn pull(&self, reference: &str) -> Result<ImageStream, EngineError> {
        self.stream("pull", &args(["pull", reference]), None)
    }

    fn tag(&self, image: &ImageHandle, repository: &str, tag: &str) -> Result<(), EngineError> {
        let target = format!("{repository}:{tag}");
        let tag_args = args(["tag", image.id.as_str(), target.as_str()]);
        let output = self.runner.run(&self.docker_bin, &tag_args)?;
        if output.is_success() {
            return Ok(());
        }
        Err(self.failure("tag", &output))
    }

    fn push(&self, repository: &str, tag: &str) -> Result<ImageStream, EngineError> {
        let target = format!("{repository}:{tag}");
        self.stream("push", &args(["push", target.as_str()]), None)
    }
}

/// Returns the error text carried by a line of Docker CLI output, if any.
///
/// BuildKit prefixes step output with `#<n> `, so the prefix is skipped
/// before matching.
#[must_use]
pub fn error_payload(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let body = match trimmed.strip_prefix('#') {
        Some(rest) => rest
            .trim_start_matches(|ch: char| ch.is_ascii_digit())
            .trim_start(),
        None => trimmed,
    };
    ERROR_PREFIXES
        .iter()
        .any(|prefix| body.starts_with(prefix))
        .then_some(trimmed)
}

struct DockerStream {
    label: String,
    events: ProcessEvents,
    last_stderr: Option<String>,
    done: bool,
}

impl DockerStream {
    fn new(label: String, events: ProcessEvents) -> Self {
        Self {
            label,
            events,
            last_stderr: None,
            done: false,
        }
    }

    fn exit_message(&self, code: Option<i32>) -> String {
        let status = code.map_or_else(|| String::from("unknown"), |value| value.to_string());
        match self.last_stderr.as_deref() {
            Some(detail) => format!("{} exited with status {status}: {detail}", self.label),
            None => format!("{} exited with status {status}", self.label),
        }
    }
}

impl Iterator for DockerStream {
    type Item = StreamMessage;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let Some(event) = self.events.next() else {
                self.done = true;
                return Some(StreamMessage::Error(format!(
                    "{} ended without an exit status",
                    self.label
                )));
            };
            let line = match event {
                ProcessEvent::Exited(Some(0)) => {
                    self.done = true;
                    return None;
                }
                ProcessEvent::Exited(code) => {
                    self.done = true;
                    return Some(StreamMessage::Error(self.exit_message(code)));
                }
                ProcessEvent::Stdout(line) => line,
                ProcessEvent::Stderr(line) => {
                    if !line.trim().is_empty() {
                        self.last_stderr = Some(line.trim().to_owned());
                    }
                    line
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            if let Some(payload) = error_payload(&line) {
                self.done = true;
                return Some(StreamMessage::Error(payload.to_owned()));
            }
            return Some(StreamMessage::Progress(line));
        }
        None
    }
}

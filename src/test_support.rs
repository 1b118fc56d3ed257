//! Test support utilities shared across unit and integration tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, PoisonError};

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::engine::{ContainerEngine, EngineError, ImageHandle, ImageStream, StreamMessage};
use crate::provider::{CloudProvider, ProviderError, RegistryAuth};
use crate::recipe::BuildRecipe;
use crate::runner::{CommandOutput, CommandRunner, ProcessEvent, ProcessEvents, RunnerError};

/// Account identifier reported by [`FakeAwsCli`].
pub const FAKE_ACCOUNT_ID: &str = "123456789012";

/// Registry user name encoded in fake authorization tokens.
pub const FAKE_REGISTRY_USER: &str = "AWS";

/// Registry password encoded in fake authorization tokens.
pub const FAKE_REGISTRY_PASSWORD: &str = "fake-registry-password";

/// Records a single invocation made through a fake runner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Bytes written to standard input, if any.
    pub input: Option<Vec<u8>>,
}

impl CommandInvocation {
    fn new(program: &str, args: &[OsString], input: Option<&[u8]>) -> Self {
        Self {
            program: program.to_owned(),
            args: args.to_vec(),
            input: input.map(<[u8]>::to_vec),
        }
    }

    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns standard input decoded as UTF-8, if any was provided.
    #[must_use]
    pub fn input_text(&self) -> Option<String> {
        self.input
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Returns the argument following `flag`, if present.
    #[must_use]
    pub fn value_after(&self, flag: &str) -> Option<String> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|index| self.args.get(index + 1))
            .map(|arg| arg.to_string_lossy().into_owned())
    }

    fn arg(&self, index: usize) -> String {
        self.args
            .get(index)
            .map(|arg| arg.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Captured commands and streamed commands draw from separate queues.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    streams: Rc<RefCell<VecDeque<Vec<ProcessEvent>>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    /// Queues the events returned by the next streamed command.
    pub fn push_stream(&self, events: impl IntoIterator<Item = ProcessEvent>) {
        self.streams
            .borrow_mut()
            .push_back(events.into_iter().collect());
    }

    fn record(&self, program: &str, args: &[OsString], input: Option<&[u8]>) {
        self.invocations
            .borrow_mut()
            .push(CommandInvocation::new(program, args, input));
    }

    fn next_response(&self, program: &str) -> Result<CommandOutput, RunnerError> {
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| no_script(program))
    }
}

fn no_script(program: &str) -> RunnerError {
    RunnerError::Spawn {
        program: program.to_owned(),
        message: String::from("no scripted response available"),
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        self.record(program, args, None);
        self.next_response(program)
    }

    fn run_with_input(
        &self,
        program: &str,
        args: &[OsString],
        input: &[u8],
    ) -> Result<CommandOutput, RunnerError> {
        self.record(program, args, Some(input));
        self.next_response(program)
    }

    fn stream(
        &self,
        program: &str,
        args: &[OsString],
        input: Option<&[u8]>,
    ) -> Result<ProcessEvents, RunnerError> {
        self.record(program, args, input);
        let events = self
            .streams
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| no_script(program))?;
        Ok(Box::new(events.into_iter()))
    }
}

/// Stateful stand-in for the `aws` CLI.
///
/// Creation calls succeed the first time and report the service's
/// already-exists error code afterwards, so repeated provisioning can be
/// observed end to end.
#[derive(Clone, Debug, Default)]
pub struct FakeAwsCli {
    state: Rc<RefCell<FakeAwsState>>,
}

#[derive(Debug, Default)]
struct FakeAwsState {
    buckets: BTreeSet<String>,
    repositories: BTreeSet<String>,
    clusters: BTreeSet<String>,
    failures: BTreeMap<String, String>,
    invocations: Vec<CommandInvocation>,
}

impl FakeAwsCli {
    /// Creates an account with no resources.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an existing bucket.
    #[must_use]
    pub fn with_bucket(self, name: &str) -> Self {
        self.state.borrow_mut().buckets.insert(name.to_owned());
        self
    }

    /// Seeds an existing registry repository.
    #[must_use]
    pub fn with_repository(self, name: &str) -> Self {
        self.state.borrow_mut().repositories.insert(name.to_owned());
        self
    }

    /// Seeds an existing cluster.
    #[must_use]
    pub fn with_cluster(self, name: &str) -> Self {
        self.state.borrow_mut().clusters.insert(name.to_owned());
        self
    }

    /// Makes every later call to `operation` fail with the error `code`.
    pub fn fail_operation(&self, operation: &str, code: &str) {
        self.state
            .borrow_mut()
            .failures
            .insert(operation.to_owned(), code.to_owned());
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.state.borrow().invocations.clone()
    }

    /// Returns `service operation` for every call, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        self.state
            .borrow()
            .invocations
            .iter()
            .map(|call| format!("{} {}", call.arg(0), call.arg(1)))
            .collect()
    }

    /// Counts calls to `operation`.
    #[must_use]
    pub fn count(&self, operation: &str) -> usize {
        self.state
            .borrow()
            .invocations
            .iter()
            .filter(|call| call.arg(1) == operation)
            .count()
    }

    /// Returns `true` when the bucket exists.
    #[must_use]
    pub fn has_bucket(&self, name: &str) -> bool {
        self.state.borrow().buckets.contains(name)
    }

    /// Returns `true` when the registry repository exists.
    #[must_use]
    pub fn has_repository(&self, name: &str) -> bool {
        self.state.borrow().repositories.contains(name)
    }

    /// Returns `true` when the cluster exists.
    #[must_use]
    pub fn has_cluster(&self, name: &str) -> bool {
        self.state.borrow().clusters.contains(name)
    }

    /// Registry host for `region`.
    #[must_use]
    pub fn registry_host(region: &str) -> String {
        format!("{FAKE_ACCOUNT_ID}.dkr.ecr.{region}.amazonaws.com")
    }

    fn respond(&self, call: &CommandInvocation) -> CommandOutput {
        let service = call.arg(0);
        let operation = call.arg(1);
        let region = call
            .value_after("--region")
            .unwrap_or_else(|| String::from("us-east-1"));
        let mut state = self.state.borrow_mut();

        if let Some(code) = state.failures.get(&operation) {
            return aws_error(code, &operation);
        }

        match (service.as_str(), operation.as_str()) {
            ("s3api", "create-bucket") => {
                let bucket = call.value_after("--bucket").unwrap_or_default();
                if !state.buckets.insert(bucket.clone()) {
                    return aws_error("BucketAlreadyOwnedByYou", &operation);
                }
                aws_ok(format!("{{\"Location\":\"/{bucket}\"}}"))
            }
            ("ecr", "create-repository") => {
                let name = call.value_after("--repository-name").unwrap_or_default();
                if !state.repositories.insert(name.clone()) {
                    return aws_error("RepositoryAlreadyExistsException", &operation);
                }
                aws_ok(format!(
                    "{{\"repository\":{}}}",
                    repository_json(&name, &region)
                ))
            }
            ("ecs", "create-cluster") => {
                let name = call.value_after("--cluster-name").unwrap_or_default();
                state.clusters.insert(name.clone());
                aws_ok(format!(
                    "{{\"cluster\":{{\"clusterName\":\"{name}\",\"status\":\"ACTIVE\"}}}}"
                ))
            }
            ("ecr", "describe-repositories") => {
                let name = call.value_after("--repository-names").unwrap_or_default();
                if !state.repositories.contains(&name) {
                    return aws_error("RepositoryNotFoundException", &operation);
                }
                aws_ok(format!(
                    "{{\"repositories\":[{}]}}",
                    repository_json(&name, &region)
                ))
            }
            ("ecr", "get-authorization-token") => {
                let token =
                    BASE64_STANDARD.encode(format!("{FAKE_REGISTRY_USER}:{FAKE_REGISTRY_PASSWORD}"));
                let endpoint = Self::registry_host(&region);
                aws_ok(format!(
                    "{{\"authorizationData\":[{{\"authorizationToken\":\"{token}\",\
                     \"expiresAt\":\"2030-01-01T00:00:00+00:00\",\
                     \"proxyEndpoint\":\"https://{endpoint}\"}}]}}"
                ))
            }
            _ => CommandOutput {
                code: Some(252),
                stdout: String::new(),
                stderr: format!("usage: aws: unknown command {service} {operation}"),
            },
        }
    }
}

fn repository_json(name: &str, region: &str) -> String {
    format!(
        "{{\"repositoryName\":\"{name}\",\"registryId\":\"{FAKE_ACCOUNT_ID}\",\
         \"repositoryUri\":\"{}/{name}\"}}",
        FakeAwsCli::registry_host(region)
    )
}

fn aws_ok(stdout: String) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout,
        stderr: String::new(),
    }
}

fn aws_error(code: &str, operation: &str) -> CommandOutput {
    CommandOutput {
        code: Some(254),
        stdout: String::new(),
        stderr: format!(
            "\nAn error occurred ({code}) when calling the {operation} operation: simulated\n"
        ),
    }
}

impl CommandRunner for FakeAwsCli {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        let call = CommandInvocation::new(program, args, None);
        let output = self.respond(&call);
        self.state.borrow_mut().invocations.push(call);
        Ok(output)
    }

    fn run_with_input(
        &self,
        program: &str,
        args: &[OsString],
        input: &[u8],
    ) -> Result<CommandOutput, RunnerError> {
        let call = CommandInvocation::new(program, args, Some(input));
        let output = self.respond(&call);
        self.state.borrow_mut().invocations.push(call);
        Ok(output)
    }

    fn stream(
        &self,
        program: &str,
        _args: &[OsString],
        _input: Option<&[u8]>,
    ) -> Result<ProcessEvents, RunnerError> {
        Err(RunnerError::Spawn {
            program: program.to_owned(),
            message: String::from("the aws fake does not stream"),
        })
    }
}

/// Operations observed by [`FakeEngine`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EngineCall {
    /// Registry login against an endpoint.
    Login(String),
    /// Local image lookup.
    FindLocal(String),
    /// Remote manifest lookup.
    RemoteExists(String),
    /// Image build.
    Build {
        /// Tag applied to the built image.
        tag: String,
        /// Whether the build cache was bypassed.
        no_cache: bool,
    },
    /// Image pull.
    Pull(String),
    /// Image tag.
    Tag {
        /// Identifier of the tagged image.
        image_id: String,
        /// New `repository:tag` name.
        target: String,
    },
    /// Image push of `repository:tag`.
    Push(String),
}

/// In-memory container engine with a local image store and a registry.
///
/// Streams replay scripted messages; a stream whose script contains no
/// error takes effect (the image appears locally or remotely) as soon as the
/// operation starts.
#[derive(Clone, Debug, Default)]
pub struct FakeEngine {
    state: Rc<RefCell<FakeEngineState>>,
    consumed: Rc<Cell<usize>>,
}

#[derive(Debug, Default)]
struct FakeEngineState {
    local: BTreeMap<String, String>,
    remote: BTreeSet<String>,
    build_output: Option<Vec<StreamMessage>>,
    pull_output: Option<Vec<StreamMessage>>,
    push_output: Option<Vec<StreamMessage>>,
    login_failure: Option<String>,
    calls: Vec<EngineCall>,
    next_id: usize,
}

impl FakeEngineState {
    fn new_image_id(&mut self) -> String {
        self.next_id += 1;
        format!("sha256:fake{:04}", self.next_id)
    }
}

fn succeeds(messages: &[StreamMessage]) -> bool {
    !messages
        .iter()
        .any(|message| matches!(message, StreamMessage::Error(_)))
}

fn default_output(operation: &str) -> Vec<StreamMessage> {
    vec![
        StreamMessage::Progress(format!("{operation} started")),
        StreamMessage::Progress(format!("{operation} complete")),
    ]
}

impl FakeEngine {
    /// Creates an engine with empty local and remote stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a local image under `reference`.
    #[must_use]
    pub fn with_local_image(self, reference: &str) -> Self {
        self.add_local_image(reference);
        self
    }

    /// Seeds a remote image under `reference`.
    #[must_use]
    pub fn with_remote_image(self, reference: &str) -> Self {
        self.add_remote_image(reference);
        self
    }

    /// Adds a local image under `reference`.
    pub fn add_local_image(&self, reference: &str) {
        let mut state = self.state.borrow_mut();
        let id = state.new_image_id();
        state.local.insert(reference.to_owned(), id);
    }

    /// Adds a remote image under `reference`.
    pub fn add_remote_image(&self, reference: &str) {
        self.state.borrow_mut().remote.insert(reference.to_owned());
    }

    /// Scripts the messages produced by the next builds.
    pub fn script_build(&self, messages: Vec<StreamMessage>) {
        self.state.borrow_mut().build_output = Some(messages);
    }

    /// Scripts the messages produced by the next pulls.
    pub fn script_pull(&self, messages: Vec<StreamMessage>) {
        self.state.borrow_mut().pull_output = Some(messages);
    }

    /// Scripts the messages produced by the next pushes.
    pub fn script_push(&self, messages: Vec<StreamMessage>) {
        self.state.borrow_mut().push_output = Some(messages);
    }

    /// Makes registry login fail with `message`.
    pub fn fail_login(&self, message: &str) {
        self.state.borrow_mut().login_failure = Some(message.to_owned());
    }

    /// Returns the operations observed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.borrow().calls.clone()
    }

    /// Counts builds started.
    #[must_use]
    pub fn builds(&self) -> usize {
        self.count(|call| matches!(call, EngineCall::Build { .. }))
    }

    /// Counts pushes started.
    #[must_use]
    pub fn pushes(&self) -> usize {
        self.count(|call| matches!(call, EngineCall::Push(_)))
    }

    /// Counts pulls started.
    #[must_use]
    pub fn pulls(&self) -> usize {
        self.count(|call| matches!(call, EngineCall::Pull(_)))
    }

    /// Counts stream messages handed to the consumer across all operations.
    #[must_use]
    pub fn consumed_messages(&self) -> usize {
        self.consumed.get()
    }

    /// Returns `true` when `reference` is in the local store.
    #[must_use]
    pub fn has_local(&self, reference: &str) -> bool {
        self.state.borrow().local.contains_key(reference)
    }

    /// Returns `true` when `reference` is in the registry.
    #[must_use]
    pub fn has_remote(&self, reference: &str) -> bool {
        self.state.borrow().remote.contains(reference)
    }

    fn count(&self, predicate: impl Fn(&EngineCall) -> bool) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    fn record(&self, call: EngineCall) {
        self.state.borrow_mut().calls.push(call);
    }

    fn counted(&self, messages: Vec<StreamMessage>) -> ImageStream {
        let consumed = Rc::clone(&self.consumed);
        Box::new(
            messages
                .into_iter()
                .inspect(move |_| consumed.set(consumed.get() + 1)),
        )
    }
}

impl ContainerEngine for FakeEngine {
    fn login(&self, auth: &RegistryAuth) -> Result<(), EngineError> {
        self.record(EngineCall::Login(auth.registry_endpoint.clone()));
        match self.state.borrow().login_failure.clone() {
            Some(stderr) => Err(EngineError::CommandFailure {
                program: String::from("fake-engine"),
                operation: String::from("login"),
                status_text: String::from("1"),
                stderr,
            }),
            None => Ok(()),
        }
    }

    fn find_local_image(&self, reference: &str) -> Result<Option<ImageHandle>, EngineError> {
        self.record(EngineCall::FindLocal(reference.to_owned()));
        Ok(self
            .state
            .borrow()
            .local
            .get(reference)
            .map(|id| ImageHandle {
                id: id.clone(),
                reference: reference.to_owned(),
            }))
    }

    fn remote_image_exists(&self, reference: &str) -> Result<bool, EngineError> {
        self.record(EngineCall::RemoteExists(reference.to_owned()));
        Ok(self.has_remote(reference))
    }

    fn build(
        &self,
        _recipe: &BuildRecipe,
        tag: &str,
        no_cache: bool,
    ) -> Result<ImageStream, EngineError> {
        self.record(EngineCall::Build {
            tag: tag.to_owned(),
            no_cache,
        });
        let messages = {
            let mut state = self.state.borrow_mut();
            let messages = state
                .build_output
                .clone()
                .unwrap_or_else(|| default_output("build"));
            if succeeds(&messages) {
                let id = state.new_image_id();
                state.local.insert(tag.to_owned(), id);
            }
            messages
        };
        Ok(self.counted(messages))
    }

    fn pull(&self, reference: &str) -> Result<ImageStream, EngineError> {
        self.record(EngineCall::Pull(reference.to_owned()));
        let messages = {
            let mut state = self.state.borrow_mut();
            let messages = state
                .pull_output
                .clone()
                .unwrap_or_else(|| default_output("pull"));
            if succeeds(&messages) && state.remote.contains(reference) {
                let id = state.new_image_id();
                state.local.insert(reference.to_owned(), id);
            }
            messages
        };
        Ok(self.counted(messages))
    }

    fn tag(&self, image: &ImageHandle, repository: &str, tag: &str) -> Result<(), EngineError> {
        let target = format!("{repository}:{tag}");
        self.record(EngineCall::Tag {
            image_id: image.id.clone(),
            target: target.clone(),
        });
        self.state
            .borrow_mut()
            .local
            .insert(target, image.id.clone());
        Ok(())
    }

    fn push(&self, repository: &str, tag: &str) -> Result<ImageStream, EngineError> {
        let target = format!("{repository}:{tag}");
        self.record(EngineCall::Push(target.clone()));
        let messages = {
            let mut state = self.state.borrow_mut();
            let messages = state
                .push_output
                .clone()
                .unwrap_or_else(|| default_output("push"));
            if succeeds(&messages) {
                state.remote.insert(target);
            }
            messages
        };
        Ok(self.counted(messages))
    }
}

/// Provider double that hands out a fixed registry and counts provisioning.
#[derive(Clone, Debug)]
pub struct FakeProvider {
    registry_uri: String,
    failure: Rc<RefCell<Option<ProviderError>>>,
    sync_calls: Rc<Cell<usize>>,
}

impl FakeProvider {
    /// Creates a provider whose registry repository is `registry_uri`.
    #[must_use]
    pub fn new(registry_uri: &str) -> Self {
        Self {
            registry_uri: registry_uri.to_owned(),
            failure: Rc::new(RefCell::new(None)),
            sync_calls: Rc::new(Cell::new(0)),
        }
    }

    /// Makes every later call fail with `error`.
    pub fn fail_with(&self, error: ProviderError) {
        *self.failure.borrow_mut() = Some(error);
    }

    /// Number of `sync` calls observed.
    #[must_use]
    pub fn sync_calls(&self) -> usize {
        self.sync_calls.get()
    }

    fn check(&self) -> Result<(), ProviderError> {
        self.failure.borrow().clone().map_or(Ok(()), Err)
    }
}

impl CloudProvider for FakeProvider {
    fn sync(&self) -> Result<(), ProviderError> {
        self.sync_calls.set(self.sync_calls.get() + 1);
        self.check()
    }

    fn registry_uri(&self) -> Result<String, ProviderError> {
        self.check()?;
        Ok(self.registry_uri.clone())
    }

    fn registry_auth(&self) -> Result<RegistryAuth, ProviderError> {
        self.check()?;
        let host = self
            .registry_uri
            .split_once('/')
            .map_or(self.registry_uri.as_str(), |(host, _)| host);
        Ok(RegistryAuth {
            username: FAKE_REGISTRY_USER.to_owned(),
            password: FAKE_REGISTRY_PASSWORD.to_owned(),
            registry_endpoint: format!("https://{host}"),
            force_reauth: true,
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    #[must_use]
    pub fn set_vars(pairs: &[(&str, &str)]) -> Self {
        let guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

//! AWS provider driven through the `aws` CLI.
//!
//! The bucket lives in S3, the registry repository in ECR and the cluster in
//! ECS. The repository and cluster share the instance name; the bucket name
//! is configurable. Create calls that fail with an already-exists error code
//! are treated as success.

use std::cell::{Cell, OnceCell};
use std::ffi::OsString;
use std::fmt;

use base64::prelude::{BASE64_STANDARD, Engine as _};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{CloudProvider, ProviderError, RegistryAuth, ResourceKind};
use crate::config::ToolConfig;
use crate::pipeline::{DEFAULT_REGION, ProviderConfig};
use crate::runner::{CommandOutput, CommandRunner, ProcessCommandRunner, RunnerError};

/// Default AWS CLI binary name.
pub const DEFAULT_AWS_BIN: &str = "aws";

/// Default capacity provider attached to the cluster.
pub const DEFAULT_CAPACITY_PROVIDER: &str = "FARGATE";

const BUCKET_EXISTS: &[&str] = &["BucketAlreadyOwnedByYou", BUCKET_OWNED_ELSEWHERE];
// The bucket name is taken, but not by this account.
const BUCKET_OWNED_ELSEWHERE: &str = "BucketAlreadyExists";
const REPOSITORY_EXISTS: &[&str] = &["RepositoryAlreadyExistsException"];
// ECS returns the existing cluster from CreateCluster.
const CLUSTER_EXISTS: &[&str] = &[];

/// Tool-level settings for the AWS CLI.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AwsSettings {
    /// Path to the `aws` executable.
    pub aws_bin: String,
    /// Named profile passed as `--profile`, if any.
    pub profile: Option<String>,
    /// Capacity provider attached to the cluster.
    pub capacity_provider: String,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            aws_bin: DEFAULT_AWS_BIN.to_owned(),
            profile: None,
            capacity_provider: DEFAULT_CAPACITY_PROVIDER.to_owned(),
        }
    }
}

impl AwsSettings {
    /// Extracts the AWS settings from the tool configuration.
    #[must_use]
    pub fn from_tool_config(tool: &ToolConfig) -> Self {
        Self {
            aws_bin: tool.aws_bin.clone(),
            profile: tool.aws_profile.clone(),
            capacity_provider: tool.capacity_provider.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Service {
    S3,
    Ecr,
    Ecs,
}

impl Service {
    const fn cli_name(self) -> &'static str {
        match self {
            Self::S3 => "s3api",
            Self::Ecr => "ecr",
            Self::Ecs => "ecs",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cli_name())
    }
}

/// Command prefix for one AWS service, resolved once per provider.
#[derive(Clone, Debug)]
struct ServiceClient {
    service: Service,
    global_args: Vec<OsString>,
}

impl ServiceClient {
    fn new(service: Service, region: &str, settings: &AwsSettings) -> Self {
        debug!(service = %service, region, "initialising aws client");
        let mut global_args = vec![
            OsString::from("--region"),
            OsString::from(region),
            OsString::from("--output"),
            OsString::from("json"),
        ];
        if let Some(profile) = settings.profile.as_deref() {
            global_args.push(OsString::from("--profile"));
            global_args.push(OsString::from(profile));
        }
        Self {
            service,
            global_args,
        }
    }

    fn command(&self, operation: &str, params: &[&str]) -> Vec<OsString> {
        let mut args = Vec::with_capacity(params.len() + self.global_args.len() + 2);
        args.push(OsString::from(self.service.cli_name()));
        args.push(OsString::from(operation));
        args.extend(params.iter().map(OsString::from));
        args.extend(self.global_args.iter().cloned());
        args
    }
}

/// Lazily created per-service clients owned by one provider instance.
#[derive(Debug, Default)]
struct ServiceClients {
    s3: OnceCell<ServiceClient>,
    ecr: OnceCell<ServiceClient>,
    ecs: OnceCell<ServiceClient>,
}

/// Outcome of a failed AWS call.
enum CallError {
    AlreadyExists(String),
    Failed(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeRepositoriesResponse {
    repositories: Vec<RepositoryDescription>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
struct RepositoryDescription {
    repository_uri: String,
    registry_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizationTokenResponse {
    authorization_data: Vec<AuthorizationData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizationData {
    authorization_token: String,
    proxy_endpoint: String,
}

/// AWS implementation of [`CloudProvider`].
///
/// The provider caches per-service state in cells and is meant to be used
/// from a single thread. The registry repository is described at most once
/// per instance, and not re-created when `sync` already ensured it.
#[derive(Debug)]
pub struct AwsProvider<R: CommandRunner> {
    config: ProviderConfig,
    settings: AwsSettings,
    runner: R,
    clients: ServiceClients,
    repository_ready: Cell<bool>,
    repository: OnceCell<RepositoryDescription>,
}

impl AwsProvider<ProcessCommandRunner> {
    /// Creates a provider wired to the real process runner.
    #[must_use]
    pub fn with_process_runner(config: ProviderConfig, settings: AwsSettings) -> Self {
        Self::new(config, settings, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> AwsProvider<R> {
    /// Creates a provider for the instance described by `config`.
    #[must_use]
    pub fn new(config: ProviderConfig, settings: AwsSettings, runner: R) -> Self {
        Self {
            config,
            settings,
            runner,
            clients: ServiceClients::default(),
            repository_ready: Cell::new(false),
            repository: OnceCell::new(),
        }
    }

    fn client(&self, service: Service) -> &ServiceClient {
        let cell = match service {
            Service::S3 => &self.clients.s3,
            Service::Ecr => &self.clients.ecr,
            Service::Ecs => &self.clients.ecs,
        };
        cell.get_or_init(|| ServiceClient::new(service, &self.config.region, &self.settings))
    }

    fn call(
        &self,
        service: Service,
        operation: &str,
        params: &[&str],
        exists_codes: &[&str],
    ) -> Result<CommandOutput, CallError> {
        let args = self.client(service).command(operation, params);
        let output = self
            .runner
            .run(&self.settings.aws_bin, &args)
            .map_err(|err: RunnerError| CallError::Failed(err.to_string()))?;
        if output.is_success() {
            return Ok(output);
        }

        let stderr = output.stderr.trim().to_owned();
        match error_code(&stderr).map(str::to_owned) {
            Some(code) if exists_codes.contains(&code.as_str()) => {
                Err(CallError::AlreadyExists(code))
            }
            _ if stderr.is_empty() => Err(CallError::Failed(format!(
                "{} {service} {operation} exited with status {}",
                self.settings.aws_bin,
                output.status_text()
            ))),
            _ => Err(CallError::Failed(stderr)),
        }
    }

    fn ensure(
        resource: ResourceKind,
        name: &str,
        result: Result<CommandOutput, CallError>,
    ) -> Result<(), ProviderError> {
        match result {
            Ok(_) => {
                debug!(resource = %resource, name, "created");
                Ok(())
            }
            Err(CallError::AlreadyExists(code)) if owned_by_another_account(&code) => {
                warn!(
                    resource = %resource,
                    name,
                    code = %code,
                    "exists but is owned by another account"
                );
                Ok(())
            }
            Err(CallError::AlreadyExists(code)) => {
                debug!(resource = %resource, name, code = %code, "already exists");
                Ok(())
            }
            Err(CallError::Failed(message)) => Err(ProviderError::Unavailable {
                resource,
                name: name.to_owned(),
                message,
            }),
        }
    }

    fn ensure_bucket(&self) -> Result<(), ProviderError> {
        let bucket = self.config.bucket_name.as_str();
        debug!(bucket, "ensuring bucket exists");
        let location = format!("LocationConstraint={}", self.config.region);
        let mut params = vec!["--bucket", bucket];
        if self.config.region != DEFAULT_REGION {
            params.push("--create-bucket-configuration");
            params.push(location.as_str());
        }
        let result = self.call(Service::S3, "create-bucket", &params, BUCKET_EXISTS);
        Self::ensure(ResourceKind::Bucket, bucket, result)
    }

    fn ensure_repository(&self) -> Result<(), ProviderError> {
        let repository = self.config.resource_prefix.as_str();
        debug!(repository, "ensuring registry repository exists");
        let result = self.call(
            Service::Ecr,
            "create-repository",
            &["--repository-name", repository],
            REPOSITORY_EXISTS,
        );
        Self::ensure(ResourceKind::Registry, repository, result)?;
        self.repository_ready.set(true);
        Ok(())
    }

    fn ensure_cluster(&self) -> Result<(), ProviderError> {
        let cluster = self.config.resource_prefix.as_str();
        debug!(cluster, "ensuring cluster exists");
        let result = self.call(
            Service::Ecs,
            "create-cluster",
            &[
                "--cluster-name",
                cluster,
                "--settings",
                "name=containerInsights,value=enabled",
                "--capacity-providers",
                self.settings.capacity_provider.as_str(),
            ],
            CLUSTER_EXISTS,
        );
        Self::ensure(ResourceKind::Cluster, cluster, result)
    }

    fn describe_repository(&self) -> Result<&RepositoryDescription, ProviderError> {
        if let Some(description) = self.repository.get() {
            return Ok(description);
        }
        if !self.repository_ready.get() {
            self.ensure_repository()?;
        }
        let repository = self.config.resource_prefix.as_str();
        let output = self
            .call(
                Service::Ecr,
                "describe-repositories",
                &["--repository-names", repository],
                &[],
            )
            .map_err(|err| self.registry_error(err))?;
        let response: DescribeRepositoriesResponse = self.parse(&output)?;
        let description = response
            .repositories
            .into_iter()
            .next()
            .ok_or_else(|| self.malformed("describe-repositories returned no repositories"))?;
        Ok(self.repository.get_or_init(|| description))
    }

    fn parse<T: DeserializeOwned>(&self, output: &CommandOutput) -> Result<T, ProviderError> {
        serde_json::from_str(&output.stdout).map_err(|err| self.malformed(&err.to_string()))
    }

    fn malformed(&self, message: &str) -> ProviderError {
        ProviderError::MalformedResponse {
            resource: ResourceKind::Registry,
            name: self.config.resource_prefix.clone(),
            message: message.to_owned(),
        }
    }

    fn registry_error(&self, err: CallError) -> ProviderError {
        let message = match err {
            CallError::AlreadyExists(detail) | CallError::Failed(detail) => detail,
        };
        ProviderError::Unavailable {
            resource: ResourceKind::Registry,
            name: self.config.resource_prefix.clone(),
            message,
        }
    }
}

impl<R: CommandRunner> CloudProvider for AwsProvider<R> {
    fn sync(&self) -> Result<(), ProviderError> {
        self.ensure_bucket()?;
        self.ensure_repository()?;
        self.ensure_cluster()
    }

    fn registry_uri(&self) -> Result<String, ProviderError> {
        Ok(self.describe_repository()?.repository_uri.clone())
    }

    fn registry_auth(&self) -> Result<RegistryAuth, ProviderError> {
        let description = self.describe_repository()?;
        let output = self
            .call(
                Service::Ecr,
                "get-authorization-token",
                &["--registry-ids", description.registry_id.as_str()],
                &[],
            )
            .map_err(|err| self.registry_error(err))?;
        let response: AuthorizationTokenResponse = self.parse(&output)?;
        let data = response
            .authorization_data
            .into_iter()
            .next()
            .ok_or_else(|| self.malformed("get-authorization-token returned no data"))?;

        let decoded = BASE64_STANDARD
            .decode(data.authorization_token.trim())
            .map_err(|err| self.malformed(&format!("authorization token: {err}")))?;
        let token = String::from_utf8(decoded)
            .map_err(|err| self.malformed(&format!("authorization token: {err}")))?;
        let (username, password) = token
            .split_once(':')
            .ok_or_else(|| self.malformed("authorization token is not user:password"))?;

        Ok(RegistryAuth {
            username: username.to_owned(),
            password: password.to_owned(),
            registry_endpoint: data.proxy_endpoint,
            force_reauth: true,
        })
    }
}

fn owned_by_another_account(code: &str) -> bool {
    code == BUCKET_OWNED_ELSEWHERE
}

/// Extracts `Code` from the CLI's `An error occurred (Code) when calling ...`.
fn error_code(stderr: &str) -> Option<&str> {
    let (_, rest) = stderr.split_once("An error occurred (")?;
    let (code, _) = rest.split_once(')')?;
    Some(code)
}

//! BDD step definitions for provisioning.

use rstest_bdd_macros::{given, then, when};
use tapline::{CloudProvider, PipelineConfig, ProviderError, ResourceKind};

use super::test_helpers::ProvisionContext;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn check(condition: bool, message: impl FnOnce() -> String) -> Result<(), StepError> {
    if condition {
        Ok(())
    } else {
        Err(StepError::Assertion(message()))
    }
}

#[given("an empty AWS account")]
fn empty_account(provision_context: &ProvisionContext) {
    assert!(provision_context.account.invocations().is_empty());
}

#[given("a pipeline named \"{name}\" in region \"{region}\"")]
fn pipeline_named(provision_context: &ProvisionContext, name: String, region: String) {
    let yaml = format!(
        "name: {name}\ncloud:\n  provider: aws\n  region: {region}\n\
         taps:\n  tap-csv:\n    repo: https://example.com/tap-csv.git\n"
    );
    let config = PipelineConfig::from_yaml_str(&yaml)
        .unwrap_or_else(|err| panic!("pipeline fixture should parse: {err}"));
    *provision_context.pipeline.borrow_mut() = Some(config);
}

#[given("\"{operation}\" fails with \"{code}\"")]
fn operation_fails(provision_context: &ProvisionContext, operation: String, code: String) {
    provision_context.account.fail_operation(&operation, &code);
}

#[when("I provision the infrastructure")]
fn provision(provision_context: &ProvisionContext) {
    let result = provision_context.provider().sync();
    *provision_context.result.borrow_mut() = Some(result);
}

#[when("I request registry credentials")]
fn request_credentials(provision_context: &ProvisionContext) {
    let result = provision_context.provider().registry_auth();
    *provision_context.auth.borrow_mut() = Some(result);
}

#[then("provisioning succeeds")]
fn provisioning_succeeds(provision_context: &ProvisionContext) -> Result<(), StepError> {
    match provision_context.result.borrow().as_ref() {
        Some(Ok(())) => Ok(()),
        Some(Err(err)) => Err(StepError::Assertion(format!(
            "expected success, got {err}"
        ))),
        None => Err(StepError::Assertion(String::from("nothing was provisioned"))),
    }
}

#[then("provisioning fails for registry repository \"{name}\"")]
fn provisioning_fails(provision_context: &ProvisionContext, name: String) -> Result<(), StepError> {
    match provision_context.result.borrow().as_ref() {
        Some(Err(ProviderError::Unavailable {
            resource,
            name: actual,
            message,
        })) => {
            check(*resource == ResourceKind::Registry, || {
                format!("expected a registry failure, got {resource}")
            })?;
            check(*actual == name, || {
                format!("expected resource {name:?}, got {actual:?}")
            })?;
            check(message.contains("AccessDeniedException"), || {
                format!("message should carry the provider code: {message}")
            })
        }
        other => Err(StepError::Assertion(format!(
            "expected an unavailable registry, got {other:?}"
        ))),
    }
}

#[then("the account has bucket \"{name}\"")]
fn has_bucket(provision_context: &ProvisionContext, name: String) -> Result<(), StepError> {
    check(provision_context.account.has_bucket(&name), || {
        format!("bucket {name} is missing")
    })
}

#[then("the account has repository \"{name}\"")]
fn has_repository(provision_context: &ProvisionContext, name: String) -> Result<(), StepError> {
    check(provision_context.account.has_repository(&name), || {
        format!("repository {name} is missing")
    })
}

#[then("the account has cluster \"{name}\"")]
fn has_cluster(provision_context: &ProvisionContext, name: String) -> Result<(), StepError> {
    check(provision_context.account.has_cluster(&name), || {
        format!("cluster {name} is missing")
    })
}

#[then("resources are created bucket first, then repository, then cluster")]
fn creation_order(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let operations = provision_context.account.operations();
    let expected = [
        "s3api create-bucket",
        "ecr create-repository",
        "ecs create-cluster",
    ];
    check(operations == expected, || {
        format!("unexpected call order: {operations:?}")
    })
}

#[then("\"{operation}\" was called \"{count}\" times")]
fn called_times(
    provision_context: &ProvisionContext,
    operation: String,
    count: usize,
) -> Result<(), StepError> {
    let calls = provision_context.account.count(&operation);
    check(calls == count, || {
        format!("expected {count} calls to {operation}, saw {calls}")
    })
}

#[then("the registry user is \"{user}\"")]
fn registry_user(provision_context: &ProvisionContext, user: String) -> Result<(), StepError> {
    match provision_context.auth.borrow().as_ref() {
        Some(Ok(auth)) => check(auth.username == user, || {
            format!("expected user {user:?}, got {:?}", auth.username)
        }),
        other => Err(StepError::Assertion(format!(
            "expected credentials, got {other:?}"
        ))),
    }
}

#[then("the registry endpoint is in region \"{region}\"")]
fn registry_region(provision_context: &ProvisionContext, region: String) -> Result<(), StepError> {
    match provision_context.auth.borrow().as_ref() {
        Some(Ok(auth)) => {
            let marker = format!(".{region}.");
            check(auth.registry_endpoint.contains(&marker), || {
                format!("endpoint {} is not in {region}", auth.registry_endpoint)
            })
        }
        other => Err(StepError::Assertion(format!(
            "expected credentials, got {other:?}"
        ))),
    }
}

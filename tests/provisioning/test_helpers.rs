//! Shared fixtures for provisioning scenarios.

use std::cell::RefCell;
use std::rc::Rc;

use rstest::fixture;
use tapline::provider::{DEFAULT_AWS_BIN, DEFAULT_CAPACITY_PROVIDER};
use tapline::test_support::FakeAwsCli;
use tapline::{
    DEFAULT_LOCAL_NAMESPACE, PipelineConfig, Provider, ProviderError, RegistryAuth, ToolConfig,
};

#[derive(Clone, Debug)]
pub struct ProvisionContext {
    pub account: FakeAwsCli,
    pub pipeline: Rc<RefCell<Option<PipelineConfig>>>,
    pub result: Rc<RefCell<Option<Result<(), ProviderError>>>>,
    pub auth: Rc<RefCell<Option<Result<RegistryAuth, ProviderError>>>>,
}

impl ProvisionContext {
    pub fn provider(&self) -> Provider<FakeAwsCli> {
        let pipeline = self
            .pipeline
            .borrow()
            .clone()
            .unwrap_or_else(|| panic!("a pipeline step must load the configuration first"));
        let config = pipeline
            .provider_config()
            .unwrap_or_else(|err| panic!("provider config should resolve: {err}"));
        Provider::new(config, &tool_config(), self.account.clone())
    }
}

pub fn tool_config() -> ToolConfig {
    ToolConfig {
        docker_bin: String::from("docker"),
        aws_bin: DEFAULT_AWS_BIN.to_owned(),
        local_namespace: DEFAULT_LOCAL_NAMESPACE.to_owned(),
        aws_profile: None,
        capacity_provider: DEFAULT_CAPACITY_PROVIDER.to_owned(),
    }
}

#[fixture]
pub fn provision_context() -> ProvisionContext {
    ProvisionContext {
        account: FakeAwsCli::new(),
        pipeline: Rc::new(RefCell::new(None)),
        result: Rc::new(RefCell::new(None)),
        auth: Rc::new(RefCell::new(None)),
    }
}

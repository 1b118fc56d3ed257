//! BDD scenarios for provisioning.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisionContext, provision_context};

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Provision a fresh account"
)]
fn scenario_fresh_account(provision_context: ProvisionContext) {
    drop(provision_context);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Provision an account that already has every resource"
)]
fn scenario_repeat_provisioning(provision_context: ProvisionContext) {
    drop(provision_context);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Surface provider errors with resource context"
)]
fn scenario_provider_error(provision_context: ProvisionContext) {
    drop(provision_context);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Resolve registry credentials"
)]
fn scenario_registry_credentials(provision_context: ProvisionContext) {
    drop(provision_context);
}

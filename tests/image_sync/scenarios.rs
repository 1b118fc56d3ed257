//! BDD scenarios for image synchronisation.

use rstest_bdd_macros::scenario;

use super::test_helpers::{SyncContext, sync_context};

#[scenario(
    path = "tests/features/image_sync.feature",
    name = "Build and publish a new pipeline image"
)]
fn scenario_cache_miss(sync_context: SyncContext) {
    drop(sync_context);
}

#[scenario(
    path = "tests/features/image_sync.feature",
    name = "Reuse an image that is already published"
)]
fn scenario_cache_hit(sync_context: SyncContext) {
    drop(sync_context);
}

#[scenario(
    path = "tests/features/image_sync.feature",
    name = "Publish a local image missing from the registry"
)]
fn scenario_local_only(sync_context: SyncContext) {
    drop(sync_context);
}

#[scenario(
    path = "tests/features/image_sync.feature",
    name = "Force a rebuild of a published image"
)]
fn scenario_forced_rebuild(sync_context: SyncContext) {
    drop(sync_context);
}

#[scenario(
    path = "tests/features/image_sync.feature",
    name = "Pull an image that only exists in the registry"
)]
fn scenario_remote_only(sync_context: SyncContext) {
    drop(sync_context);
}

#[scenario(
    path = "tests/features/image_sync.feature",
    name = "Stop at the first build error"
)]
fn scenario_build_error(sync_context: SyncContext) {
    drop(sync_context);
}

#[scenario(
    path = "tests/features/image_sync.feature",
    name = "Identical configuration renders an identical fingerprint"
)]
fn scenario_stable_fingerprint(sync_context: SyncContext) {
    drop(sync_context);
}

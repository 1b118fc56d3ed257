//! BDD step definitions for image synchronisation.

use rstest_bdd_macros::{given, then, when};
use tapline::test_support::EngineCall;
use tapline::{ImageSyncError, ImageSynchronizer, PipelineConfig, RecipeBuilder, StreamMessage};

use super::test_helpers::{LOCAL_NAMESPACE, SyncContext, pipeline_yaml};

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

#[given("a pipeline with tap \"{tap}\" from \"{repo}\"")]
fn pipeline_with_tap(sync_context: &SyncContext, tap: String, repo: String) {
    let config = PipelineConfig::from_yaml_str(&pipeline_yaml(&tap, &repo))
        .unwrap_or_else(|err| panic!("pipeline fixture should parse: {err}"));
    let recipe = RecipeBuilder::new()
        .render(&config)
        .unwrap_or_else(|err| panic!("pipeline fixture should render: {err}"));
    *sync_context.recipe.borrow_mut() = Some(recipe);
}

#[given("the image exists locally")]
fn image_exists_locally(sync_context: &SyncContext) {
    sync_context.engine.add_local_image(&sync_context.local_uri());
}

#[given("the image exists in the registry")]
fn image_exists_remotely(sync_context: &SyncContext) {
    sync_context.engine.add_remote_image(&sync_context.remote_uri());
}

#[given("a forced rebuild is requested")]
fn forced_rebuild(sync_context: &SyncContext) {
    let mut options = sync_context.options.get();
    options.force_new_image = true;
    sync_context.options.set(options);
}

#[given("the build reports \"{message}\" after one progress line")]
fn build_reports_error(sync_context: &SyncContext, message: String) {
    sync_context.engine.script_build(vec![
        StreamMessage::Progress(String::from("#1 [internal] load build definition")),
        StreamMessage::Error(message),
        StreamMessage::Progress(String::from("#2 unreachable")),
    ]);
}

#[when("I synchronise the image")]
fn synchronise(sync_context: &SyncContext) {
    let synchronizer = ImageSynchronizer::new(
        sync_context.engine.clone(),
        sync_context.provider.clone(),
        LOCAL_NAMESPACE,
    )
    .with_options(sync_context.options.get());
    let result = synchronizer.sync_image(&sync_context.recipe());
    *sync_context.outcome.borrow_mut() = Some(result);
}

#[when("I render the recipe again")]
fn render_again(sync_context: &SyncContext) {
    let config = PipelineConfig::from_yaml_str(&pipeline_yaml(
        "tap-csv",
        "https://example.com/tap-csv.git",
    ))
    .unwrap_or_else(|err| panic!("pipeline fixture should parse: {err}"));
    let recipe = RecipeBuilder::new()
        .render(&config)
        .unwrap_or_else(|err| panic!("pipeline fixture should render: {err}"));
    *sync_context.rerendered.borrow_mut() = Some(recipe);
}

#[then("synchronisation succeeds")]
fn synchronisation_succeeds(sync_context: &SyncContext) -> Result<(), StepError> {
    match sync_context.outcome.borrow().as_ref() {
        Some(Ok(_)) => Ok(()),
        Some(Err(err)) => Err(StepError::Assertion(format!(
            "expected success, got {err}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("synchronisation fails with \"{message}\"")]
fn synchronisation_fails(sync_context: &SyncContext, message: String) -> Result<(), StepError> {
    match sync_context.outcome.borrow().as_ref() {
        Some(Err(ImageSyncError::BuildFailure { message: actual })) => check(
            *actual == message,
            || format!("expected build failure {message:?}, got {actual:?}"),
        ),
        other => Err(StepError::Assertion(format!(
            "expected build failure, got {other:?}"
        ))),
    }
}

#[then("the image is built \"{count}\" times")]
fn built_times(sync_context: &SyncContext, count: usize) -> Result<(), StepError> {
    let builds = sync_context.engine.builds();
    check(builds == count, || format!("expected {count} builds, saw {builds}"))
}

#[then("the image is pushed \"{count}\" times")]
fn pushed_times(sync_context: &SyncContext, count: usize) -> Result<(), StepError> {
    let pushes = sync_context.engine.pushes();
    check(pushes == count, || format!("expected {count} pushes, saw {pushes}"))
}

#[then("the image is pulled \"{count}\" times")]
fn pulled_times(sync_context: &SyncContext, count: usize) -> Result<(), StepError> {
    let pulls = sync_context.engine.pulls();
    check(pulls == count, || format!("expected {count} pulls, saw {pulls}"))
}

#[then("the build happens before the push")]
fn build_before_push(sync_context: &SyncContext) -> Result<(), StepError> {
    let calls = sync_context.engine.calls();
    let build = calls
        .iter()
        .position(|call| matches!(call, EngineCall::Build { .. }));
    let push = calls
        .iter()
        .position(|call| matches!(call, EngineCall::Push(_)));
    match (build, push) {
        (Some(build_index), Some(push_index)) => check(build_index < push_index, || {
            format!("build should precede push: {calls:?}")
        }),
        _ => Err(StepError::Assertion(format!(
            "expected both a build and a push: {calls:?}"
        ))),
    }
}

#[then("the image is available locally")]
fn available_locally(sync_context: &SyncContext) -> Result<(), StepError> {
    let local_uri = sync_context.local_uri();
    check(sync_context.engine.has_local(&local_uri), || {
        format!("{local_uri} should be in the local store")
    })
}

#[then("\"{count}\" stream messages were consumed")]
fn messages_consumed(sync_context: &SyncContext, count: usize) -> Result<(), StepError> {
    let consumed = sync_context.engine.consumed_messages();
    check(consumed == count, || {
        format!("expected {count} consumed messages, saw {consumed}")
    })
}

#[then("both fingerprints match")]
fn fingerprints_match(sync_context: &SyncContext) -> Result<(), StepError> {
    let first = sync_context.recipe();
    let second = sync_context
        .rerendered
        .borrow()
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("recipe was not rendered again")))?;
    check(first.as_str() == second.as_str(), || {
        String::from("recipes should be byte-identical")
    })?;
    check(first.fingerprint() == second.fingerprint(), || {
        format!(
            "fingerprints differ: {} vs {}",
            first.fingerprint(),
            second.fingerprint()
        )
    })
}

#[then("the recipe installs \"{tap}\" exactly once")]
fn installs_once(sync_context: &SyncContext, tap: String) -> Result<(), StepError> {
    let recipe = sync_context.recipe();
    let marker = format!("mkdir {tap} ");
    let occurrences = recipe.as_str().matches(marker.as_str()).count();
    check(occurrences == 1, || {
        format!("expected one install block for {tap}, found {occurrences}")
    })
}

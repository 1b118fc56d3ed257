//! Unit tests for recipe rendering.

use super::*;
use crate::pipeline::{CloudSettings, ComponentSet};
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

fn quoted(value: &str) -> String {
    escape(value.into()).into_owned()
}

fn config_with(taps: ComponentSet, targets: ComponentSet) -> PipelineConfig {
    PipelineConfig {
        name: String::from("analytics"),
        cloud: CloudSettings {
            provider: String::from("aws"),
            region: None,
            bucket_name: None,
        },
        taps,
        targets,
    }
}

#[fixture]
fn single_tap() -> PipelineConfig {
    config_with(
        ComponentSet::from_entries([("tap-csv", Some("https://example.com/tap-csv.git"))]),
        ComponentSet::default(),
    )
}

#[fixture]
fn tap_and_target() -> PipelineConfig {
    config_with(
        ComponentSet::from_entries([
            ("tap-csv", Some("https://example.com/tap-csv.git")),
            ("tap-zendesk", Some("https://example.com/tap-zendesk.git")),
        ]),
        ComponentSet::from_entries([(
            "target-postgres",
            Some("https://example.com/target-postgres.git"),
        )]),
    )
}

#[rstest]
fn single_tap_renders_one_install_block(single_tap: PipelineConfig) {
    let recipe = RecipeBuilder::new().render(&single_tap).expect("render");
    let text = recipe.as_str();

    let clone = format!(
        "git clone {} tap-csv",
        quoted("https://example.com/tap-csv.git")
    );
    assert_eq!(text.matches(clone.as_str()).count(), 1);
    assert_eq!(text.matches("virtualenv virtualenvs/tap-csv").count(), 1);
    assert!(text.contains("virtualenvs/tap-csv/bin/pip install ./tap-csv/"));
    assert_eq!(
        recipe.fingerprint(),
        RecipeBuilder::new().render(&single_tap).expect("render").fingerprint()
    );
}

#[rstest]
fn preamble_pins_base_image_and_runner_release(single_tap: PipelineConfig) {
    let recipe = RecipeBuilder::new().render(&single_tap).expect("render");
    let text = recipe.as_str();

    assert!(text.starts_with(&format!("FROM {BASE_IMAGE}\n")));
    assert!(text.contains(&format!(
        "git clone --branch {RUNNER_VERSION} {} singer-runner",
        quoted(RUNNER_REPOSITORY)
    )));
}

#[rstest]
fn taps_render_before_targets(tap_and_target: PipelineConfig) {
    let recipe = RecipeBuilder::new().render(&tap_and_target).expect("render");
    let text = recipe.as_str();
    let position = |needle: &str| {
        text.find(needle)
            .unwrap_or_else(|| panic!("{needle} missing from recipe"))
    };

    assert!(position("mkdir tap-csv") < position("mkdir tap-zendesk"));
    assert!(position("mkdir tap-zendesk") < position("mkdir target-postgres"));
}

#[rstest]
fn install_steps_form_one_continued_instruction(tap_and_target: PipelineConfig) {
    let recipe = RecipeBuilder::new().render(&tap_and_target).expect("render");
    let install = recipe
        .as_str()
        .split("\nRUN ")
        .last()
        .expect("install instruction present");

    for line in install.lines().rev().skip(1) {
        assert!(line.ends_with(" && \\"), "line is not continued: {line:?}");
    }
}

#[rstest]
fn rendering_is_byte_identical(tap_and_target: PipelineConfig) {
    let builder = RecipeBuilder::new();
    assert_eq!(
        builder.render(&tap_and_target).expect("render"),
        builder.render(&tap_and_target).expect("render")
    );
}

#[rstest]
fn changing_a_repository_changes_the_fingerprint(single_tap: PipelineConfig) {
    let changed = config_with(
        ComponentSet::from_entries([("tap-csv", Some("https://example.com/fork/tap-csv.git"))]),
        ComponentSet::default(),
    );
    let builder = RecipeBuilder::new();
    assert_ne!(
        builder.render(&single_tap).expect("render").fingerprint(),
        builder.render(&changed).expect("render").fingerprint()
    );
}

#[rstest]
fn adding_a_component_changes_the_fingerprint(single_tap: PipelineConfig) {
    let extended = config_with(
        ComponentSet::from_entries([("tap-csv", Some("https://example.com/tap-csv.git"))]),
        ComponentSet::from_entries([("target-csv", Some("https://example.com/target-csv.git"))]),
    );
    let builder = RecipeBuilder::new();
    assert_ne!(
        builder.render(&single_tap).expect("render").fingerprint(),
        builder.render(&extended).expect("render").fingerprint()
    );
}

#[rstest]
fn reordering_components_changes_the_fingerprint() {
    let forward = config_with(
        ComponentSet::from_entries([("tap-a", Some("https://a")), ("tap-b", Some("https://b"))]),
        ComponentSet::default(),
    );
    let reversed = config_with(
        ComponentSet::from_entries([("tap-b", Some("https://b")), ("tap-a", Some("https://a"))]),
        ComponentSet::default(),
    );
    let builder = RecipeBuilder::new();
    assert_ne!(
        builder.render(&forward).expect("render").fingerprint(),
        builder.render(&reversed).expect("render").fingerprint()
    );
}

#[rstest]
fn empty_configuration_renders_preamble_only() {
    let recipe = RecipeBuilder::new()
        .render(&config_with(ComponentSet::default(), ComponentSet::default()))
        .expect("render");
    assert_eq!(recipe.as_str().matches("\nRUN ").count(), 3);
    assert!(recipe.as_str().ends_with("./singer-runner/\n"));
}

#[rstest]
fn missing_repo_is_a_configuration_error() {
    let config = config_with(
        ComponentSet::default(),
        ComponentSet::from_entries([("target-csv", None::<&str>)]),
    );
    let err = RecipeBuilder::new().render(&config).expect_err("repo missing");
    assert_eq!(
        err,
        ConfigurationError::MissingRepo {
            kind: ComponentKind::Target,
            name: String::from("target-csv"),
        }
    );
}

#[rstest]
#[case::runner_as_tap(RUNNER_DIR, ComponentKind::Tap)]
#[case::environments_as_target(ENVIRONMENTS_DIR, ComponentKind::Target)]
fn preamble_directories_cannot_be_component_names(
    #[case] name: &str,
    #[case] kind: ComponentKind,
) {
    let set = ComponentSet::from_entries([(name, Some("https://example.com/x.git"))]);
    let config = match kind {
        ComponentKind::Tap => config_with(set, ComponentSet::default()),
        ComponentKind::Target => config_with(ComponentSet::default(), set),
    };

    let err = RecipeBuilder::new()
        .render(&config)
        .expect_err("reserved name must not render");

    assert_eq!(
        err,
        ConfigurationError::ReservedComponentName {
            kind,
            name: name.to_owned(),
        }
    );
}

#[rstest]
fn tap_and_target_sharing_a_name_do_not_render() {
    let config = config_with(
        ComponentSet::from_entries([("shared", Some("https://example.com/a.git"))]),
        ComponentSet::from_entries([("shared", Some("https://example.com/b.git"))]),
    );

    let err = RecipeBuilder::new()
        .render(&config)
        .expect_err("shared name must not render");

    assert_eq!(err, ConfigurationError::SharedComponentName(String::from("shared")));
}

#[rstest]
fn repository_urls_are_shell_quoted() {
    let config = config_with(
        ComponentSet::from_entries([("tap-x", Some("https://example.com/x.git; rm -rf /"))]),
        ComponentSet::default(),
    );
    let recipe = RecipeBuilder::new().render(&config).expect("render");
    assert!(
        recipe
            .as_str()
            .contains("git clone 'https://example.com/x.git; rm -rf /' tap-x")
    );
}

#[rstest]
fn write_to_creates_dockerfile(single_tap: PipelineConfig) {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let dir = Utf8PathBuf::from_path_buf(tmp.path().join("build"))
        .unwrap_or_else(|path| panic!("non-utf8 path: {}", path.display()));
    let recipe = RecipeBuilder::new().render(&single_tap).expect("render");

    let written = recipe.write_to(&dir).expect("write recipe");

    assert_eq!(written, dir.join(RECIPE_FILE_NAME));
    let contents = std::fs::read_to_string(&written).expect("read recipe");
    assert_eq!(contents, recipe.as_str());
}

//! Shared fixtures for image synchronisation scenarios.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rstest::fixture;
use tapline::test_support::{FakeEngine, FakeProvider};
use tapline::{BuildRecipe, ImageSyncError, SyncOptions, SyncOutcome};

pub const REGISTRY: &str = "123456789012.dkr.ecr.us-east-1.amazonaws.com/analytics";
pub const LOCAL_NAMESPACE: &str = "tapline";

#[derive(Clone, Debug)]
pub struct SyncContext {
    pub engine: FakeEngine,
    pub provider: FakeProvider,
    pub options: Rc<Cell<SyncOptions>>,
    pub recipe: Rc<RefCell<Option<BuildRecipe>>>,
    pub rerendered: Rc<RefCell<Option<BuildRecipe>>>,
    pub outcome: Rc<RefCell<Option<Result<SyncOutcome, ImageSyncError>>>>,
}

impl SyncContext {
    pub fn recipe(&self) -> BuildRecipe {
        self.recipe
            .borrow()
            .clone()
            .unwrap_or_else(|| panic!("a pipeline step must render the recipe first"))
    }

    pub fn local_uri(&self) -> String {
        format!("{LOCAL_NAMESPACE}:{}", self.recipe().fingerprint())
    }

    pub fn remote_uri(&self) -> String {
        format!("{REGISTRY}:{}", self.recipe().fingerprint())
    }
}

#[fixture]
pub fn sync_context() -> SyncContext {
    SyncContext {
        engine: FakeEngine::new(),
        provider: FakeProvider::new(REGISTRY),
        options: Rc::new(Cell::new(SyncOptions::default())),
        recipe: Rc::new(RefCell::new(None)),
        rerendered: Rc::new(RefCell::new(None)),
        outcome: Rc::new(RefCell::new(None)),
    }
}

pub fn pipeline_yaml(tap: &str, repo: &str) -> String {
    format!(
        "name: analytics\n\
         cloud:\n  provider: aws\n  region: us-east-1\n\
         taps:\n  {tap}:\n    repo: {repo}\n\
         targets:\n  target-jsonl:\n    repo: https://example.com/target-jsonl.git\n"
    )
}

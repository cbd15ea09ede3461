//! Test fixture for integration testing

use std::path::{Path, PathBuf};

use tracing::info;

use crate::backend::HeadlessBackend;
use crate::display::Display;
use crate::engine::Engine;
use crate::props::RulesNames;
use crate::rec::ConfigRec;
use crate::registry::ConfigRegistry;

/// Test fixture for integration testing
///
/// Owns an engine bound to a headless display. The catalog is the registry under
/// `data/`, loaded with extras and without localization so descriptions are stable.
pub struct Fixture {
    engine: Engine,
}

impl Fixture {
    /// Fixture whose server starts with `evdev`, `pc105` and the `us` layout.
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_layouts(&["us"])
    }

    /// Fixture whose server starts with `layouts`, all without variants.
    pub fn with_layouts(layouts: &[&str]) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = ConfigRec::new();
        config.set_model("pc105");
        config.set_layouts(layouts.iter().copied());
        config.set_variants(layouts.iter().map(|_| ""));
        Self::with_seed(RulesNames::new("evdev", config))
    }

    pub fn with_seed(seed: RulesNames) -> Result<Self, Box<dyn std::error::Error>> {
        let mut catalog = ConfigRegistry::with_search_path(seed.rules.clone(), vec![Self::data_dir()]);
        catalog.set_languages(Vec::new());
        catalog.load(true)?;

        let display = Display::headless(":test", catalog, &seed)?;
        let engine = Engine::new(display)?;

        info!("Test fixture initialized with headless backend");
        Ok(Self { engine })
    }

    /// Registry data shipped with the crate
    pub fn data_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("data")
    }

    pub fn engine(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn engine_ref(&self) -> &Engine {
        &self.engine
    }

    /// A fresh, loaded registry bound to the fixture's engine.
    pub fn registry(&self) -> crate::Result<ConfigRegistry> {
        let mut registry = ConfigRegistry::new(&self.engine);
        registry.set_languages(Vec::new());
        registry.load(true)?;
        Ok(registry)
    }

    /// The configuration currently stored on the server, read into a fresh record.
    pub fn server_config(&self) -> crate::Result<ConfigRec> {
        let mut rec = ConfigRec::new();
        rec.get_from_server(&self.engine)?;
        Ok(rec)
    }

    /// Lock `group` on the server without going through the engine.
    pub fn simulate_group_change(&mut self, group: usize) {
        if let Some(headless) = self.headless_mut() {
            headless.set_server_group(group);
        }
    }

    /// Make server reads fail (or succeed again).
    pub fn fail_reads(&mut self, fail: bool) {
        if let Some(headless) = self.headless_mut() {
            headless.set_fail_reads(fail);
        }
    }

    /// Make keyboard state reads fail (or succeed again).
    pub fn fail_state_reads(&mut self, fail: bool) {
        if let Some(headless) = self.headless_mut() {
            headless.set_fail_state_reads(fail);
        }
    }

    /// Make keyboard state writes fail (or succeed again).
    pub fn fail_state_writes(&mut self, fail: bool) {
        if let Some(headless) = self.headless_mut() {
            headless.set_fail_state_writes(fail);
        }
    }

    fn headless_mut(&mut self) -> Option<&mut HeadlessBackend> {
        self.engine.display_mut().backend_mut().as_headless_mut()
    }
}

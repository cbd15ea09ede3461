//! Display connections.

use std::path::PathBuf;

use tracing::info;

use crate::backend::{Backend, HeadlessBackend, XkbBackend};
use crate::config::{BackendKind, Settings};
use crate::error::Result;
use crate::props::RulesNames;
use crate::registry::ConfigRegistry;

/// A connection to the keyboard server of one display.
pub struct Display {
    name: String,
    backend: Backend,
    registry_search_path: Vec<PathBuf>,
}

impl Display {
    /// Connect to the display named in `settings` through the configured backend.
    pub fn open(settings: &Settings) -> Result<Self> {
        let search_path = settings.registry_search_path();
        let backend = match settings.backend {
            BackendKind::Xkb => Backend::Xkb(XkbBackend::open(
                settings.server_dir(),
                &settings.xkb_base,
                &settings.seed,
            )?),
            BackendKind::Headless => {
                let mut catalog =
                    ConfigRegistry::with_search_path(settings.seed.rules.clone(), search_path.clone());
                catalog.load(true)?;
                Backend::Headless(HeadlessBackend::new(catalog, &settings.seed)?)
            }
        };

        info!("Opened display {} ({} backend)", settings.display, backend.name());
        Ok(Self {
            name: settings.display.clone(),
            backend,
            registry_search_path: search_path,
        })
    }

    /// An in-memory display validated against `catalog`.
    pub fn headless(name: impl Into<String>, catalog: ConfigRegistry, seed: &RulesNames) -> Result<Self> {
        let mut registry_search_path: Vec<PathBuf> = catalog
            .sources()
            .iter()
            .filter_map(|source| source.parent().map(PathBuf::from))
            .collect();
        registry_search_path.dedup();
        Ok(Self {
            name: name.into(),
            backend: Backend::Headless(HeadlessBackend::new(catalog, seed)?),
            registry_search_path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut Backend {
        &mut self.backend
    }

    /// Directories a registry for this display is looked up in.
    pub fn registry_search_path(&self) -> &[PathBuf] {
        &self.registry_search_path
    }
}

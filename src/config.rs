//! Settings resolved from the environment.

use std::path::{Path, PathBuf};

use crate::props::RulesNames;
use crate::rec::ConfigRec;

/// Default XKB data root
const XKB_BASE: &str = "/usr/share/X11/xkb";

/// Directory under the runtime dir holding per-display server state
const SERVER_DIR_NAME: &str = "xkl";

/// Which keyboard server a display talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Persistent server state, keymaps compiled by xkbcommon
    Xkb,
    /// In-memory server validated against the registry
    Headless,
}

impl BackendKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "xkb" => Some(BackendKind::Xkb),
            "headless" => Some(BackendKind::Headless),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub display: String,
    pub backend: BackendKind,
    /// XKB data root (`rules/`, `symbols/`, ...)
    pub xkb_base: PathBuf,
    pub runtime_dir: PathBuf,
    /// Directories searched for registry XML before `<xkb_base>/rules`
    pub registry_path: Vec<PathBuf>,
    /// Configuration a fresh server starts with
    pub seed: RulesNames,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let backend = match non_empty("XKL_BACKEND") {
            Some(value) => BackendKind::parse(&value).unwrap_or_else(|| {
                tracing::warn!("Unknown XKL_BACKEND '{}', using xkb", value);
                BackendKind::Xkb
            }),
            None => BackendKind::Xkb,
        };

        let registry_path = non_empty("XKL_REGISTRY_PATH")
            .map(|value| {
                value
                    .split(':')
                    .filter(|dir| !dir.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        let mut seed = ConfigRec::new();
        seed.set_model(non_empty("XKB_DEFAULT_MODEL").unwrap_or_else(|| "pc105".into()));
        seed.set_layouts(
            non_empty("XKB_DEFAULT_LAYOUT")
                .unwrap_or_else(|| "us".into())
                .split(','),
        );
        seed.set_variants(
            lookup("XKB_DEFAULT_VARIANT")
                .unwrap_or_default()
                .split(',')
                .chain(std::iter::repeat(""))
                .take(seed.layouts.len()),
        );
        if let Some(options) = non_empty("XKB_DEFAULT_OPTIONS") {
            seed.set_options(options.split(','));
        }

        Self {
            display: non_empty("DISPLAY").unwrap_or_else(|| ":0".into()),
            backend,
            xkb_base: non_empty("XKB_CONFIG_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(XKB_BASE)),
            runtime_dir: non_empty("XDG_RUNTIME_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp")),
            registry_path,
            seed: RulesNames::new(
                non_empty("XKB_DEFAULT_RULES").unwrap_or_else(|| "evdev".into()),
                seed,
            ),
        }
    }

    /// Put `dir` in front of the registry search path.
    pub fn prepend_registry_dir(&mut self, dir: impl Into<PathBuf>) {
        self.registry_path.insert(0, dir.into());
    }

    /// Directories searched for registry XML, in order.
    pub fn registry_search_path(&self) -> Vec<PathBuf> {
        let mut path = self.registry_path.clone();
        path.push(self.xkb_base.join("rules"));
        path
    }

    /// Directory holding the persistent server state of this display.
    pub fn server_dir(&self) -> PathBuf {
        self.runtime_dir
            .join(SERVER_DIR_NAME)
            .join(sanitize_display(&self.display))
    }
}

/// `:0` -> `0`, `host:1.0` -> `host_1.0`
fn sanitize_display(display: &str) -> String {
    let trimmed = display.strip_prefix(':').unwrap_or(display);
    trimmed
        .chars()
        .map(|c| if c == ':' || c == '/' { '_' } else { c })
        .collect()
}

/// First existing `<dir>/<file_name>` along `search_path`.
pub fn find_in_path(search_path: &[PathBuf], file_name: &str) -> Option<PathBuf> {
    search_path
        .iter()
        .map(|dir| dir.join(file_name))
        .find(|candidate| Path::new(candidate).is_file())
}

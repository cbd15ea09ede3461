//! Xkb backend: persistent server state, keymaps compiled by xkbcommon.
//!
//! Layout of the server directory (`$XDG_RUNTIME_DIR/xkl/<display>/`):
//!
//! ```text
//! props/_XKB_RULES_NAMES          encoded rules names
//! props/_XKB_RULES_NAMES_BACKUP   saved copy, when backed up
//! keyboard.json                   {"group": 0, "indicators": 0}
//! ```
//!
//! Every write goes to a temporary file first and is renamed into place, so another
//! process never sees a partial property.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use smithay::input::keyboard::xkb;
use tracing::{debug, info, warn};

use super::KeymapInfo;
use crate::engine::State;
use crate::error::{Error, Result};
use crate::props::{merge_by_comma, RulesNames, RULES_NAMES_PROP};

const PROPS_DIR: &str = "props";
const STATE_FILE: &str = "keyboard.json";

pub struct XkbBackend {
    dir: PathBuf,
    xkb_base: PathBuf,
}

impl XkbBackend {
    /// Open the server state in `dir`, creating it with `seed` as the active configuration
    /// when the display has none yet.
    pub fn open(dir: impl Into<PathBuf>, xkb_base: impl Into<PathBuf>, seed: &RulesNames) -> Result<Self> {
        let backend = Self {
            dir: dir.into(),
            xkb_base: xkb_base.into(),
        };
        let props = backend.dir.join(PROPS_DIR);
        fs::create_dir_all(&props).map_err(|e| Error::io(&props, e))?;

        if backend.read_property(RULES_NAMES_PROP)?.is_none() {
            info!(
                "Seeding server in {} with {:?}",
                backend.dir.display(),
                seed.config.layouts
            );
            backend.write_property(RULES_NAMES_PROP, &seed.encode()?)?;
        }
        Ok(backend)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn read_property(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.property_path(name);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    pub fn write_property(&self, name: &str, data: &[u8]) -> Result<()> {
        write_atomic(&self.property_path(name), data)
    }

    /// Keyboard state; a server that never stored one is in group 0 with no indicators.
    pub fn read_state(&self) -> Result<State> {
        let path = self.dir.join(STATE_FILE);
        match fs::read(&path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(State::default()),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    pub fn write_state(&self, state: State) -> Result<()> {
        let data = serde_json::to_vec(&state)?;
        write_atomic(&self.dir.join(STATE_FILE), &data)
    }

    pub fn compile(&self, names: &RulesNames) -> Result<KeymapInfo> {
        let keymap = self.compile_keymap(names)?;
        let groups_names = (0..keymap.num_layouts())
            .map(|idx| keymap.layout_get_name(idx).to_string())
            .collect();
        let indicators_names = (0..keymap.num_leds())
            .map(|idx| keymap.led_get_name(idx).to_string())
            .collect();
        Ok(KeymapInfo {
            groups_names,
            indicators_names,
        })
    }

    pub fn keymap_text(&self, names: &RulesNames) -> Result<String> {
        let keymap = self.compile_keymap(names)?;
        Ok(keymap.get_as_string(xkb::KEYMAP_FORMAT_TEXT_V1))
    }

    fn compile_keymap(&self, names: &RulesNames) -> Result<xkb::Keymap> {
        // XKB_DEFAULT_* must not fill in fields the stored property leaves empty
        let mut context = xkb::Context::new(
            xkb::CONTEXT_NO_DEFAULT_INCLUDES | xkb::CONTEXT_NO_ENVIRONMENT_NAMES,
        );
        if !context.include_path_append(&self.xkb_base) {
            warn!("Could not add XKB include path {}", self.xkb_base.display());
        }

        let config = &names.config;
        let layout = merge_by_comma(&config.layouts);
        let variant = merge_by_comma(&config.variants);
        let options = (!config.options.is_empty()).then(|| merge_by_comma(&config.options));
        debug!(
            "Compiling keymap: rules {}, model {}, layout {}, variant {}, options {:?}",
            names.rules, config.model, layout, variant, options
        );

        xkb::Keymap::new_from_names(
            &context,
            names.rules.as_str(),
            config.model.as_str(),
            layout.as_str(),
            variant.as_str(),
            options,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )
        .ok_or_else(|| {
            Error::Keymap(format!(
                "xkbcommon rejected layouts '{}' with variants '{}'",
                layout, variant
            ))
        })
    }

    fn property_path(&self, name: &str) -> PathBuf {
        self.dir.join(PROPS_DIR).join(name)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("state");
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));
    fs::write(&tmp, data).map_err(|e| Error::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))
}

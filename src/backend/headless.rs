//! Headless backend for testing
//!
//! An in-memory keyboard server. Nothing is compiled: a configuration is accepted when
//! its model, layouts, variants and options are all known to the catalog registry.
//!
//! # Design Invariants
//!
//! 1. **No system access**: Never reads XKB data or runtime directories beyond the
//!    catalog it was given.
//!
//! 2. **Deterministic names**: Group names are registry descriptions and indicator names
//!    are fixed, so tests can assert on them.
//!
//! 3. **Fault simulation**: Out-of-band group changes and read failures can be injected.

use std::collections::HashMap;
use std::io;

use tracing::debug;

use super::KeymapInfo;
use crate::engine::State;
use crate::error::{Error, Result};
use crate::props::{RulesNames, RULES_NAMES_PROP};
use crate::registry::ConfigRegistry;

/// Indicators of the simulated keyboard
pub const INDICATOR_NAMES: [&str; 3] = ["Caps Lock", "Num Lock", "Scroll Lock"];

pub struct HeadlessBackend {
    catalog: ConfigRegistry,
    properties: HashMap<String, Vec<u8>>,
    state: State,
    fail_reads: bool,
    fail_state_reads: bool,
    fail_state_writes: bool,
}

impl HeadlessBackend {
    /// Create a server whose active configuration is `seed`.
    ///
    /// `catalog` must be loaded; it is the only source of truth for validation.
    pub fn new(catalog: ConfigRegistry, seed: &RulesNames) -> Result<Self> {
        if !catalog.is_loaded() {
            return Err(Error::RegistryNotLoaded);
        }
        let mut backend = Self {
            catalog,
            properties: HashMap::new(),
            state: State::default(),
            fail_reads: false,
            fail_state_reads: false,
            fail_state_writes: false,
        };
        backend.compile(seed)?;
        backend
            .properties
            .insert(RULES_NAMES_PROP.to_string(), seed.encode()?);
        Ok(backend)
    }

    pub fn catalog(&self) -> &ConfigRegistry {
        &self.catalog
    }

    pub fn read_property(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if self.fail_reads {
            return Err(Error::PropertyMissing(name.to_string()));
        }
        Ok(self.properties.get(name).cloned())
    }

    pub fn write_property(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.properties.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Vec<u8>> {
        self.properties.remove(name)
    }

    pub fn read_state(&self) -> Result<State> {
        if self.fail_state_reads {
            return Err(state_unavailable("read"));
        }
        Ok(self.state)
    }

    pub fn write_state(&mut self, state: State) -> Result<()> {
        if self.fail_state_writes {
            return Err(state_unavailable("write"));
        }
        self.state = state;
        Ok(())
    }

    /// Change the locked group behind the engine's back, as another client would.
    pub fn set_server_group(&mut self, group: usize) {
        debug!("Out-of-band group change to {}", group);
        self.state.group = group;
    }

    /// Make every property read fail until cleared.
    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Make keyboard state reads fail until cleared.
    pub fn set_fail_state_reads(&mut self, fail: bool) {
        self.fail_state_reads = fail;
    }

    /// Make keyboard state writes fail until cleared.
    pub fn set_fail_state_writes(&mut self, fail: bool) {
        self.fail_state_writes = fail;
    }

    pub fn compile(&self, names: &RulesNames) -> Result<KeymapInfo> {
        let config = &names.config;
        if !config.model.is_empty() && self.catalog.find_model(&config.model).is_none() {
            return Err(Error::Keymap(format!("unknown model '{}'", config.model)));
        }

        let mut groups_names = Vec::with_capacity(config.layouts.len());
        for (i, layout) in config.layouts.iter().enumerate() {
            let item = self
                .catalog
                .find_layout(layout)
                .ok_or_else(|| Error::Keymap(format!("unknown layout '{}'", layout)))?;
            let variant = config.variants.get(i).map(String::as_str).unwrap_or_default();
            let described = if variant.is_empty() {
                item
            } else {
                self.catalog.find_variant(layout, variant).ok_or_else(|| {
                    Error::Keymap(format!("unknown variant '{}' of layout '{}'", variant, layout))
                })?
            };
            let name = match described.description() {
                "" => described.name(),
                description => description,
            };
            groups_names.push(name.to_string());
        }

        for option in &config.options {
            let group = option.split(':').next().unwrap_or_default();
            if self.catalog.find_option(group, option).is_none() {
                return Err(Error::Keymap(format!("unknown option '{}'", option)));
            }
        }

        Ok(KeymapInfo {
            groups_names,
            indicators_names: INDICATOR_NAMES.iter().map(|name| name.to_string()).collect(),
        })
    }

    /// The component includes the configuration resolves to, in keymap syntax.
    pub fn keymap_text(&self, names: &RulesNames) -> Result<String> {
        self.compile(names)?;
        let config = &names.config;

        let mut symbols = String::from("pc");
        for (i, layout) in config.layouts.iter().enumerate() {
            symbols.push('+');
            symbols.push_str(layout);
            match config.variants.get(i).map(String::as_str) {
                Some("") | None => {}
                Some(variant) => symbols.push_str(&format!("({})", variant)),
            }
            if i > 0 {
                symbols.push_str(&format!(":{}", i + 1));
            }
        }
        let keycodes = if names.rules == "evdev" { "evdev" } else { "xfree86" };
        let model = if config.model.is_empty() { "pc105" } else { &config.model };

        let mut text = format!("// rules: {}\n", names.rules);
        if !config.options.is_empty() {
            text.push_str(&format!("// options: {}\n", config.options.join(",")));
        }
        text.push_str("xkb_keymap {\n");
        text.push_str(&format!("\txkb_keycodes {{ include \"{}+aliases(qwerty)\" }};\n", keycodes));
        text.push_str("\txkb_types { include \"complete\" };\n");
        text.push_str("\txkb_compat { include \"complete\" };\n");
        text.push_str(&format!("\txkb_symbols {{ include \"{}\" }};\n", symbols));
        text.push_str(&format!("\txkb_geometry {{ include \"pc({})\" }};\n", model));
        text.push_str("};\n");
        Ok(text)
    }
}

fn state_unavailable(access: &str) -> Error {
    Error::io(
        "headless keyboard state",
        io::Error::new(io::ErrorKind::Other, format!("simulated {} failure", access)),
    )
}

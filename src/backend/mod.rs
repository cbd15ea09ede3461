//! Backend abstraction layer
//!
//! A backend is the keyboard "server" behind a display:
//!
//! - **Xkb backend** (`xkb`): Server state persisted as files in a runtime directory,
//!   shared between processes. Keymaps are compiled by xkbcommon against the system
//!   XKB data, which is what accepts or rejects a configuration.
//!
//! - **Headless backend** (`headless`): In-memory server for tests and demos.
//!   Configurations are validated against a loaded registry instead of compiled.
//!
//! # Design Invariants
//!
//! 1. **Whole-record activation**: `compile` runs before any property is written, so a
//!    rejected configuration never reaches the server.
//!
//! 2. **Opaque properties**: Backends store property bytes as given. Encoding and
//!    normalization belong to the engine and the `props` codec.

pub mod headless;
pub mod xkb;

pub use headless::HeadlessBackend;
pub use xkb::XkbBackend;

use crate::engine::{Features, State};
use crate::error::Result;
use crate::props::RulesNames;

/// Core keyboard groups limit
pub const MAX_NUM_GROUPS: usize = 4;

/// Names derived from a configuration the backend accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeymapInfo {
    pub groups_names: Vec<String>,
    pub indicators_names: Vec<String>,
}

/// Backend abstraction enum
///
/// Both backends advertise the same features: indicators, text keymap output and
/// multiple layouts.
pub enum Backend {
    /// Persistent server compiled with xkbcommon
    Xkb(XkbBackend),
    /// In-memory server for testing
    Headless(HeadlessBackend),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Xkb(_) => "xkb",
            Backend::Headless(_) => "headless",
        }
    }

    pub fn features(&self) -> Features {
        Features::CAN_TOGGLE_INDICATORS
            | Features::CAN_OUTPUT_CONFIG_AS_ASCII
            | Features::MULTIPLE_LAYOUTS_SUPPORTED
    }

    pub fn max_num_groups(&self) -> usize {
        MAX_NUM_GROUPS
    }

    /// Raw bytes of a server property, `None` when it is not set.
    pub fn read_property(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match self {
            Backend::Xkb(xkb) => xkb.read_property(name),
            Backend::Headless(headless) => headless.read_property(name),
        }
    }

    pub fn write_property(&mut self, name: &str, data: &[u8]) -> Result<()> {
        match self {
            Backend::Xkb(xkb) => xkb.write_property(name, data),
            Backend::Headless(headless) => headless.write_property(name, data),
        }
    }

    /// Check that the server accepts `names` and derive its group and indicator names.
    pub fn compile(&self, names: &RulesNames) -> Result<KeymapInfo> {
        match self {
            Backend::Xkb(xkb) => xkb.compile(names),
            Backend::Headless(headless) => headless.compile(names),
        }
    }

    pub fn keymap_text(&self, names: &RulesNames) -> Result<String> {
        match self {
            Backend::Xkb(xkb) => xkb.keymap_text(names),
            Backend::Headless(headless) => headless.keymap_text(names),
        }
    }

    pub fn read_state(&self) -> Result<State> {
        match self {
            Backend::Xkb(xkb) => xkb.read_state(),
            Backend::Headless(headless) => headless.read_state(),
        }
    }

    pub fn write_state(&mut self, state: State) -> Result<()> {
        match self {
            Backend::Xkb(xkb) => xkb.write_state(state),
            Backend::Headless(headless) => headless.write_state(state),
        }
    }

    /// Get the xkb backend if this is an xkb backend
    pub fn as_xkb(&self) -> Option<&XkbBackend> {
        match self {
            Backend::Xkb(xkb) => Some(xkb),
            Backend::Headless(_) => None,
        }
    }

    /// Get the headless backend if this is a headless backend
    pub fn as_headless(&self) -> Option<&HeadlessBackend> {
        match self {
            Backend::Xkb(_) => None,
            Backend::Headless(headless) => Some(headless),
        }
    }

    /// Get mutable access to the headless backend
    pub fn as_headless_mut(&mut self) -> Option<&mut HeadlessBackend> {
        match self {
            Backend::Xkb(_) => None,
            Backend::Headless(headless) => Some(headless),
        }
    }

    pub fn is_headless(&self) -> bool {
        matches!(self, Backend::Headless(_))
    }
}

//! xkl-core
//!
//! Keyboard layout configuration engine: query and switch keyboard groups, enumerate the
//! configuration registry and activate model/layout/variant/option records, plus a
//! conformance driver exercising all of it.
pub mod backend;
pub mod config;
pub mod conformance;
pub mod display;
pub mod engine;
pub mod error;
pub mod event;
pub mod item;
pub mod props;
pub mod rec;
pub mod registry;
pub mod testing;

pub use config::Settings;
pub use display::Display;
pub use engine::{Engine, Features, ListenModes, State};
pub use error::{Error, Result};
pub use event::Event;
pub use item::{BoundedName, ConfigItem};
pub use rec::ConfigRec;
pub use registry::ConfigRegistry;


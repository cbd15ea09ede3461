//! Keyboard configuration records.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::props::{RULES_NAMES_BACKUP_PROP, RULES_NAMES_PROP};

/// A desired or actual keyboard configuration: model, layouts, variants and options.
///
/// `variants` is positionally aligned with `layouts`; an empty variant means the layout's
/// default. The record itself does not enforce the alignment: setters are plain local
/// mutations and invalid values are only caught by [`ConfigRec::activate`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigRec {
    pub model: String,
    pub layouts: Vec<String>,
    pub variants: Vec<String>,
    pub options: Vec<String>,
}

impl ConfigRec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn set_layouts<I, S>(&mut self, layouts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.layouts = layouts.into_iter().map(Into::into).collect();
    }

    pub fn set_variants<I, S>(&mut self, variants: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variants = variants.into_iter().map(Into::into).collect();
    }

    pub fn set_options<I, S>(&mut self, options: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
    }

    /// Clear every field.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// True when there is one variant per layout.
    pub fn is_aligned(&self) -> bool {
        self.layouts.len() == self.variants.len()
    }

    /// Replace this record with the configuration currently active on the server.
    ///
    /// On failure the record is left untouched.
    pub fn get_from_server(&mut self, engine: &Engine) -> Result<()> {
        *self = engine.read_rules_names(RULES_NAMES_PROP)?.config;
        Ok(())
    }

    /// Replace this record with the configuration saved by [`Engine::backup_names_prop`].
    pub fn get_from_backup(&mut self, engine: &Engine) -> Result<()> {
        *self = engine.read_rules_names(RULES_NAMES_BACKUP_PROP)?.config;
        Ok(())
    }

    /// Push the whole record to the server, making it the active configuration.
    ///
    /// On failure the server configuration is unchanged.
    pub fn activate(&self, engine: &mut Engine) -> Result<()> {
        engine.activate(self)
    }

    /// Write the keymap this record compiles to.
    ///
    /// Only the textual keymap format is supported; `binary` requests fail with
    /// [`Error::Unsupported`].
    pub fn write_to_file(&self, engine: &Engine, path: &Path, binary: bool) -> Result<()> {
        if binary {
            return Err(Error::Unsupported("binary keymap output"));
        }
        let text = engine.keymap_text(self)?;
        std::fs::write(path, text).map_err(|e| Error::io(path, e))?;
        info!("Wrote keymap to {}", path.display());
        Ok(())
    }
}

impl fmt::Display for ConfigRec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "model: [{}]", self.model)?;
        for (label, items) in [
            ("layouts", &self.layouts),
            ("variants", &self.variants),
            ("options", &self.options),
        ] {
            writeln!(f, "{}({}):", label, items.len())?;
            for (i, item) in items.iter().enumerate() {
                writeln!(f, "  {}: [{}]", i, item)?;
            }
        }
        Ok(())
    }
}

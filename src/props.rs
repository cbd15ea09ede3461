//! Codec for the rules names property.
//!
//! The server records its active configuration as five NUL-terminated strings:
//! rules file, model, layouts, variants and options. Lists are comma-joined.
//!
//! Decoding normalizes the way X servers do: variants are padded with empty strings up
//! to the number of layouts, and a layout written as `ru(winkeys)` is split into the
//! layout `ru` and the variant `winkeys` (the embedded variant wins).

use crate::error::{Error, Result};
use crate::rec::ConfigRec;

/// Property holding the active configuration.
pub const RULES_NAMES_PROP: &str = "_XKB_RULES_NAMES";
/// Property holding the saved configuration used by restore.
pub const RULES_NAMES_BACKUP_PROP: &str = "_XKB_RULES_NAMES_BACKUP";
/// Maximum encoded property length in bytes.
pub const RULES_NAMES_PROP_MAXLEN: usize = 1024;

/// Decoded contents of a rules names property.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RulesNames {
    pub rules: String,
    pub config: ConfigRec,
}

impl RulesNames {
    pub fn new(rules: impl Into<String>, config: ConfigRec) -> Self {
        Self {
            rules: rules.into(),
            config,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let config = &self.config;
        check_field("rules", &self.rules)?;
        check_field("model", &config.model)?;
        for item in config
            .layouts
            .iter()
            .chain(&config.variants)
            .chain(&config.options)
        {
            check_field("list item", item)?;
            if item.contains(',') {
                return Err(Error::PropertyFormat(format!(
                    "list item '{}' contains a comma",
                    item
                )));
            }
        }

        let fields = [
            self.rules.clone(),
            config.model.clone(),
            merge_by_comma(&config.layouts),
            merge_by_comma(&config.variants),
            merge_by_comma(&config.options),
        ];

        let mut data = Vec::with_capacity(fields.iter().map(|f| f.len() + 1).sum());
        for field in &fields {
            data.extend_from_slice(field.as_bytes());
            data.push(0);
        }

        if data.len() > RULES_NAMES_PROP_MAXLEN {
            return Err(Error::PropertyFormat(format!(
                "{} bytes exceed the {} byte limit",
                data.len(),
                RULES_NAMES_PROP_MAXLEN
            )));
        }
        Ok(data)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() > RULES_NAMES_PROP_MAXLEN {
            return Err(Error::PropertyFormat(format!(
                "{} bytes exceed the {} byte limit",
                data.len(),
                RULES_NAMES_PROP_MAXLEN
            )));
        }
        let text = std::str::from_utf8(data)
            .map_err(|e| Error::PropertyFormat(format!("not UTF-8: {}", e)))?;

        let mut fields = text.split('\0');
        let rules = fields.next().unwrap_or_default().to_string();
        let model = fields.next().unwrap_or_default().to_string();
        let mut layouts = split_by_comma(fields.next().unwrap_or_default());
        let mut variants = split_by_comma(fields.next().unwrap_or_default());
        let options = split_by_comma(fields.next().unwrap_or_default());

        if variants.len() < layouts.len() {
            variants.resize(layouts.len(), String::new());
        }

        for (layout, variant) in layouts.iter_mut().zip(variants.iter_mut()) {
            if let Some((name, embedded)) = split_embedded_variant(layout) {
                *variant = embedded.to_string();
                *layout = name.to_string();
            }
        }

        Ok(Self {
            rules,
            config: ConfigRec {
                model,
                layouts,
                variants,
                options,
            },
        })
    }
}

/// Join list items with commas.
pub fn merge_by_comma(items: &[String]) -> String {
    items.join(",")
}

/// Split a comma-joined list. The empty string is the empty list.
pub fn split_by_comma(merged: &str) -> Vec<String> {
    if merged.is_empty() {
        return Vec::new();
    }
    merged.split(',').map(str::to_string).collect()
}

/// `ru(winkeys)` -> `("ru", "winkeys")`
pub(crate) fn split_embedded_variant(layout: &str) -> Option<(&str, &str)> {
    let start = layout.find('(')?;
    let len = layout[start..].find(')')?;
    Some((&layout[..start], &layout[start + 1..start + len]))
}

fn check_field(what: &str, value: &str) -> Result<()> {
    if value.contains('\0') {
        return Err(Error::PropertyFormat(format!("{} contains a NUL byte", what)));
    }
    Ok(())
}

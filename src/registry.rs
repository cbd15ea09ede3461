//! XML configuration registry: every model, layout, variant and option the rules know.
//!
//! The registry is a loaded snapshot, independent of what is currently active. It is
//! read from `<rules>.xml` (falling back to `base.xml`) found along the search path, and
//! optionally merged with `<rules>.extras.xml`.
//!
//! Enumeration is iterator based and yields entries in document order. Entries repeated
//! by the extras file are merged into the first occurrence, so every name appears once.
//!
//! Layouts and variants may name the countries (`iso3166Id`) and languages (`iso639Id`)
//! they serve. Codes are only reported when the ISO tables (`iso_3166.xml`,
//! `iso_639.xml` in iso-codes format) know a name for them.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node, ParsingOptions};
use tracing::{debug, info, warn};

use crate::config::find_in_path;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::item::ConfigItem;

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Rules set used when the server's rules have no registry of their own
const FALLBACK_RULES: &str = "base";

/// System location of the iso-codes tables, searched after the registry path
const ISO_CODES_DIR: &str = "/usr/share/xml/iso-codes";

/// Countries and languages a layout or variant is meant for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IsoCodes {
    /// Upper-case ISO 3166 alpha-2 codes
    pub countries: Vec<String>,
    /// Lower-case ISO 639-2 codes
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantEntry {
    pub item: ConfigItem,
    pub iso: IsoCodes,
}

/// A layout and its variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutEntry {
    pub item: ConfigItem,
    pub iso: IsoCodes,
    pub variants: Vec<VariantEntry>,
}

impl LayoutEntry {
    /// Whether the layout serves `country`, by its own name or its country list.
    fn serves_country(&self, country: &str) -> bool {
        self.item.name().eq_ignore_ascii_case(country)
            || self.iso.countries.iter().any(|c| c == country)
    }
}

/// An option group (`grp`, `ctrl`, ...) and its options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionGroup {
    pub item: ConfigItem,
    /// Whether several options of the group may be active together
    pub allow_multiple_selection: bool,
    pub options: Vec<ConfigItem>,
}

#[derive(Debug, Default)]
struct Contents {
    models: Vec<ConfigItem>,
    layouts: Vec<LayoutEntry>,
    option_groups: Vec<OptionGroup>,
}

/// Code to name tables read from iso-codes.
#[derive(Debug, Default)]
struct IsoNames {
    countries: HashMap<String, String>,
    languages: HashMap<String, String>,
}

pub struct ConfigRegistry {
    rules: String,
    search_path: Vec<PathBuf>,
    languages: Vec<String>,
    contents: Contents,
    iso_names: IsoNames,
    sources: Vec<PathBuf>,
    loaded: bool,
}

impl ConfigRegistry {
    /// Registry for the rules currently active on the engine's server.
    pub fn new(engine: &Engine) -> Self {
        Self::with_search_path(engine.rules(), engine.display().registry_search_path().to_vec())
    }

    pub fn with_search_path(rules: impl Into<String>, search_path: Vec<PathBuf>) -> Self {
        Self {
            rules: rules.into(),
            search_path,
            languages: preferred_languages(|key| std::env::var(key).ok()),
            contents: Contents::default(),
            iso_names: IsoNames::default(),
            sources: Vec::new(),
            loaded: false,
        }
    }

    /// Override the languages used to pick localized descriptions, most preferred first.
    /// Takes effect on the next load.
    pub fn set_languages(&mut self, languages: Vec<String>) {
        self.languages = languages;
    }

    /// Read the registry from disk.
    ///
    /// With `if_extras_needed`, `<rules>.extras.xml` is merged in when present. A failed
    /// load keeps whatever was loaded before.
    pub fn load(&mut self, if_extras_needed: bool) -> Result<()> {
        let base = find_in_path(&self.search_path, &format!("{}.xml", self.rules))
            .or_else(|| {
                debug!("No registry for rules '{}', trying {}", self.rules, FALLBACK_RULES);
                find_in_path(&self.search_path, &format!("{}.xml", FALLBACK_RULES))
            })
            .ok_or_else(|| Error::RegistryNotFound(self.rules.clone()))?;

        let mut contents = Contents::default();
        parse_file(&base, &self.languages, &mut contents)?;
        let mut sources = vec![base.clone()];

        if if_extras_needed {
            let stem = base
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(FALLBACK_RULES);
            match find_in_path(&self.search_path, &format!("{}.extras.xml", stem)) {
                Some(extras) => {
                    parse_file(&extras, &self.languages, &mut contents)?;
                    sources.push(extras);
                }
                None => debug!("No extras registry for '{}'", stem),
            }
        }

        info!(
            "Loaded registry from {:?}: {} models, {} layouts, {} option groups",
            sources,
            contents.models.len(),
            contents.layouts.len(),
            contents.option_groups.len()
        );
        self.contents = contents;
        self.iso_names = self.load_iso_names();
        self.sources = sources;
        self.loaded = true;
        Ok(())
    }

    /// Missing or broken tables only cost the ISO descriptions.
    fn load_iso_names(&self) -> IsoNames {
        let mut path = self.search_path.clone();
        path.push(PathBuf::from(ISO_CODES_DIR));
        IsoNames {
            countries: read_iso_table(&path, "iso_3166", &["alpha_2_code"]),
            languages: read_iso_table(&path, "iso_639", &["iso_639_2B_code", "iso_639_2T_code"]),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Files the registry was loaded from.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn rules(&self) -> &str {
        &self.rules
    }

    pub fn models(&self) -> impl Iterator<Item = &ConfigItem> {
        self.contents.models.iter()
    }

    pub fn layouts(&self) -> impl Iterator<Item = &ConfigItem> {
        self.contents.layouts.iter().map(|layout| &layout.item)
    }

    pub fn layout_variants<'a>(&'a self, layout: &str) -> impl Iterator<Item = &'a ConfigItem> + 'a {
        self.layout_entry(layout)
            .into_iter()
            .flat_map(|entry| entry.variants.iter().map(|variant| &variant.item))
    }

    pub fn option_groups(&self) -> impl Iterator<Item = &OptionGroup> {
        self.contents.option_groups.iter()
    }

    pub fn options<'a>(&'a self, group: &str) -> impl Iterator<Item = &'a ConfigItem> + 'a {
        self.find_option_group(group)
            .into_iter()
            .flat_map(|group| group.options.iter())
    }

    /// Countries served by some layout, named after the ISO 3166 table.
    ///
    /// A layout whose name is a country code serves that country even without a
    /// country list.
    pub fn countries(&self) -> impl Iterator<Item = ConfigItem> {
        let codes = self.contents.layouts.iter().flat_map(|layout| {
            std::iter::once(layout.item.name().to_ascii_uppercase())
                .chain(layout.iso.countries.iter().cloned())
                .chain(layout.variants.iter().flat_map(|v| v.iso.countries.iter().cloned()))
        });
        iso_items(codes, &self.iso_names.countries).into_iter()
    }

    /// Languages served by some layout or variant, named after the ISO 639 table.
    pub fn languages(&self) -> impl Iterator<Item = ConfigItem> {
        let codes = self.contents.layouts.iter().flat_map(|layout| {
            layout
                .iso
                .languages
                .iter()
                .chain(layout.variants.iter().flat_map(|v| v.iso.languages.iter()))
                .cloned()
        });
        iso_items(codes, &self.iso_names.languages).into_iter()
    }

    /// Layouts and variants for `country`, as `(layout, variant)` pairs in document
    /// order. A matching layout is reported with no variant.
    pub fn country_variants(&self, country: &str) -> Vec<(&ConfigItem, Option<&ConfigItem>)> {
        let country = country.to_ascii_uppercase();
        self.iso_variants(
            |layout| layout.serves_country(&country),
            |iso| iso.countries.contains(&country),
        )
    }

    /// Layouts and variants for `language`; see [`ConfigRegistry::country_variants`].
    pub fn language_variants(&self, language: &str) -> Vec<(&ConfigItem, Option<&ConfigItem>)> {
        let language = language.to_ascii_lowercase();
        self.iso_variants(
            |layout| layout.iso.languages.contains(&language),
            |iso| iso.languages.contains(&language),
        )
    }

    fn iso_variants(
        &self,
        layout_matches: impl Fn(&LayoutEntry) -> bool,
        variant_matches: impl Fn(&IsoCodes) -> bool,
    ) -> Vec<(&ConfigItem, Option<&ConfigItem>)> {
        let mut found = Vec::new();
        for layout in &self.contents.layouts {
            if layout_matches(layout) {
                found.push((&layout.item, None));
            }
            for variant in &layout.variants {
                if variant_matches(&variant.iso) {
                    found.push((&layout.item, Some(&variant.item)));
                }
            }
        }
        found
    }

    pub fn find_model(&self, name: &str) -> Option<&ConfigItem> {
        self.contents.models.iter().find(|item| item.name() == name)
    }

    pub fn find_layout(&self, name: &str) -> Option<&ConfigItem> {
        self.layout_entry(name).map(|entry| &entry.item)
    }

    pub fn find_variant(&self, layout: &str, name: &str) -> Option<&ConfigItem> {
        self.layout_variants(layout).find(|item| item.name() == name)
    }

    pub fn find_option_group(&self, name: &str) -> Option<&OptionGroup> {
        self.contents
            .option_groups
            .iter()
            .find(|group| group.item.name() == name)
    }

    pub fn find_option(&self, group: &str, name: &str) -> Option<&ConfigItem> {
        self.options(group).find(|item| item.name() == name)
    }

    fn layout_entry(&self, name: &str) -> Option<&LayoutEntry> {
        self.contents
            .layouts
            .iter()
            .find(|entry| entry.item.name() == name)
    }
}

fn parse_file(path: &Path, languages: &[String], contents: &mut Contents) -> Result<()> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(&text, options).map_err(|source| Error::Registry {
        path: path.to_path_buf(),
        source,
    })?;

    let root = doc.root_element();
    if root.tag_name().name() != "xkbConfigRegistry" {
        return Err(Error::RegistryRoot {
            path: path.to_path_buf(),
            found: root.tag_name().name().to_string(),
        });
    }

    for list in elements(root, "modelList") {
        for node in elements(list, "model") {
            if let Some(item) = read_item(node, languages) {
                if !contents.models.iter().any(|m| m.name == item.name) {
                    contents.models.push(item);
                }
            }
        }
    }

    for list in elements(root, "layoutList") {
        for node in elements(list, "layout") {
            let Some(item) = read_item(node, languages) else {
                continue;
            };
            let iso = read_iso_codes(node);
            let variants: Vec<VariantEntry> = elements(node, "variantList")
                .flat_map(|list| elements(list, "variant"))
                .filter_map(|variant| {
                    let item = read_item(variant, languages)?;
                    Some(VariantEntry {
                        item,
                        iso: read_iso_codes(variant),
                    })
                })
                .collect();

            match contents.layouts.iter_mut().find(|l| l.item.name == item.name) {
                Some(existing) => merge_items(&mut existing.variants, variants),
                None => contents.layouts.push(LayoutEntry {
                    item,
                    iso,
                    variants: dedup(variants),
                }),
            }
        }
    }

    for list in elements(root, "optionList") {
        for node in elements(list, "group") {
            let Some(item) = read_item(node, languages) else {
                continue;
            };
            // Multiple selection is allowed unless explicitly disabled
            let allow_multiple_selection = node.attribute("allowMultipleSelection") != Some("false");
            let options: Vec<ConfigItem> = elements(node, "option")
                .filter_map(|option| read_item(option, languages))
                .collect();

            match contents
                .option_groups
                .iter_mut()
                .find(|g| g.item.name == item.name)
            {
                Some(existing) => merge_items(&mut existing.options, options),
                None => contents.option_groups.push(OptionGroup {
                    item,
                    allow_multiple_selection,
                    options: dedup(options),
                }),
            }
        }
    }

    debug!("Parsed registry {}", path.display());
    Ok(())
}

/// Registry entries keyed by their configItem name.
trait Named {
    fn key(&self) -> &str;
}

impl Named for ConfigItem {
    fn key(&self) -> &str {
        self.name()
    }
}

impl Named for VariantEntry {
    fn key(&self) -> &str {
        self.item.name()
    }
}

fn merge_items<T: Named>(into: &mut Vec<T>, items: Vec<T>) {
    for item in items {
        if !into.iter().any(|existing| existing.key() == item.key()) {
            into.push(item);
        }
    }
}

fn dedup<T: Named>(items: Vec<T>) -> Vec<T> {
    let mut unique = Vec::with_capacity(items.len());
    merge_items(&mut unique, items);
    unique
}

fn elements<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

/// Read the `<configItem>` of an entry. Entries without a name are skipped.
fn read_item(node: Node<'_, '_>, languages: &[String]) -> Option<ConfigItem> {
    let config = elements(node, "configItem").next()?;
    let name = elements(config, "name").next()?.text()?.trim();
    if name.is_empty() {
        return None;
    }

    let mut item = ConfigItem::with_name(name);
    if let Some(text) = localized_text(config, "shortDescription", languages) {
        item.set_short_description(text);
    }
    if let Some(text) = localized_text(config, "description", languages) {
        item.set_description(text);
    }
    Some(item)
}

/// Country and language lists of an entry's `<configItem>`.
fn read_iso_codes(node: Node<'_, '_>) -> IsoCodes {
    let Some(config) = elements(node, "configItem").next() else {
        return IsoCodes::default();
    };
    let codes = |list: &'static str, id: &'static str| -> Vec<String> {
        elements(config, list)
            .flat_map(|list| elements(list, id))
            .filter_map(|node| node.text().map(str::trim))
            .filter(|code| !code.is_empty())
            .map(str::to_string)
            .collect()
    };
    IsoCodes {
        countries: codes("countryList", "iso3166Id")
            .into_iter()
            .map(|code| code.to_ascii_uppercase())
            .collect(),
        languages: codes("languageList", "iso639Id")
            .into_iter()
            .map(|code| code.to_ascii_lowercase())
            .collect(),
    }
}

/// Read `<domain>_entry` elements of `<domain>.xml`, mapping each of `code_attrs` to the
/// entry's name.
fn read_iso_table(search_path: &[PathBuf], domain: &str, code_attrs: &[&str]) -> HashMap<String, String> {
    let mut names = HashMap::new();
    let Some(path) = find_in_path(search_path, &format!("{}.xml", domain)) else {
        warn!("No {}.xml found, ISO names unavailable", domain);
        return names;
    };
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to load {}: {}", path.display(), e);
            return names;
        }
    };
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = match Document::parse_with_options(&text, options) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Failed to parse {}: {}", path.display(), e);
            return names;
        }
    };

    let entry_tag = format!("{}_entry", domain);
    for entry in doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == entry_tag)
    {
        let Some(name) = entry.attribute("name") else {
            continue;
        };
        for attr in code_attrs {
            if let Some(code) = entry.attribute(*attr).filter(|code| !code.is_empty()) {
                names.insert(code.to_string(), name.to_string());
            }
        }
    }
    debug!("Read {} ISO names from {}", names.len(), path.display());
    names
}

/// Distinct `codes` that have a name, in first-seen order.
fn iso_items(codes: impl Iterator<Item = String>, names: &HashMap<String, String>) -> Vec<ConfigItem> {
    let mut items: Vec<ConfigItem> = Vec::new();
    for code in codes {
        let Some(name) = names.get(&code) else {
            continue;
        };
        if items.iter().any(|item| item.name() == code) {
            continue;
        }
        let mut item = ConfigItem::with_name(&code);
        item.set_description(name);
        items.push(item);
    }
    items
}

/// Text of the `tag` child in the most preferred language, else the untranslated one.
fn localized_text<'a>(config: Node<'a, '_>, tag: &'static str, languages: &[String]) -> Option<&'a str> {
    let mut untranslated = None;
    let mut best: Option<(usize, &'a str)> = None;

    for node in elements(config, tag) {
        let Some(text) = node.text().map(str::trim) else {
            continue;
        };
        match node.attribute((XML_NAMESPACE, "lang")) {
            Some(lang) => {
                let priority = languages.iter().position(|l| l == lang);
                if let Some(priority) = priority {
                    if best.map_or(true, |(p, _)| priority < p) {
                        best = Some((priority, text));
                    }
                }
            }
            None => untranslated = Some(text),
        }
    }

    best.map(|(_, text)| text).or(untranslated)
}

/// User languages, most preferred first, e.g. `de_DE.UTF-8` -> `["de_DE", "de"]`.
pub fn preferred_languages(lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let raw = ["LANGUAGE", "LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .find_map(|key| lookup(key).filter(|v| !v.is_empty()))
        .unwrap_or_default();

    let mut languages = Vec::new();
    for entry in raw.split(':') {
        let locale = entry
            .split(['.', '@'])
            .next()
            .unwrap_or_default();
        if locale.is_empty() || locale == "C" || locale == "POSIX" {
            continue;
        }
        let short = locale.split('_').next().unwrap_or(locale);
        for candidate in [locale, short] {
            if !languages.iter().any(|l| l == candidate) {
                languages.push(candidate.to_string());
            }
        }
    }
    languages
}

//! Registry tests
//!
//! Tests for loading the registry bound to an engine and enumerating it.

use std::collections::HashSet;

use xkl_core::testing::Fixture;
use xkl_core::ConfigRegistry;

/// Test that every layout is enumerated exactly once
#[test]
fn test_layout_enumeration_is_complete() {
    let fixture = Fixture::new().expect("Failed to create fixture");
    let registry = fixture.registry().unwrap();

    let names: Vec<&str> = registry.layouts().map(|item| item.name()).collect();
    let distinct: HashSet<&str> = names.iter().copied().collect();
    assert_eq!(names.len(), distinct.len());
    assert_eq!(
        names,
        vec!["us", "gb", "de", "fr", "dk", "ru", "ua", "apl"]
    );

    for name in &names {
        assert!(registry.find_layout(name).is_some(), "{} not found", name);
    }

    // Enumeration is deterministic
    let again: Vec<&str> = registry.layouts().map(|item| item.name()).collect();
    assert_eq!(names, again);
}

/// Test that the active layouts are all known to the registry
#[test]
fn test_active_layouts_are_registered() {
    let fixture = Fixture::with_layouts(&["us", "ru", "ua"]).expect("Failed to create fixture");
    let registry = fixture.registry().unwrap();
    for layout in fixture.server_config().unwrap().layouts {
        assert!(registry.find_layout(&layout).is_some());
    }
}

/// Test that the engine's rules fall back to the base registry
#[test]
fn test_registry_for_engine_rules() {
    let fixture = Fixture::new().expect("Failed to create fixture");
    let registry = fixture.registry().unwrap();

    assert_eq!(registry.rules(), "evdev");
    assert_eq!(
        registry.sources(),
        &[
            Fixture::data_dir().join("base.xml"),
            Fixture::data_dir().join("base.extras.xml"),
        ]
    );
}

/// Test that extras are only merged when asked for
#[test]
fn test_extras_on_demand() {
    let fixture = Fixture::new().expect("Failed to create fixture");
    let mut registry = ConfigRegistry::new(fixture.engine_ref());
    registry.set_languages(Vec::new());

    registry.load(false).unwrap();
    assert!(registry.find_layout("apl").is_none());
    assert!(registry.find_variant("de", "ru").is_none());
    assert!(registry.find_option_group("lv3").is_none());

    registry.load(true).unwrap();
    assert!(registry.find_layout("apl").is_some());
    let variants: Vec<&str> = registry.layout_variants("de").map(|v| v.name()).collect();
    assert_eq!(variants, vec!["nodeadkeys", "ru"]);
    assert!(registry.find_option("lv3", "lv3:ralt_switch").is_some());
}

/// Test models, option groups and options
#[test]
fn test_models_and_options() {
    let fixture = Fixture::new().expect("Failed to create fixture");
    let registry = fixture.registry().unwrap();

    let models: Vec<&str> = registry.models().map(|m| m.name()).collect();
    assert_eq!(models, vec!["pc104", "pc105", "macbook78"]);
    assert_eq!(
        registry.find_model("pc105").unwrap().description(),
        "Generic 105-key PC"
    );

    let grp = registry.find_option_group("grp").unwrap();
    assert!(!grp.allow_multiple_selection);
    let options: Vec<&str> = registry.options("grp").map(|o| o.name()).collect();
    assert_eq!(
        options,
        vec!["grp:alt_shift_toggle", "grp:caps_toggle", "grp:win_space_toggle"]
    );
    assert!(registry.find_option_group("ctrl").unwrap().allow_multiple_selection);
    assert!(registry.options("nosuchgroup").next().is_none());
}

/// Test localized descriptions
#[test]
fn test_localized_descriptions() {
    let fixture = Fixture::new().expect("Failed to create fixture");
    let mut registry = ConfigRegistry::new(fixture.engine_ref());
    registry.set_languages(vec!["da_DK".into(), "da".into()]);
    registry.load(false).unwrap();

    assert_eq!(registry.find_layout("dk").unwrap().description(), "Dansk");
    // No Danish translation: untranslated text
    assert_eq!(registry.find_layout("gb").unwrap().description(), "English (UK)");
    assert_eq!(registry.find_layout("dk").unwrap().short_description(), "da");
}

/// Test country enumeration and the layouts serving a country
#[test]
fn test_countries() {
    let fixture = Fixture::new().expect("Failed to create fixture");
    let registry = fixture.registry().unwrap();

    let codes: Vec<String> = registry.countries().map(|c| c.name().to_string()).collect();
    assert_eq!(codes, vec!["US", "GB", "IE", "DE", "AT", "FR", "DK", "RU", "UA"]);
    let denmark = registry.countries().find(|c| c.name() == "DK").unwrap();
    assert_eq!(denmark.description(), "Denmark");

    // By layout name and by country list, reported once
    let germany: Vec<(&str, Option<&str>)> = registry
        .country_variants("de")
        .into_iter()
        .map(|(layout, variant)| (layout.name(), variant.map(|v| v.name())))
        .collect();
    assert_eq!(germany, vec![("de", None)]);

    let austria = registry.country_variants("AT");
    assert_eq!(austria.len(), 1);
    assert_eq!(austria[0].0.name(), "de");

    // Only the variant names Ireland
    let ireland = registry.country_variants("IE");
    assert_eq!(ireland.len(), 1);
    assert_eq!(ireland[0].0.name(), "gb");
    assert_eq!(ireland[0].1.map(|v| v.name()), Some("extd"));

    // Layout name alone makes a country
    assert_eq!(registry.country_variants("UA").len(), 1);
    assert!(registry.country_variants("SE").is_empty());
}

/// Test language enumeration and the layouts serving a language
#[test]
fn test_languages() {
    let fixture = Fixture::new().expect("Failed to create fixture");
    let registry = fixture.registry().unwrap();

    let codes: Vec<String> = registry.languages().map(|l| l.name().to_string()).collect();
    assert_eq!(codes, vec!["eng", "ger", "rus", "fre", "dan", "ukr"]);
    let german = registry.languages().find(|l| l.name() == "ger").unwrap();
    assert_eq!(german.description(), "German");

    let russian: Vec<(&str, Option<&str>)> = registry
        .language_variants("rus")
        .into_iter()
        .map(|(layout, variant)| (layout.name(), variant.map(|v| v.name())))
        .collect();
    assert_eq!(russian, vec![("de", Some("ru")), ("ru", None)]);

    let english: Vec<&str> = registry
        .language_variants("ENG")
        .into_iter()
        .map(|(layout, _)| layout.name())
        .collect();
    assert_eq!(english, vec!["us", "gb"]);
    assert!(registry.language_variants("swe").is_empty());
}

//! Activation tests
//!
//! Tests for pushing configuration records to the server and reading them back.

use xkl_core::props::{RulesNames, RULES_NAMES_PROP};
use xkl_core::testing::Fixture;
use xkl_core::{ConfigRec, Error};

fn rec(model: &str, layouts: &[&str], variants: &[&str], options: &[&str]) -> ConfigRec {
    let mut rec = ConfigRec::new();
    rec.set_model(model);
    rec.set_layouts(layouts.iter().copied());
    rec.set_variants(variants.iter().copied());
    rec.set_options(options.iter().copied());
    rec
}

/// Test that an activated record reads back unchanged
#[test]
fn test_activate_then_read_back() {
    let mut fixture = Fixture::new().expect("Failed to create fixture");
    let wanted = rec(
        "pc104",
        &["us", "de"],
        &["intl", "nodeadkeys"],
        &["grp:alt_shift_toggle", "ctrl:nocaps"],
    );

    wanted.activate(fixture.engine()).unwrap();

    let read = fixture.server_config().unwrap();
    assert_eq!(read, wanted);
    assert_eq!(read.layouts.len(), read.variants.len());
    assert_eq!(
        fixture.engine_ref().groups_names(),
        ["English (US, intl., with dead keys)", "German (no dead keys)"]
    );
}

/// Test that the server pads missing variants
#[test]
fn test_empty_variants_are_padded() {
    let mut fixture = Fixture::new().expect("Failed to create fixture");
    rec("pc105", &["us", "fr", "dk"], &[], &[])
        .activate(fixture.engine())
        .unwrap();

    let read = fixture.server_config().unwrap();
    assert_eq!(read.layouts, vec!["us", "fr", "dk"]);
    assert_eq!(read.variants, vec!["", "", ""]);
}

/// Test that a layout written as layout(variant) is split on the server
#[test]
fn test_embedded_variant_is_split() {
    let mut fixture = Fixture::new().expect("Failed to create fixture");
    rec("pc105", &["us", "ru(winkeys)"], &["", ""], &[])
        .activate(fixture.engine())
        .unwrap();

    let read = fixture.server_config().unwrap();
    assert_eq!(read.layouts, vec!["us", "ru"]);
    assert_eq!(read.variants, vec!["", "winkeys"]);
}

/// Test that adding and removing a layout restores the original pair
#[test]
fn test_add_remove_symmetry() {
    let mut fixture = Fixture::with_layouts(&["us", "de"]).expect("Failed to create fixture");
    let original = fixture.server_config().unwrap();

    let mut added = original.clone();
    let mut layouts = added.layouts.clone();
    let mut variants = added.variants.clone();
    layouts.push("dk".into());
    variants.push(String::new());
    added.set_layouts(layouts);
    added.set_variants(variants);
    added.activate(fixture.engine()).unwrap();
    assert_eq!(fixture.engine_ref().num_groups(), 3);

    let mut removed = fixture.server_config().unwrap();
    removed.layouts.pop();
    removed.variants.pop();
    removed.activate(fixture.engine()).unwrap();

    let read = fixture.server_config().unwrap();
    assert_eq!(read.layouts, original.layouts);
    assert_eq!(read.variants, original.variants);
}

/// Test that the model round-trips and can be restored
#[test]
fn test_model_round_trip() {
    let mut fixture = Fixture::new().expect("Failed to create fixture");
    let mut current = fixture.server_config().unwrap();
    let original_model = current.model.clone();

    current.set_model("macbook78");
    current.activate(fixture.engine()).unwrap();
    assert_eq!(fixture.server_config().unwrap().model, "macbook78");

    current.set_model("pc105");
    current.activate(fixture.engine()).unwrap();
    assert_eq!(fixture.server_config().unwrap().model, "pc105");

    current.set_model(original_model.clone());
    current.activate(fixture.engine()).unwrap();
    assert_eq!(fixture.server_config().unwrap().model, original_model);
}

/// Test that every kind of rejected activation leaves the server untouched
#[test]
fn test_rejected_activation_leaves_server_unchanged() {
    let mut fixture = Fixture::with_layouts(&["us", "de"]).expect("Failed to create fixture");
    let before = fixture.server_config().unwrap();
    let groups_before = fixture.engine_ref().groups_names().to_vec();

    let rejected = [
        rec("pc105", &["us", "xx"], &["", ""], &[]),
        rec("pc105", &["us", "de"], &["", "nosuchvariant"], &[]),
        rec("nosuchmodel", &["us"], &[""], &[]),
        rec("pc105", &["us"], &[""], &["grp:nosuchoption"]),
        rec("pc105", &["us", "dk"], &[""], &[]),
        rec("pc105", &["us", "de", "fr", "dk", "ru"], &[], &[]),
        rec("pc105", &[], &[], &[]),
    ];

    for attempt in &rejected {
        let kept = attempt.clone();
        assert!(
            attempt.activate(fixture.engine()).is_err(),
            "activation of {:?} should fail",
            attempt
        );
        // The record keeps the attempted values
        assert_eq!(*attempt, kept);
        assert_eq!(fixture.server_config().unwrap(), before);
        assert_eq!(fixture.engine_ref().groups_names(), groups_before.as_slice());
    }
}

/// Test the error reported for each structural rejection
#[test]
fn test_rejection_reasons() {
    let mut fixture = Fixture::new().expect("Failed to create fixture");
    let engine = fixture.engine();

    assert!(matches!(
        rec("pc105", &["us", "dk"], &[""], &[]).activate(engine),
        Err(Error::LengthMismatch {
            layouts: 2,
            variants: 1
        })
    ));
    assert!(matches!(
        rec("pc105", &["us", "de", "fr", "dk", "ru"], &[], &[]).activate(engine),
        Err(Error::TooManyGroups {
            requested: 5,
            max: 4
        })
    ));
    assert!(matches!(
        rec("pc105", &[], &[], &[]).activate(engine),
        Err(Error::NoLayouts)
    ));
    assert!(matches!(
        rec("pc105", &["xx"], &[""], &[]).activate(engine),
        Err(Error::Keymap(_))
    ));
}

/// Test that the locked group falls back to the first group when layouts shrink
#[test]
fn test_group_reset_when_layouts_shrink() {
    let mut fixture = Fixture::with_layouts(&["us", "dk"]).expect("Failed to create fixture");
    fixture.engine().lock_group(1).unwrap();

    rec("pc105", &["us"], &[""], &[])
        .activate(fixture.engine())
        .unwrap();
    assert_eq!(fixture.engine().current_state().group, 0);
}

/// Test backing up and restoring the configuration
#[test]
fn test_backup_and_restore() {
    let mut fixture = Fixture::new().expect("Failed to create fixture");
    let original = fixture.server_config().unwrap();
    fixture.engine().backup_names_prop().unwrap();

    let changed = rec("pc104", &["de", "dk"], &["nodeadkeys", ""], &["ctrl:swapcaps"]);
    changed.activate(fixture.engine()).unwrap();

    // A second backup keeps the first one
    fixture.engine().backup_names_prop().unwrap();
    let mut backup = ConfigRec::new();
    backup.get_from_backup(fixture.engine_ref()).unwrap();
    assert_eq!(backup, original);

    fixture.engine().restore_names_prop().unwrap();
    assert_eq!(fixture.server_config().unwrap(), original);
    assert_eq!(fixture.engine_ref().groups_names(), ["English (US)"]);
}

/// Test that restoring without a backup fails
#[test]
fn test_restore_without_backup() {
    let mut fixture = Fixture::new().expect("Failed to create fixture");
    assert!(matches!(
        fixture.engine().restore_names_prop(),
        Err(Error::PropertyMissing(_))
    ));
}

/// Test that a failed server read leaves the record untouched
#[test]
fn test_read_failure_keeps_record() {
    let mut fixture = Fixture::new().expect("Failed to create fixture");
    let mut current = rec("pc104", &["fr"], &[""], &[]);
    fixture.fail_reads(true);

    assert!(current.get_from_server(fixture.engine_ref()).is_err());
    assert_eq!(current, rec("pc104", &["fr"], &[""], &[]));

    fixture.fail_reads(false);
    current.get_from_server(fixture.engine_ref()).unwrap();
    assert_eq!(current.layouts, vec!["us"]);
}

/// Test that activation fails without touching the server when the state is unreadable
#[test]
fn test_state_read_failure_keeps_server() {
    let mut fixture = Fixture::with_layouts(&["us", "de"]).expect("Failed to create fixture");
    let before = fixture.server_config().unwrap();
    let groups_names = fixture.engine_ref().groups_names().to_vec();
    fixture.fail_state_reads(true);

    let result = rec("pc105", &["us", "dk"], &["", ""], &[]).activate(fixture.engine());
    assert!(matches!(result, Err(Error::Io { .. })));

    fixture.fail_state_reads(false);
    assert_eq!(fixture.server_config().unwrap(), before);
    assert_eq!(fixture.engine_ref().groups_names(), groups_names.as_slice());
}

/// Test that a group reset which cannot be stored rolls the configuration back
#[test]
fn test_state_write_failure_rolls_back() {
    let mut fixture = Fixture::with_layouts(&["us", "de", "dk"]).expect("Failed to create fixture");
    fixture.engine().lock_group(2).unwrap();
    let before = fixture.server_config().unwrap();
    fixture.fail_state_writes(true);

    // Group 2 does not exist in a single-layout configuration
    let result = rec("pc105", &["us"], &[""], &[]).activate(fixture.engine());
    assert!(matches!(result, Err(Error::Io { .. })));
    assert_eq!(fixture.server_config().unwrap(), before);
    assert_eq!(fixture.engine_ref().num_groups(), 3);

    // No reset needed, so nothing is written to the state
    rec("pc105", &["us", "de", "dk", "fr"], &[], &[])
        .activate(fixture.engine())
        .unwrap();
    assert_eq!(fixture.server_config().unwrap().layouts, vec!["us", "de", "dk", "fr"]);

    fixture.fail_state_writes(false);
    assert_eq!(fixture.engine().current_state().group, 2);
}

/// Test that a property written by another client is normalized on read
#[test]
fn test_foreign_property_is_normalized() {
    let mut fixture = Fixture::new().expect("Failed to create fixture");
    fixture
        .engine()
        .display_mut()
        .backend_mut()
        .write_property(RULES_NAMES_PROP, b"evdev\0pc105\0us,ru(phonetic),de\0\0grp:caps_toggle\0")
        .unwrap();

    let names = fixture.engine_ref().read_rules_names(RULES_NAMES_PROP).unwrap();
    assert_eq!(
        names,
        RulesNames::new(
            "evdev",
            rec("pc105", &["us", "ru", "de"], &["", "phonetic", ""], &["grp:caps_toggle"])
        )
    );
}

/// Test writing the keymap of a record
#[test]
fn test_write_to_file() {
    let fixture = Fixture::with_layouts(&["us", "dk"]).expect("Failed to create fixture");
    let mut current = fixture.server_config().unwrap();
    current.set_variants(["", "nodeadkeys"]);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keymap.xkb");
    current.write_to_file(fixture.engine_ref(), &path, false).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("// rules: evdev\nxkb_keymap {\n"));
    assert!(text.contains("xkb_symbols { include \"pc+us+dk(nodeadkeys):2\" };"));
    assert!(text.contains("xkb_geometry { include \"pc(pc105)\" };"));

    // Writing does not activate
    assert_eq!(fixture.server_config().unwrap().variants, vec!["", ""]);

    let binary = dir.path().join("keymap.xkm");
    assert!(matches!(
        current.write_to_file(fixture.engine_ref(), &binary, true),
        Err(Error::Unsupported(_))
    ));
    assert!(!binary.exists());

    let invalid = rec("pc105", &["xx"], &[""], &[]);
    assert!(invalid.write_to_file(fixture.engine_ref(), &path, false).is_err());
}

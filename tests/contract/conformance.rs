//! Conformance driver tests
//!
//! End-to-end runs of the driver against the headless backend.

use std::io;

use xkl_core::conformance::{self, Failure};
use xkl_core::display::Display;
use xkl_core::props::RulesNames;
use xkl_core::registry::ConfigRegistry;
use xkl_core::testing::Fixture;
use xkl_core::{ConfigRec, Engine};

/// Switch to the second group, as an operator would between the prompts
fn switch_to_second_group(engine: &mut Engine) -> io::Result<()> {
    if let Some(headless) = engine.display_mut().backend_mut().as_headless_mut() {
        headless.set_server_group(1);
    }
    Ok(())
}

/// Test a full run on a single-layout server
#[test]
fn test_full_run() {
    let mut fixture = Fixture::new().expect("Failed to create fixture");
    let before = fixture.server_config().unwrap();

    let mut out = Vec::new();
    let report = conformance::run(fixture.engine(), &mut out, &mut switch_to_second_group)
        .expect("Conformance run failed");
    let text = String::from_utf8(out).unwrap();

    assert!(report.passed(), "failed checks: {:?}", report.failed().collect::<Vec<_>>());
    assert_eq!(report.activation_failures, 0);
    assert!(report
        .checks
        .iter()
        .any(|check| check.name == "add/remove restores layouts"));

    for header in ["== Engine ==", "== Available Layouts ==", "== ConfigRec =="] {
        assert!(text.contains(header), "missing {}", header);
    }
    assert!(text.contains("[dk] "));
    assert!(text.contains("Current active layout: English (US)\n"));
    assert!(text.contains("Please change your layout and hit ENTER\n"));
    assert!(text.contains("Current active layout: Danish\n"));
    assert!(!text.contains("Failed to activate new configuration"));

    assert_eq!(fixture.server_config().unwrap(), before);
}

/// Test that the engine section prints the queried state
#[test]
fn test_engine_section() {
    let mut fixture = Fixture::with_layouts(&["us", "dk"]).expect("Failed to create fixture");
    let mut out = Vec::new();
    conformance::run(fixture.engine(), &mut out, &mut |_: &mut Engine| Ok(()))
        .expect("Conformance run failed");
    let text = String::from_utf8(out).unwrap();

    let engine_section: Vec<&str> = text.lines().take(6).collect();
    assert_eq!(
        engine_section,
        vec![
            "== Engine ==",
            r#"indicator names: ["Caps Lock", "Num Lock", "Scroll Lock"]"#,
            r#"group names: ["English (US)", "Danish"]"#,
            "default layout: English (US)",
            "features: B",
            "current state: group: 0, indicators: 0",
        ]
    );
}

/// Test that rejected activations are reported but do not stop the run
#[test]
fn test_rejected_activation_continues() {
    let mut fixture =
        Fixture::with_layouts(&["us", "de", "fr", "ru"]).expect("Failed to create fixture");
    let before = fixture.server_config().unwrap();

    let mut out = Vec::new();
    let report = conformance::run(fixture.engine(), &mut out, &mut |_: &mut Engine| Ok(()))
        .expect("Conformance run failed");
    let text = String::from_utf8(out).unwrap();

    assert_eq!(report.activation_failures, 1);
    assert!(report.passed());
    assert!(text.contains("Failed to activate new configuration"));
    assert!(text.contains("Restoring original configuration..."));
    assert_eq!(fixture.server_config().unwrap(), before);
}

/// Test that a failing configuration read aborts the run
#[test]
fn test_query_failure_is_fatal() {
    let mut fixture = Fixture::new().expect("Failed to create fixture");
    fixture.fail_reads(true);

    let mut out = Vec::new();
    let result = conformance::run(fixture.engine(), &mut out, &mut |_: &mut Engine| Ok(()));
    let text = String::from_utf8(out).unwrap();

    let failure = result.expect_err("run should fail");
    assert!(matches!(failure, Failure::Query(_)));
    assert_eq!(failure.exit_code(), 1);
    assert!(text.ends_with("Failed to get configuration from server\n"));
}

/// Test that a missing registry aborts the run
#[test]
fn test_load_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let registry_file = dir.path().join("base.xml");
    std::fs::copy(Fixture::data_dir().join("base.xml"), &registry_file).unwrap();

    let mut catalog = ConfigRegistry::with_search_path("evdev", vec![dir.path().to_path_buf()]);
    catalog.load(false).unwrap();
    let mut seed = ConfigRec::new();
    seed.set_layouts(["us"]);
    seed.set_variants([""]);
    let display = Display::headless(":load", catalog, &RulesNames::new("evdev", seed)).unwrap();
    let mut engine = Engine::new(display).unwrap();

    std::fs::remove_file(&registry_file).unwrap();

    let mut out = Vec::new();
    let result = conformance::run(&mut engine, &mut out, &mut |_: &mut Engine| Ok(()));
    let text = String::from_utf8(out).unwrap();

    assert!(matches!(result, Err(Failure::Load(_))));
    assert!(text.ends_with("Failed to load registry\n"));
    assert!(!text.contains("== Available Layouts =="));
}

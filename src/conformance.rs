//! Conformance driver: exercises an engine end to end and verifies what it reads back.
//!
//! The run queries engine state, enumerates the registry, mutates and activates the
//! server configuration, watches for an operator-driven layout change and finally
//! restores the configuration it started from.
//!
//! Registry and configuration read failures abort the run. Rejected activations are
//! reported and the run continues.

use std::collections::HashSet;
use std::io::{self, Write};

use tracing::{info, warn};

use crate::engine::{Engine, ListenModes};
use crate::error::Error;
use crate::item::ConfigItem;
use crate::rec::ConfigRec;
use crate::registry::ConfigRegistry;

/// Layout appended and removed again by the run
const EXTRA_LAYOUT: &str = "dk";
/// Model switched to and back
const TEST_MODEL: &str = "pc105";
/// Option added when no group toggle is configured
const TOGGLE_OPTION: &str = "grp:alt_shift_toggle";

/// Why a run stopped early.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    #[error("Failed to load registry")]
    Load(#[source] Error),
    #[error("Failed to get configuration from server")]
    Query(#[source] Error),
    #[error("could not write output: {0}")]
    Output(#[from] io::Error),
}

impl Failure {
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// One verified property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct Report {
    pub checks: Vec<Check>,
    /// Activations the server rejected
    pub activation_failures: usize,
}

impl Report {
    /// True when every check passed. Rejected activations do not count as failures.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|check| !check.passed)
    }

    fn check(&mut self, name: &'static str, passed: bool, detail: impl Into<String>) {
        let detail = detail.into();
        if !passed {
            warn!("Check '{}' failed: {}", name, detail);
        }
        self.checks.push(Check {
            name,
            passed,
            detail,
        });
    }
}

/// Hook called while the run waits for an out-of-band layout change.
pub type Operator<'a> = dyn FnMut(&mut Engine) -> io::Result<()> + 'a;

struct Driver<'a, W: Write> {
    engine: &'a mut Engine,
    out: W,
    report: Report,
}

/// Run the conformance sequence against `engine`, printing progress to `out`.
///
/// `operator` is called once between the two state reads; an interactive caller waits
/// for the user there, tests change the group directly.
pub fn run<W: Write>(engine: &mut Engine, out: W, operator: &mut Operator<'_>) -> Result<Report, Failure> {
    let mut driver = Driver {
        engine,
        out,
        report: Report::default(),
    };
    driver.run(operator)?;
    Ok(driver.report)
}

impl<W: Write> Driver<'_, W> {
    fn run(&mut self, operator: &mut Operator<'_>) -> Result<(), Failure> {
        self.engine_section()?;
        self.check_item();
        self.layouts_section()?;

        writeln!(self.out, "\n== ConfigRec ==")?;
        let initial = self.read_server()?;
        self.print_rec("Current configuration:", &initial)?;
        self.add_remove_layout(&initial)?;

        let mut rec = self.read_server()?;
        self.switch_model(&mut rec)?;

        let original = rec.clone();
        if !rec.options.iter().any(|option| option.contains("toggle")) {
            writeln!(self.out, "Adding Alt+Shift as an option for switching layouts...")?;
            let mut options = rec.options.clone();
            options.push(TOGGLE_OPTION.to_string());
            rec.set_options(options);
            self.activate(&rec)?;
        }
        if rec.layouts.len() == 1 {
            writeln!(self.out, "Adding Danish layout...")?;
            self.push_layout(&mut rec);
            self.activate(&rec)?;
        }

        self.print_active_layout()?;
        writeln!(self.out, "Please change your layout and hit ENTER")?;
        self.out.flush()?;
        operator(&mut *self.engine)?;
        self.print_active_layout()?;

        writeln!(self.out, "Restoring original configuration...")?;
        rec.set_layouts(original.layouts.clone());
        rec.set_variants(original.variants.clone());
        rec.set_options(original.options.clone());
        if self.activate(&rec)? {
            let restored = self.read_server()?;
            self.report.check(
                "original configuration restored",
                restored == original,
                format!("expected {:?}, read {:?}", original, restored),
            );
        }

        self.checks_section()
    }

    fn engine_section(&mut self) -> Result<(), Failure> {
        let engine = &mut *self.engine;
        writeln!(self.out, "== Engine ==")?;
        writeln!(self.out, "indicator names: {:?}", engine.indicators_names())?;
        writeln!(self.out, "group names: {:?}", engine.groups_names())?;

        let default_group = engine.default_group();
        let default_name = engine.groups_names().get(default_group).cloned();
        writeln!(
            self.out,
            "default layout: {}",
            default_name.as_deref().unwrap_or("<none>")
        )?;
        writeln!(self.out, "features: {:X}", engine.features().bits())?;

        let state = engine.current_state();
        writeln!(
            self.out,
            "current state: group: {}, indicators: {}",
            state.group, state.indicators
        )?;

        let num_groups = engine.num_groups();
        self.report.check(
            "default group in range",
            default_name.is_some(),
            format!("default group {} of {}", default_group, num_groups),
        );
        self.report.check(
            "current group in range",
            state.group < num_groups,
            format!("group {} of {}", state.group, num_groups),
        );
        Ok(())
    }

    fn check_item(&mut self) {
        let mut item = ConfigItem::new();
        let fresh = item.name().to_string();
        item.set_name("fr");
        self.report.check(
            "config item name round-trip",
            fresh.is_empty() && item.name() == "fr",
            format!("fresh {:?}, after set {:?}", fresh, item.name()),
        );
    }

    fn layouts_section(&mut self) -> Result<(), Failure> {
        let mut registry = ConfigRegistry::new(self.engine);
        if let Err(e) = registry.load(false) {
            writeln!(self.out, "Failed to load registry")?;
            return Err(Failure::Load(e));
        }

        writeln!(self.out, "\n== Available Layouts ==")?;
        let mut names = HashSet::new();
        let mut count = 0;
        for item in registry.layouts() {
            write!(self.out, "[{}] {}, ", item.name(), item.description())?;
            names.insert(item.name().to_string());
            count += 1;
        }
        writeln!(self.out)?;

        let unresolved: Vec<&String> = names
            .iter()
            .filter(|name| registry.find_layout(name).is_none())
            .collect();
        self.report.check(
            "layout enumeration complete",
            count == names.len() && unresolved.is_empty(),
            format!(
                "{} yielded, {} distinct, unresolved {:?}",
                count,
                names.len(),
                unresolved
            ),
        );
        Ok(())
    }

    fn add_remove_layout(&mut self, initial: &ConfigRec) -> Result<(), Failure> {
        writeln!(self.out, "Adding Danish layout...")?;
        let mut rec = initial.clone();
        self.push_layout(&mut rec);
        if !self.activate(&rec)? {
            writeln!(self.out, "Skipping removal, the Danish layout was not added")?;
            return Ok(());
        }

        let mut added = self.read_server()?;
        self.print_rec("Current configuration:", &added)?;
        self.check_read_back("read back after adding layout", &rec, &added);

        writeln!(self.out, "Removing Danish layout...")?;
        added.layouts.pop();
        added.variants.pop();
        if self.activate(&added)? {
            let removed = self.read_server()?;
            self.print_rec("Current configuration:", &removed)?;
            self.report.check(
                "add/remove restores layouts",
                removed.layouts == initial.layouts && removed.variants == initial.variants,
                format!(
                    "expected {:?} {:?}, read {:?} {:?}",
                    initial.layouts, initial.variants, removed.layouts, removed.variants
                ),
            );
        }
        Ok(())
    }

    fn switch_model(&mut self, rec: &mut ConfigRec) -> Result<(), Failure> {
        let original_model = rec.model.clone();

        writeln!(self.out, "Changing model to \"{}\"...", TEST_MODEL)?;
        rec.set_model(TEST_MODEL);
        if self.activate(rec)? {
            let read = self.read_server()?;
            self.print_rec("Current configuration:", &read)?;
            self.report.check(
                "model round-trip",
                read.model == TEST_MODEL,
                format!("read model {:?}", read.model),
            );
        }

        writeln!(self.out, "Changing back to original model...")?;
        rec.set_model(original_model.clone());
        if self.activate(rec)? {
            let read = self.read_server()?;
            self.print_rec("Current configuration:", &read)?;
            self.report.check(
                "original model restored",
                read.model == original_model,
                format!("expected {:?}, read {:?}", original_model, read.model),
            );
        }
        Ok(())
    }

    fn push_layout(&self, rec: &mut ConfigRec) {
        let mut layouts = rec.layouts.clone();
        let mut variants = rec.variants.clone();
        layouts.push(EXTRA_LAYOUT.to_string());
        variants.push(String::new());
        rec.set_layouts(layouts);
        rec.set_variants(variants);
    }

    /// Arm state tracking, read the active group and disarm again.
    fn print_active_layout(&mut self) -> Result<(), Failure> {
        self.engine.start_listen(ListenModes::TRACK_KEYBOARD_STATE);
        let groups_names = self.engine.groups_names().to_vec();
        let state = self.engine.current_state();
        self.engine.stop_listen(ListenModes::TRACK_KEYBOARD_STATE);

        let current = groups_names
            .get(state.group)
            .map(String::as_str)
            .unwrap_or("<none>");
        writeln!(self.out, "Current active layout: {}", current)?;
        info!("Active group {} ({})", state.group, current);
        Ok(())
    }

    /// Activate `rec`, reporting a rejection without stopping the run.
    fn activate(&mut self, rec: &ConfigRec) -> Result<bool, Failure> {
        match rec.activate(self.engine) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Activation rejected: {}", e);
                writeln!(self.out, "Failed to activate new configuration")?;
                self.report.activation_failures += 1;
                Ok(false)
            }
        }
    }

    fn read_server(&mut self) -> Result<ConfigRec, Failure> {
        let mut rec = ConfigRec::new();
        if let Err(e) = rec.get_from_server(self.engine) {
            writeln!(self.out, "Failed to get configuration from server")?;
            return Err(Failure::Query(e));
        }
        self.report.check(
            "layouts and variants aligned",
            rec.is_aligned(),
            format!("{} layouts, {} variants", rec.layouts.len(), rec.variants.len()),
        );
        Ok(rec)
    }

    fn check_read_back(&mut self, name: &'static str, written: &ConfigRec, read: &ConfigRec) {
        self.report.check(
            name,
            written == read,
            format!("wrote {:?}, read {:?}", written, read),
        );
    }

    fn print_rec(&mut self, title: &str, rec: &ConfigRec) -> Result<(), Failure> {
        writeln!(self.out, "{}", title)?;
        writeln!(self.out, "  Model: {}", rec.model)?;
        writeln!(self.out, "  Layouts: {:?}", rec.layouts)?;
        writeln!(self.out, "  Variants: {:?}", rec.variants)?;
        writeln!(self.out, "  Options: {:?}", rec.options)?;
        Ok(())
    }

    fn checks_section(&mut self) -> Result<(), Failure> {
        writeln!(self.out, "\n== Checks ==")?;
        for check in &self.report.checks {
            let status = if check.passed { "ok" } else { "FAILED" };
            writeln!(self.out, "{}: {} ({})", status, check.name, check.detail)?;
        }
        if self.report.activation_failures > 0 {
            writeln!(
                self.out,
                "{} activation(s) rejected by the server",
                self.report.activation_failures
            )?;
        }
        Ok(())
    }
}

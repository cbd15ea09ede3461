//! xkl binary entry point
//!
//! Runs the conformance driver and small maintenance commands against a display.
//!
//! # Exit Codes
//!
//! - 0: Completed
//! - 1: Registry load or configuration read failed
//! - 2: Engine could not be initialized, or `--strict` and a check failed

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use xkl_core::config::BackendKind;
use xkl_core::conformance;
use xkl_core::props::split_by_comma;
use xkl_core::{ConfigItem, ConfigRec, ConfigRegistry, Display, Engine, ListenModes, Settings};

const DEFAULT_FILTER: &str = "xkl_core=info,xkl=info";

/// Interval between server polls in `monitor`
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "xkl")]
#[command(about = "Keyboard layout configuration engine and conformance driver")]
struct Cli {
    /// Display to connect to (defaults to $DISPLAY)
    #[arg(long, global = true)]
    display: Option<String>,

    /// Backend: xkb or headless (defaults to $XKL_BACKEND)
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Directory searched for registry XML before the system one
    #[arg(long, global = true, default_value = "data")]
    local_data: PathBuf,

    /// Log to journald instead of stderr
    #[arg(long, global = true)]
    journald: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the conformance driver
    Conformance {
        /// Exit with 2 when a verification check fails
        #[arg(long)]
        strict: bool,
        /// Do not wait for a manual layout change
        #[arg(long)]
        no_wait: bool,
    },
    /// Print the active configuration
    Get {
        /// Print the backed up configuration instead
        #[arg(long)]
        backup: bool,
    },
    /// Change the active configuration; unspecified fields keep their value
    Set {
        #[arg(long)]
        model: Option<String>,
        /// Comma-separated layouts
        #[arg(long)]
        layouts: Option<String>,
        /// Comma-separated variants, one per layout
        #[arg(long)]
        variants: Option<String>,
        /// Comma-separated options
        #[arg(long)]
        options: Option<String>,
    },
    /// Save the active configuration unless a backup exists
    Backup,
    /// Reactivate the backed up configuration
    Restore,
    /// Write the keymap of the active configuration to a file
    Write {
        path: PathBuf,
        #[arg(long)]
        binary: bool,
    },
    /// List the layouts known to the registry
    Layouts {
        /// Merge the extras registry
        #[arg(long)]
        extras: bool,
        /// Also list option groups
        #[arg(long)]
        options: bool,
        /// Also list countries and languages with their layouts
        #[arg(long)]
        iso: bool,
    },
    /// Print engine events as JSON lines
    Monitor {
        /// Exit after this many events
        #[arg(long)]
        count: Option<usize>,
    },
    /// Lock a group on the server
    LockGroup { group: usize },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.journald);

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("xkl: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn init_logging(journald: bool) {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if journald {
        match tracing_journald::layer() {
            Ok(layer) => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.with_syslog_identifier("xkl".to_string()))
                    .init();
                return;
            }
            // Fallback for systems without journald
            Err(e) => eprintln!("xkl: journald unavailable ({}), logging to stderr", e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::from_env();
    if let Some(display) = &cli.display {
        settings.display = display.clone();
    }
    if let Some(backend) = &cli.backend {
        settings.backend = BackendKind::parse(backend)
            .with_context(|| format!("unknown backend '{}'", backend))?;
    }
    if cli.local_data.is_dir() {
        settings.prepend_registry_dir(cli.local_data.clone());
    }
    Ok(settings)
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let settings = settings(&cli)?;
    let mut engine = match Display::open(&settings).and_then(Engine::new) {
        Ok(engine) => engine,
        // The headless backend loads its registry while opening
        Err(e) if e.is_registry_load() => {
            error!("Failed to load registry: {}", e);
            eprintln!("xkl: failed to load registry: {}", e);
            return Ok(1);
        }
        Err(e) => {
            error!("Could not initialize engine on {}: {}", settings.display, e);
            eprintln!("xkl: could not initialize engine: {}", e);
            return Ok(2);
        }
    };

    match cli.command {
        Command::Conformance { strict, no_wait } => run_conformance(&mut engine, strict, no_wait),
        Command::Get { backup } => {
            let mut rec = ConfigRec::new();
            if backup {
                rec.get_from_backup(&engine)?;
            } else {
                rec.get_from_server(&engine)?;
            }
            println!("rules: [{}]", engine.rules());
            print!("{}", rec);
            Ok(0)
        }
        Command::Set {
            model,
            layouts,
            variants,
            options,
        } => {
            let mut rec = ConfigRec::new();
            rec.get_from_server(&engine)
                .context("Failed to get configuration from server")?;
            if let Some(model) = model {
                rec.set_model(model);
            }
            if let Some(layouts) = layouts {
                rec.set_layouts(split_by_comma(&layouts));
                if variants.is_none() {
                    rec.set_variants(Vec::<String>::new());
                }
            }
            if let Some(variants) = variants {
                rec.set_variants(split_by_comma(&variants));
            }
            if let Some(options) = options {
                rec.set_options(split_by_comma(&options));
            }
            rec.activate(&mut engine)
                .context("Failed to activate new configuration")?;
            print!("{}", rec);
            Ok(0)
        }
        Command::Backup => {
            engine.backup_names_prop()?;
            Ok(0)
        }
        Command::Restore => {
            engine.restore_names_prop()?;
            Ok(0)
        }
        Command::Write { path, binary } => {
            let mut rec = ConfigRec::new();
            rec.get_from_server(&engine)?;
            rec.write_to_file(&engine, &path, binary)?;
            Ok(0)
        }
        Command::Layouts {
            extras,
            options,
            iso,
        } => {
            let mut registry = ConfigRegistry::new(&engine);
            registry.load(extras).context("Failed to load registry")?;
            print_registry(&registry, options)?;
            if iso {
                print_iso(&registry)?;
            }
            Ok(0)
        }
        Command::Monitor { count } => monitor(&mut engine, count),
        Command::LockGroup { group } => {
            engine.lock_group(group)?;
            Ok(0)
        }
    }
}

fn run_conformance(engine: &mut Engine, strict: bool, no_wait: bool) -> anyhow::Result<i32> {
    let mut operator = |_: &mut Engine| -> io::Result<()> {
        if no_wait {
            return Ok(());
        }
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(())
    };

    let stdout = io::stdout();
    match conformance::run(engine, stdout.lock(), &mut operator) {
        Ok(report) => {
            let failed = report.failed().count();
            info!(
                "Conformance run finished: {} checks, {} failed, {} activations rejected",
                report.checks.len(),
                failed,
                report.activation_failures
            );
            Ok(if strict && failed > 0 { 2 } else { 0 })
        }
        Err(conformance::Failure::Output(e)) => {
            Err(anyhow::Error::new(e).context("could not write output"))
        }
        Err(failure) => {
            match std::error::Error::source(&failure) {
                Some(source) => error!("{}: {}", failure, source),
                None => error!("{}", failure),
            }
            Ok(failure.exit_code())
        }
    }
}

fn print_registry(registry: &ConfigRegistry, with_options: bool) -> io::Result<()> {
    let mut out = io::stdout().lock();
    for layout in registry.layouts() {
        writeln!(out, "{}: {}", layout.name(), layout.description())?;
        for variant in registry.layout_variants(layout.name()) {
            writeln!(out, "  {}: {}", variant.name(), variant.description())?;
        }
    }
    if with_options {
        for group in registry.option_groups() {
            let multiple = if group.allow_multiple_selection { "" } else { " (exclusive)" };
            writeln!(out, "{}: {}{}", group.item.name(), group.item.description(), multiple)?;
            for option in &group.options {
                writeln!(out, "  {}: {}", option.name(), option.description())?;
            }
        }
    }
    Ok(())
}

fn print_iso(registry: &ConfigRegistry) -> io::Result<()> {
    let mut out = io::stdout().lock();
    for country in registry.countries() {
        let layouts = layout_names(registry.country_variants(country.name()));
        writeln!(out, "{}: {} [{}]", country.name(), country.description(), layouts)?;
    }
    for language in registry.languages() {
        let layouts = layout_names(registry.language_variants(language.name()));
        writeln!(out, "{}: {} [{}]", language.name(), language.description(), layouts)?;
    }
    Ok(())
}

/// `us, gb(extd)`
fn layout_names(found: Vec<(&ConfigItem, Option<&ConfigItem>)>) -> String {
    found
        .into_iter()
        .map(|(layout, variant)| match variant {
            Some(variant) => format!("{}({})", layout.name(), variant.name()),
            None => layout.name().to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn monitor(engine: &mut Engine, count: Option<usize>) -> anyhow::Result<i32> {
    let modes = ListenModes::TRACK_KEYBOARD_STATE | ListenModes::MANAGE_LAYOUTS;
    engine.start_listen(modes);

    if let Err(err) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!("Error notifying systemd: {err:?}");
    }
    info!("Monitoring {}", engine.display().name());

    let mut out = io::stdout().lock();
    let mut seen = 0;
    loop {
        for event in engine.poll_events()? {
            writeln!(out, "{}", serde_json::to_string(&event)?)?;
            out.flush()?;
            seen += 1;
            if count.is_some_and(|count| seen >= count) {
                engine.stop_listen(modes);
                return Ok(0);
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

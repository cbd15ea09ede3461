//! The engine: keyboard state and configuration of one display.
//!
//! The engine caches what it last saw on the server (configuration, group and indicator
//! names, keyboard state) and talks to the server through the display's backend.
//!
//! # Listening
//!
//! Listening is reference counted per mode: every `start_listen` needs a matching
//! `stop_listen`. While [`ListenModes::TRACK_KEYBOARD_STATE`] is armed and listening is
//! not paused, [`Engine::current_state`] synchronizes with the server before answering.
//! Otherwise it returns the cached state, so out-of-band changes stay invisible.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::display::Display;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::props::{split_embedded_variant, RulesNames, RULES_NAMES_BACKUP_PROP, RULES_NAMES_PROP};
use crate::rec::ConfigRec;

bitflags! {
    /// What the backend behind an engine can do.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Features: u32 {
        const CAN_TOGGLE_INDICATORS = 0x01;
        const CAN_OUTPUT_CONFIG_AS_ASCII = 0x02;
        const CAN_OUTPUT_CONFIG_AS_BINARY = 0x04;
        const MULTIPLE_LAYOUTS_SUPPORTED = 0x08;
        const REQUIRES_MANUAL_LAYOUT_MANAGEMENT = 0x10;
    }
}

bitflags! {
    /// Listening modes for [`Engine::start_listen`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ListenModes: u32 {
        /// Counted like the other modes but enables nothing: groups are not tracked
        /// per window. Kept so existing bitmasks stay valid.
        const MANAGE_WINDOW_STATES = 0x01;
        const TRACK_KEYBOARD_STATE = 0x02;
        const MANAGE_LAYOUTS = 0x04;
    }
}

/// Number of distinct listen modes
const LISTEN_MODE_COUNT: usize = 3;

/// Keyboard state: the locked group and the indicator bitmask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub group: usize,
    pub indicators: u32,
}

pub struct Engine {
    display: Display,
    rules: String,
    /// Configuration last seen on the server
    config: ConfigRec,
    groups_names: Vec<String>,
    indicators_names: Vec<String>,
    default_group: usize,
    state: State,
    listeners: [u32; LISTEN_MODE_COUNT],
    paused: bool,
}

impl Engine {
    /// Bind an engine to `display`, reading the server's configuration and state.
    pub fn new(display: Display) -> Result<Self> {
        let mut engine = Self {
            display,
            rules: String::new(),
            config: ConfigRec::default(),
            groups_names: Vec::new(),
            indicators_names: Vec::new(),
            default_group: 0,
            state: State::default(),
            listeners: [0; LISTEN_MODE_COUNT],
            paused: false,
        };

        let names = engine.read_rules_names(RULES_NAMES_PROP)?;
        engine.apply_names(names)?;
        engine.state = engine.clamp(engine.display.backend().read_state()?);

        info!(
            "Engine on {} ({}): groups {:?}, features {:#x}",
            engine.display.name(),
            engine.backend_name(),
            engine.groups_names,
            engine.features().bits()
        );
        Ok(engine)
    }

    pub fn display(&self) -> &Display {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut Display {
        &mut self.display
    }

    pub fn backend_name(&self) -> &'static str {
        self.display.backend().name()
    }

    pub fn features(&self) -> Features {
        self.display.backend().features()
    }

    pub fn max_num_groups(&self) -> usize {
        self.display.backend().max_num_groups()
    }

    pub fn num_groups(&self) -> usize {
        self.groups_names.len()
    }

    /// Human-readable names of the active groups, in group order.
    pub fn groups_names(&self) -> &[String] {
        &self.groups_names
    }

    pub fn indicators_names(&self) -> &[String] {
        &self.indicators_names
    }

    pub fn default_group(&self) -> usize {
        self.default_group
    }

    pub fn set_default_group(&mut self, group: usize) -> Result<()> {
        self.check_group(group)?;
        self.default_group = group;
        Ok(())
    }

    /// Rules file of the active configuration.
    pub fn rules(&self) -> &str {
        &self.rules
    }

    /// Current keyboard state; see the module docs for when it is refreshed.
    pub fn current_state(&mut self) -> State {
        if self.is_tracking() {
            self.sync_state();
        }
        self.state
    }

    /// The group after the current one, wrapping around.
    pub fn next_group(&self) -> usize {
        match self.num_groups() {
            0 => 0,
            n => (self.state.group + 1) % n,
        }
    }

    /// The group before the current one, wrapping around.
    pub fn prev_group(&self) -> usize {
        match self.num_groups() {
            0 => 0,
            n => (self.state.group + n - 1) % n,
        }
    }

    pub fn lock_group(&mut self, group: usize) -> Result<()> {
        self.check_group(group)?;
        let backend = self.display.backend_mut();
        let mut state = backend.read_state()?;
        state.group = group;
        backend.write_state(state)?;
        self.state.group = group;
        info!("Locked group {} ({})", group, self.groups_names[group]);
        Ok(())
    }

    pub fn set_indicator(&mut self, index: usize, on: bool) -> Result<()> {
        let count = self.indicators_names.len();
        if index >= count {
            return Err(Error::IndicatorOutOfRange { index, count });
        }
        let backend = self.display.backend_mut();
        let mut state = backend.read_state()?;
        if on {
            state.indicators |= 1u32 << index;
        } else {
            state.indicators &= !(1u32 << index);
        }
        backend.write_state(state)?;
        self.state.indicators = state.indicators;
        debug!("Indicator {} set to {}", self.indicators_names[index], on);
        Ok(())
    }

    pub fn start_listen(&mut self, modes: ListenModes) {
        for mode in modes.iter() {
            let count = &mut self.listeners[listen_slot(mode)];
            *count += 1;
            debug!("start_listen {:?}: {} listener(s)", mode, *count);
        }
        if modes.contains(ListenModes::TRACK_KEYBOARD_STATE) && !self.paused {
            self.sync_state();
        }
    }

    pub fn stop_listen(&mut self, modes: ListenModes) {
        for mode in modes.iter() {
            let count = &mut self.listeners[listen_slot(mode)];
            if *count == 0 {
                warn!("stop_listen {:?} without a matching start_listen", mode);
                continue;
            }
            *count -= 1;
            debug!("stop_listen {:?}: {} listener(s)", mode, *count);
        }
    }

    /// Suspend listening without dropping the listener counts.
    pub fn pause_listen(&mut self) {
        self.paused = true;
    }

    pub fn resume_listen(&mut self) {
        self.paused = false;
        if self.is_listening(ListenModes::TRACK_KEYBOARD_STATE) {
            self.sync_state();
        }
    }

    /// True when every mode in `modes` has at least one listener.
    pub fn is_listening(&self, modes: ListenModes) -> bool {
        !modes.is_empty() && modes.iter().all(|mode| self.listeners[listen_slot(mode)] > 0)
    }

    /// Compare the server with the cached view and report what changed.
    ///
    /// Returns nothing unless [`ListenModes::TRACK_KEYBOARD_STATE`] or
    /// [`ListenModes::MANAGE_LAYOUTS`] is armed and listening is not paused. Group and
    /// indicator changes need `TRACK_KEYBOARD_STATE`. Changes already picked up by
    /// [`Engine::current_state`] are not reported again.
    pub fn poll_events(&mut self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        let watching = self.is_listening(ListenModes::TRACK_KEYBOARD_STATE)
            || self.is_listening(ListenModes::MANAGE_LAYOUTS);
        if self.paused || !watching {
            return Ok(events);
        }

        let names = self.read_rules_names(RULES_NAMES_PROP)?;
        if names.rules != self.rules || names.config != self.config {
            self.apply_names(names)?;
            info!("Server configuration changed: {:?}", self.config.layouts);
            events.push(Event::ConfigChanged {
                layouts: self.config.layouts.clone(),
            });
        }

        if self.is_listening(ListenModes::TRACK_KEYBOARD_STATE) {
            let server = self.clamp(self.display.backend().read_state()?);
            if server.group != self.state.group {
                events.push(Event::GroupChanged {
                    group: server.group,
                    name: self.groups_names[server.group].clone(),
                });
            }
            if server.indicators != self.state.indicators {
                events.push(Event::IndicatorsChanged {
                    indicators: server.indicators,
                });
            }
            self.state = server;
        }

        Ok(events)
    }

    /// Read and decode a rules names property from the server.
    pub fn read_rules_names(&self, prop: &str) -> Result<RulesNames> {
        let data = self
            .display
            .backend()
            .read_property(prop)?
            .ok_or_else(|| Error::PropertyMissing(prop.to_string()))?;
        RulesNames::decode(&data)
    }

    /// Make `rec` the server's active configuration.
    ///
    /// Nothing on the server changes unless the whole record is accepted.
    pub fn activate(&mut self, rec: &ConfigRec) -> Result<()> {
        let names = self.normalize(&self.rules, rec)?;
        self.activate_names(names)
    }

    /// Textual keymap `rec` compiles to, without activating it.
    pub fn keymap_text(&self, rec: &ConfigRec) -> Result<String> {
        let names = self.normalize(&self.rules, rec)?;
        self.display.backend().keymap_text(&names)
    }

    /// Save the active configuration to the backup property, unless a backup exists.
    pub fn backup_names_prop(&mut self) -> Result<()> {
        let backend = self.display.backend_mut();
        if backend.read_property(RULES_NAMES_BACKUP_PROP)?.is_some() {
            debug!("{} already present, keeping it", RULES_NAMES_BACKUP_PROP);
            return Ok(());
        }
        let data = backend
            .read_property(RULES_NAMES_PROP)?
            .ok_or_else(|| Error::PropertyMissing(RULES_NAMES_PROP.to_string()))?;
        backend.write_property(RULES_NAMES_BACKUP_PROP, &data)?;
        info!("Backed up {} to {}", RULES_NAMES_PROP, RULES_NAMES_BACKUP_PROP);
        Ok(())
    }

    /// Reactivate the configuration saved by [`Engine::backup_names_prop`].
    pub fn restore_names_prop(&mut self) -> Result<()> {
        let backup = self.read_rules_names(RULES_NAMES_BACKUP_PROP)?;
        let names = self.normalize(&backup.rules, &backup.config)?;
        self.activate_names(names)?;
        info!("Restored configuration from {}", RULES_NAMES_BACKUP_PROP);
        Ok(())
    }

    fn activate_names(&mut self, names: RulesNames) -> Result<()> {
        let info = self.display.backend().compile(&names)?;
        let data = names.encode()?;

        let backend = self.display.backend_mut();
        let mut state = backend.read_state()?;
        let reset_group = state.group >= info.groups_names.len();
        if reset_group {
            state.group = 0;
        }
        let previous = backend.read_property(RULES_NAMES_PROP)?;

        backend.write_property(RULES_NAMES_PROP, &data)?;
        if reset_group {
            if let Err(e) = backend.write_state(state) {
                // The new group count is unusable without the reset
                match previous {
                    Some(previous) => {
                        if let Err(undo) = backend.write_property(RULES_NAMES_PROP, &previous) {
                            warn!("Could not restore {}: {}", RULES_NAMES_PROP, undo);
                        }
                    }
                    None => warn!("No previous {} to restore", RULES_NAMES_PROP),
                }
                return Err(e);
            }
        }

        info!(
            "Activated model {:?}, layouts {:?}, variants {:?}, options {:?}",
            names.config.model, names.config.layouts, names.config.variants, names.config.options
        );
        self.rules = names.rules;
        self.config = names.config;
        self.set_names(info.groups_names, info.indicators_names);
        self.state = state;
        Ok(())
    }

    /// Check `rec` against the server's limits and put it in the form the server stores.
    fn normalize(&self, rules: &str, rec: &ConfigRec) -> Result<RulesNames> {
        if rec.layouts.is_empty() {
            return Err(Error::NoLayouts);
        }
        if !rec.variants.is_empty() && !rec.is_aligned() {
            return Err(Error::LengthMismatch {
                layouts: rec.layouts.len(),
                variants: rec.variants.len(),
            });
        }
        let max = self.max_num_groups();
        if rec.layouts.len() > max {
            return Err(Error::TooManyGroups {
                requested: rec.layouts.len(),
                max,
            });
        }

        let mut config = rec.clone();
        config.variants.resize(config.layouts.len(), String::new());
        for (layout, variant) in config.layouts.iter_mut().zip(config.variants.iter_mut()) {
            if let Some((name, embedded)) = split_embedded_variant(layout) {
                *variant = embedded.to_string();
                *layout = name.to_string();
            }
        }
        Ok(RulesNames::new(rules, config))
    }

    fn apply_names(&mut self, names: RulesNames) -> Result<()> {
        let info = self.display.backend().compile(&names)?;
        self.rules = names.rules;
        self.config = names.config;
        self.set_names(info.groups_names, info.indicators_names);
        Ok(())
    }

    fn set_names(&mut self, groups_names: Vec<String>, indicators_names: Vec<String>) {
        self.groups_names = groups_names;
        self.indicators_names = indicators_names;
        if self.default_group >= self.groups_names.len() {
            self.default_group = 0;
        }
        self.state = self.clamp(self.state);
    }

    fn is_tracking(&self) -> bool {
        !self.paused && self.is_listening(ListenModes::TRACK_KEYBOARD_STATE)
    }

    fn sync_state(&mut self) {
        match self.display.backend().read_state() {
            Ok(state) => self.state = self.clamp(state),
            Err(e) => warn!("Could not read keyboard state: {}", e),
        }
    }

    /// Keep the group index valid for the cached group names.
    fn clamp(&self, mut state: State) -> State {
        if state.group >= self.groups_names.len() {
            state.group = 0;
        }
        state
    }

    fn check_group(&self, group: usize) -> Result<()> {
        let count = self.num_groups();
        if group >= count {
            return Err(Error::GroupOutOfRange { group, count });
        }
        Ok(())
    }
}

fn listen_slot(mode: ListenModes) -> usize {
    mode.bits().trailing_zeros() as usize
}

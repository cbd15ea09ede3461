//! Events reported by the engine while listening.
//!
//! Events are produced by [`Engine::poll_events`](crate::engine::Engine::poll_events),
//! which compares the server with the engine's cached view. They serialize to one JSON
//! object per event for the `monitor` command.

use serde::Serialize;

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum Event {
    /// The active configuration was replaced
    #[serde(rename = "config-changed")]
    ConfigChanged { layouts: Vec<String> },
    /// The locked group changed
    #[serde(rename = "group-changed")]
    GroupChanged { group: usize, name: String },
    /// One or more indicators were toggled
    #[serde(rename = "indicators-changed")]
    IndicatorsChanged { indicators: u32 },
}

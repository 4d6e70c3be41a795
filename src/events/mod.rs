//! Swarm event system
//!
//! Components emit [`SwarmEvent`]s to the process-wide [`EventBus`];
//! consumers (the CLI forwarder, external dashboards) subscribe. Delivery
//! within one emit call is in subscription order; nothing survives a crash.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use types::{EventLogEntry, Phase, SwarmEvent};

//! Driver position tracking.
//!
//! Samples flow [`PositionLedger`] → [`LivePositionBus`] → subscriber streams.
//! [`Tracker`] ties the two together for ingestion.

mod bus;
mod error;
mod ledger;
mod pubsub;
mod tracker;

pub use bus::{delivery_channel, BusEvent, LivePosition, LivePositionBus, PositionStream, DEFAULT_HEARTBEAT};
pub use error::{LedgerError, TransportError};
pub use ledger::{PositionInput, PositionLedger, Recorded};
pub use pubsub::{BroadcastHub, PubSub, Subscription};
pub use tracker::{Submission, Tracker};

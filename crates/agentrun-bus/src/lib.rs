//! AgentRun Message Bus
//!
//! All coordinator/worker communication flows through the [`MessageBus`]
//! trait. Components never share memory for coordination; they exchange
//! [`Envelope`]s addressed by participant name. The in-process
//! [`LocalBus`] is the default transport, and a networked implementation
//! can replace it without touching the participants.

pub mod envelope;
pub mod error;
pub mod local;

pub use envelope::{Envelope, Message};
pub use error::BusError;
pub use local::LocalBus;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Well-known bus address of the coordinator.
pub const COORDINATOR_ADDR: &str = "coordinator";

/// Receiving side of a bus subscription.
pub type BusReceiver = mpsc::Receiver<Envelope>;

/// Transport abstraction for coordinator/worker messaging.
///
/// Implementations must deliver messages between any fixed pair of
/// participants in the order they were sent.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Register an address and obtain its inbound message stream.
    ///
    /// Re-subscribing an address replaces the previous receiver.
    async fn subscribe(&self, address: &str) -> Result<BusReceiver, BusError>;

    /// Remove an address from the bus.
    async fn unsubscribe(&self, address: &str);

    /// Fire-and-forget delivery to one address.
    async fn send(&self, to: &str, message: Message) -> Result<(), BusError>;

    /// Deliver a message to every subscribed address except the sender's.
    async fn broadcast(&self, from: &str, message: Message) -> Result<(), BusError>;

    /// Send a message and wait for the correlated reply.
    async fn request(
        &self,
        to: &str,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, BusError>;

    /// Reply to a previously received envelope.
    async fn respond(&self, to: &Envelope, message: Message) -> Result<(), BusError>;
}

//! Broadcast fabric (C6).
//!
//! A process-wide `Bus::publish(channel, event)` that reaches every
//! subscriber of `channel`, plus the protocol state machine
//! (`StreamSession`) a streaming endpoint drives per authenticated client.
//! Topic-addressed, multi-subscriber, eviction-on-stall: a slow consumer
//! is disconnected, never allowed to apply backpressure to the producer.

mod bus;
mod event;
mod stream_session;

pub use bus::Bus;
pub use event::{epic_channel, execution_channel, workflow_channel, Event};
pub use stream_session::{CloseCode, StreamSession};

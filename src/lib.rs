//! MQTT v3.1.1 client session management.
//!
//! This crate owns the session-and-QoS state machine of an MQTT client:
//! the CONNECT/DISCONNECT lifecycle over an optionally secured transport,
//! a background receive pump dispatching broker packets, the PUBLISH /
//! SUBSCRIBE / UNSUBSCRIBE acknowledgement protocol with bounded retry,
//! publish-resend when a resumed session reports `sessionPresent`, and
//! asynchronous disconnect notification.
//!
//! Wire serialization and the network transport are consumed behind the
//! [`Codec`] and [`Transport`] traits; the embedder supplies both.
//!
//! Call [`init`] once per process, [`Client::create`] per broker session,
//! and [`deinit`] after the last client is deleted.

#[macro_use]
extern crate log;

mod client;
mod codec;
pub mod config;
mod connect;
mod dispatch;
mod error;
mod library;
mod message;
mod pump;
mod registry;
mod retry;
#[cfg(test)]
mod testing;
mod transport;

pub use crate::client::Client;
pub use crate::codec::{
    Codec, CodecError, EventSink, IncomingPacket, NetworkIo, SubAckCode, TopicFilter,
};
pub use crate::error::{Error, Result};
pub use crate::library::{deinit, init};
pub use crate::message::{
    ConnectOptions, DisconnectReason, Event, EventCallback, LastWill, PublishMessage, QoS,
    ReceivedPublish, Subscription,
};
pub use crate::transport::{Credentials, DisconnectNotifier, ServerInfo, Transport};

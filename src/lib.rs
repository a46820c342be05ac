//! Client for the Blueprint key-value contract.
//!
//! [`ContractSession`] wraps the contract's `store`, `load` and `remove`
//! functions behind a lazily opened connection. Events emitted by the
//! contract are decoded as they arrive and queued in an
//! [`EventDispatchQueue`]; subscribers only run when the host calls
//! [`ContractSession::drain`], typically once per tick of its main loop.

pub mod basic_elements;
pub mod client;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
#[cfg(feature = "massa")]
pub mod helpers;
pub mod logging;
pub mod types;

pub use client::{ChainConnector, ChainTransport, ContractSession, InMemoryChain};
pub use config::{SessionConfig, UnknownEventPolicy};
pub use dispatch::{EventDispatchQueue, SubscriptionId};
pub use error::{EventError, RemoteCallError};
pub use types::{BlueprintEvent, RawEvent};

use std::{pin::Pin, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use tokio_stream::Stream;

use crate::types::RawEvent;

/// Events emitted by a contract, in emission order.
pub type RawEventStream = Pin<Box<dyn Stream<Item = RawEvent> + Send>>;

/// An open connection to a chain able to call contracts and stream their events.
#[async_trait]
pub trait ChainTransport: Send + Sync {
    async fn resolve_contract(&self, name: &str) -> Result<String>;

    /// Sends a state-changing call and waits until the chain has executed it.
    async fn call(&self, contract: &str, function: &str, params: Vec<u8>) -> Result<()>;

    /// Executes a call without changing state and returns its raw result.
    async fn read_only_call(&self, contract: &str, function: &str, params: Vec<u8>)
    -> Result<Vec<u8>>;

    async fn subscribe_events(&self, contract: &str) -> Result<RawEventStream>;

    /// Releases the connection. Must be idempotent.
    fn close(&self);
}

/// Configures and opens a [`ChainTransport`].
#[async_trait]
pub trait ChainConnector: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn ChainTransport>>;
}

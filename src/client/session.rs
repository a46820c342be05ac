use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Context;
use parking_lot::Mutex;
use tokio::{sync::OnceCell, task::JoinHandle};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::{
    basic_elements::serializers::{args_to_string, strings_to_args},
    config::{SessionConfig, UnknownEventPolicy},
    constants::{LOAD_FUNCTION, REMOVE_FUNCTION, STORE_FUNCTION},
    dispatch::{EventDispatchQueue, SubscriptionId},
    error::{RemoteCallError, SessionDisposed},
};

use super::transport::{ChainConnector, ChainTransport, RawEventStream};

const CONNECT: &str = "connect";

/// Request surface over the Blueprint contract.
///
/// The connection is opened by the first request (or an explicit
/// [`connect`](Self::connect)); concurrent first callers share the same
/// attempt and a failed attempt is retried by the next caller. Contract
/// events are decoded on the runtime and handed to subscribers only when
/// the host calls [`drain`](Self::drain).
pub struct ContractSession<C> {
    connector: C,
    config: SessionConfig,
    queue: Arc<EventDispatchQueue>,
    connection: OnceCell<Connection>,
    disposed: AtomicBool,
}

struct Connection {
    transport: Arc<dyn ChainTransport>,
    contract_address: String,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    fn shutdown(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.transport.close();
    }
}

impl<C> ContractSession<C> {
    pub fn new(connector: C, config: SessionConfig) -> Self {
        Self {
            connector,
            config,
            queue: Arc::new(EventDispatchQueue::new()),
            connection: OnceCell::new(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<EventDispatchQueue> {
        &self.queue
    }

    pub fn is_connected(&self) -> bool {
        self.connection.initialized() && !self.is_disposed()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// False once the event pump has stopped, either because the stream ended
    /// or because [`UnknownEventPolicy::Halt`] rejected an event. Requests
    /// still work, but new contract events are no longer queued.
    pub fn is_receiving_events(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.connection.get().is_some_and(|connection| {
            connection
                .pump
                .lock()
                .as_ref()
                .is_some_and(|pump| !pump.is_finished())
        })
    }

    pub fn contract_address(&self) -> Option<&str> {
        self.connection
            .get()
            .map(|connection| connection.contract_address.as_str())
    }

    pub fn subscribe_value_changed(
        &self,
        callback: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.queue.subscribe_value_changed(callback)
    }

    pub fn subscribe_value_removed(
        &self,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.queue.subscribe_value_removed(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.queue.unsubscribe(id)
    }

    /// Delivers the queued contract events to subscribers. Call once per host tick.
    pub fn drain(&self) -> usize {
        self.queue.drain()
    }

    /// Detaches from the event stream and closes the transport.
    ///
    /// Idempotent. Every request made afterwards fails.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(connection) = self.connection.get() {
            connection.shutdown();
            info!(contract = %connection.contract_address, "Contract session disposed");
        }
    }
}

impl<C: ChainConnector> ContractSession<C> {
    pub async fn connect(&self) -> Result<(), RemoteCallError> {
        self.connection(CONNECT).await.map(|_| ())
    }

    pub async fn store(&self, key: &str, value: &str) -> Result<(), RemoteCallError> {
        self.call(STORE_FUNCTION, &[key, value]).await?;
        info!(key, "Stored value");
        Ok(())
    }

    /// Returns an empty string when the contract holds no value for `key`.
    pub async fn load(&self, key: &str) -> Result<String, RemoteCallError> {
        let connection = self.connection(LOAD_FUNCTION).await?;
        let failed = |cause| RemoteCallError::new(LOAD_FUNCTION, cause);

        let params = strings_to_args(&[key]).map_err(failed)?;
        let result = connection
            .transport
            .read_only_call(&connection.contract_address, LOAD_FUNCTION, params)
            .await
            .map_err(failed)?;

        let value = args_to_string(&result).map_err(failed)?;
        debug!(key, "Loaded value");
        Ok(value)
    }

    pub async fn remove(&self, key: &str) -> Result<(), RemoteCallError> {
        self.call(REMOVE_FUNCTION, &[key]).await?;
        info!(key, "Removed value");
        Ok(())
    }

    async fn call(&self, function: &'static str, params: &[&str]) -> Result<(), RemoteCallError> {
        let connection = self.connection(function).await?;
        let failed = |cause| RemoteCallError::new(function, cause);

        let params = strings_to_args(params).map_err(failed)?;
        connection
            .transport
            .call(&connection.contract_address, function, params)
            .await
            .map_err(failed)
    }

    async fn connection(&self, operation: &'static str) -> Result<&Connection, RemoteCallError> {
        let disposed = || RemoteCallError::new(operation, SessionDisposed.into());

        if self.is_disposed() {
            return Err(disposed());
        }

        let connection = self
            .connection
            .get_or_try_init(|| self.establish())
            .await
            .map_err(|cause| {
                warn!(operation, error = %format!("{cause:#}"), "Failed to connect to contract");
                RemoteCallError::new(operation, cause)
            })?;

        // dispose() may have run while the connection was being established.
        if self.is_disposed() {
            connection.shutdown();
            return Err(disposed());
        }

        Ok(connection)
    }

    async fn establish(&self) -> anyhow::Result<Connection> {
        info!(contract = %self.config.contract_name, "Connecting to contract");

        let transport = self
            .connector
            .open()
            .await
            .context("Failed to open chain transport")?;

        match Self::attach(&self.config, &transport).await {
            Ok((contract_address, events)) => {
                let pump = tokio::spawn(pump_events(
                    events,
                    Arc::clone(&self.queue),
                    self.config.unknown_event_policy,
                ));

                info!(contract = %contract_address, "Connected to contract");
                Ok(Connection {
                    transport,
                    contract_address,
                    pump: Mutex::new(Some(pump)),
                })
            }
            Err(cause) => {
                transport.close();
                Err(cause)
            }
        }
    }

    async fn attach(
        config: &SessionConfig,
        transport: &Arc<dyn ChainTransport>,
    ) -> anyhow::Result<(String, RawEventStream)> {
        let contract_address = match &config.contract_address {
            Some(address) => address.clone(),
            None => transport
                .resolve_contract(&config.contract_name)
                .await
                .with_context(|| format!("Failed to resolve contract `{}`", config.contract_name))?,
        };

        let events = transport
            .subscribe_events(&contract_address)
            .await
            .with_context(|| format!("Failed to subscribe to events of {}", contract_address))?;

        Ok((contract_address, events))
    }
}

impl<C> Drop for ContractSession<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn pump_events(
    mut events: RawEventStream,
    queue: Arc<EventDispatchQueue>,
    policy: UnknownEventPolicy,
) {
    while let Some(event) = events.next().await {
        let Err(rejected) = queue.on_raw_event(&event) else {
            continue;
        };

        match policy {
            UnknownEventPolicy::Skip => {
                error!(event = %rejected.tag(), error = %rejected, "Skipping contract event");
            }
            UnknownEventPolicy::Halt => {
                error!(event = %rejected.tag(), error = %rejected, "Stopping contract event processing");
                warn!("Contract events are no longer delivered; dispose the session and open a new one to resume");
                return;
            }
        }
    }

    warn!("Contract event stream ended");
}

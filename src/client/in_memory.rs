use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::{
    basic_elements::{args::Args, serializers::strings_to_args},
    constants::{DEFAULT_CONTRACT_NAME, LOAD_FUNCTION, REMOVE_FUNCTION, STORE_FUNCTION},
    types::RawEvent,
};

use super::transport::{ChainConnector, ChainTransport, RawEventStream};

pub const IN_MEMORY_CONTRACT_ADDRESS: &str = "AS1InMemoryBlueprint";

/// A single Blueprint contract living in process memory.
///
/// `store` and `remove` change the key-value map and emit `ValueChanged` /
/// `ValueRemoved` to every event subscriber, `load` returns the stored value
/// or an empty result. Cloning shares the same chain; each `open` hands out
/// its own [`InMemoryTransport`].
#[derive(Clone, Default)]
pub struct InMemoryChain {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    storage: Mutex<HashMap<String, String>>,
    subscribers: Mutex<Vec<Subscriber>>,
    open_delay: Mutex<Option<Duration>>,
    failing_opens: AtomicUsize,
    opens: AtomicUsize,
    live_transports: AtomicUsize,
    next_transport: AtomicU64,
}

struct Subscriber {
    transport: u64,
    sender: mpsc::UnboundedSender<RawEvent>,
}

impl InMemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `open` wait before completing.
    pub fn with_open_delay(self, delay: Duration) -> Self {
        *self.inner.open_delay.lock() = Some(delay);
        self
    }

    /// Makes the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.inner.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Number of times a connection was opened, failed attempts included.
    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// True when every transport opened on this chain has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.live_transports.load(Ordering::SeqCst) == 0
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.inner.storage.lock().get(key).cloned()
    }

    /// Pushes an event to every subscriber as if the contract emitted it.
    pub fn emit(&self, event: RawEvent) {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|subscriber| subscriber.sender.send(event.clone()).is_ok());
    }
}

#[async_trait]
impl ChainConnector for InMemoryChain {
    async fn open(&self) -> Result<Arc<dyn ChainTransport>> {
        self.inner.opens.fetch_add(1, Ordering::SeqCst);

        let delay = *self.inner.open_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .inner
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if failing.is_ok() {
            bail!("Connection refused");
        }

        self.inner.live_transports.fetch_add(1, Ordering::SeqCst);
        let transport: Arc<dyn ChainTransport> = Arc::new(InMemoryTransport {
            chain: self.clone(),
            id: self.inner.next_transport.fetch_add(1, Ordering::SeqCst),
            closed: AtomicBool::new(false),
        });
        Ok(transport)
    }
}

/// One connection to an [`InMemoryChain`]. Closing it ends only the event
/// streams it opened.
pub struct InMemoryTransport {
    chain: InMemoryChain,
    id: u64,
    closed: AtomicBool,
}

impl InMemoryTransport {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("Connection closed");
        }
        Ok(())
    }

    fn ensure_contract(&self, contract: &str) -> Result<()> {
        if contract != IN_MEMORY_CONTRACT_ADDRESS {
            bail!("No contract deployed at {}", contract);
        }
        Ok(())
    }
}

#[async_trait]
impl ChainTransport for InMemoryTransport {
    async fn resolve_contract(&self, name: &str) -> Result<String> {
        self.ensure_open()?;
        if name != DEFAULT_CONTRACT_NAME {
            bail!("Unknown contract name `{}`", name);
        }
        Ok(IN_MEMORY_CONTRACT_ADDRESS.to_string())
    }

    async fn call(&self, contract: &str, function: &str, params: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.ensure_contract(contract)?;

        let storage = &self.chain.inner.storage;
        let mut args = Args::from_bytes(params);
        let event = match function {
            STORE_FUNCTION => {
                let key = args.next_string().context("Failed to read key")?;
                let value = args.next_string().context("Failed to read value")?;
                let event = RawEvent::value_changed(&key, &value)?;
                storage.lock().insert(key, value);
                event
            }
            REMOVE_FUNCTION => {
                let key = args.next_string().context("Failed to read key")?;
                let event = RawEvent::value_removed(&key)?;
                storage.lock().remove(&key);
                event
            }
            other => return Err(anyhow!("Function `{}` not found", other)),
        };

        debug!(transport = self.id, function, "Executed in-memory call");
        self.chain.emit(event);
        Ok(())
    }

    async fn read_only_call(
        &self,
        contract: &str,
        function: &str,
        params: Vec<u8>,
    ) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.ensure_contract(contract)?;

        if function != LOAD_FUNCTION {
            bail!("Function `{}` not found", function);
        }

        let key = Args::from_bytes(params)
            .next_string()
            .context("Failed to read key")?;

        match self.chain.value(&key) {
            Some(value) => strings_to_args(&[value.as_str()]),
            None => Ok(Vec::new()),
        }
    }

    async fn subscribe_events(&self, contract: &str) -> Result<RawEventStream> {
        self.ensure_open()?;
        self.ensure_contract(contract)?;

        let (sender, rx) = mpsc::unbounded_channel();
        self.chain.inner.subscribers.lock().push(Subscriber {
            transport: self.id,
            sender,
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.chain.inner.live_transports.fetch_sub(1, Ordering::SeqCst);
        // Dropping the senders ends this transport's event streams.
        self.chain
            .inner
            .subscribers
            .lock()
            .retain(|subscriber| subscriber.transport != self.id);
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;

    use super::*;
    use crate::basic_elements::serializers::args_to_string;

    async fn store(transport: &Arc<dyn ChainTransport>, key: &str, value: &str) -> Result<()> {
        transport
            .call(
                IN_MEMORY_CONTRACT_ADDRESS,
                STORE_FUNCTION,
                strings_to_args(&[key, value])?,
            )
            .await
    }

    #[tokio::test]
    async fn test_store_then_load() {
        let chain = InMemoryChain::new();
        let transport = chain.open().await.unwrap();

        store(&transport, "k", "v").await.unwrap();
        let result = transport
            .read_only_call(
                IN_MEMORY_CONTRACT_ADDRESS,
                LOAD_FUNCTION,
                strings_to_args(&["k"]).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(args_to_string(&result).unwrap(), "v");
        assert_eq!(chain.value("k").as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_load_missing_key_is_empty() {
        let transport = InMemoryChain::new().open().await.unwrap();

        let result = transport
            .read_only_call(
                IN_MEMORY_CONTRACT_ADDRESS,
                LOAD_FUNCTION,
                strings_to_args(&["missing"]).unwrap(),
            )
            .await
            .unwrap();

        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_calls_emit_events() {
        let chain = InMemoryChain::new();
        let transport = chain.open().await.unwrap();
        let mut events = transport
            .subscribe_events(IN_MEMORY_CONTRACT_ADDRESS)
            .await
            .unwrap();

        store(&transport, "k", "v").await.unwrap();
        transport
            .call(
                IN_MEMORY_CONTRACT_ADDRESS,
                REMOVE_FUNCTION,
                strings_to_args(&["k"]).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            events.next().await,
            Some(RawEvent::value_changed("k", "v").unwrap())
        );
        assert_eq!(
            events.next().await,
            Some(RawEvent::value_removed("k").unwrap())
        );
        assert_eq!(chain.value("k"), None);
    }

    #[tokio::test]
    async fn test_unknown_function_fails() {
        let transport = InMemoryChain::new().open().await.unwrap();

        let result = transport
            .call(IN_MEMORY_CONTRACT_ADDRESS, "destroy", Vec::new())
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_wrong_contract_address_fails() {
        let chain = InMemoryChain::new();
        let transport = chain.open().await.unwrap();

        let result = transport
            .call("AS1Elsewhere", STORE_FUNCTION, strings_to_args(&["k", "v"]).unwrap())
            .await;

        assert!(result.is_err());
        assert_eq!(chain.value("k"), None);
    }

    #[tokio::test]
    async fn test_close_ends_event_streams() {
        let chain = InMemoryChain::new();
        let transport = chain.open().await.unwrap();
        let mut events = transport
            .subscribe_events(IN_MEMORY_CONTRACT_ADDRESS)
            .await
            .unwrap();

        transport.close();

        assert_eq!(events.next().await, None);
        assert!(chain.is_closed());
        assert!(transport.resolve_contract("Blueprint").await.is_err());
    }

    #[tokio::test]
    async fn test_close_leaves_other_transports_open() {
        let chain = InMemoryChain::new();
        let closing = chain.open().await.unwrap();
        let staying = chain.open().await.unwrap();
        let mut closed_events = closing
            .subscribe_events(IN_MEMORY_CONTRACT_ADDRESS)
            .await
            .unwrap();
        let mut events = staying
            .subscribe_events(IN_MEMORY_CONTRACT_ADDRESS)
            .await
            .unwrap();

        closing.close();
        closing.close();

        assert_eq!(closed_events.next().await, None);
        assert!(!chain.is_closed());
        assert_eq!(chain.subscriber_count(), 1);

        store(&staying, "k", "v").await.unwrap();
        assert_eq!(
            events.next().await,
            Some(RawEvent::value_changed("k", "v").unwrap())
        );
        assert!(store(&closing, "k", "w").await.is_err());

        staying.close();
        assert!(chain.is_closed());
    }

    #[tokio::test]
    async fn test_failing_opens() {
        let chain = InMemoryChain::new();
        chain.fail_next_opens(1);

        assert!(chain.open().await.is_err());
        assert!(chain.is_closed());
        assert!(chain.open().await.is_ok());
        assert_eq!(chain.open_count(), 2);
    }
}

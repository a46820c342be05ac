use std::{
    collections::HashMap,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use massa_proto_rs::massa::model::v1::{ExecutionOutputStatus, OperationExecutionStatus};
use massa_signature::KeyPair;
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::{debug, info, warn};

use crate::{
    constants::{
        DEFAULT_CONTRACT_NAME, DEFAULT_EVENT_BUFFER, DEFAULT_FEE, MAX_GAS_CALL, PublicGRPCURL,
    },
    error::ConfigError,
    helpers::events::{extract_event_details, is_failure, raw_event_from_sc_event},
    types::ChainId,
};

use super::{
    grpc_client::PublicGrpcClient,
    transport::{ChainConnector, ChainTransport, RawEventStream},
};

#[derive(Debug, Clone)]
pub struct MassaConfig {
    pub grpc_url: String,
    pub chain_id: ChainId,
    /// Signs state-changing calls. Read-only use works without it.
    pub private_key: Option<String>,
    pub fee: String,
    pub max_gas: u64,
    pub coins: String,
    /// Contract name to address, used to resolve contracts by name.
    pub address_book: HashMap<String, String>,
    /// Capacity of the channel between the gRPC stream and the event pump.
    pub event_buffer: usize,
}

impl Default for MassaConfig {
    fn default() -> Self {
        Self {
            grpc_url: PublicGRPCURL::Buildnet.url().to_string(),
            chain_id: ChainId::BUILDNET,
            private_key: None,
            fee: DEFAULT_FEE.to_string(),
            max_gas: MAX_GAS_CALL,
            coins: "0".to_string(),
            address_book: HashMap::new(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl MassaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// `MASSA_GRPC_URL` defaults to the public node of `MASSA_CHAIN`.
    /// `BLUEPRINT_CONTRACT_ADDRESS` is registered in the address book under
    /// `BLUEPRINT_CONTRACT_NAME` (default `Blueprint`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let chain_id = match lookup("MASSA_CHAIN") {
            Some(raw) => ChainId::from_str(&raw).map_err(|_| ConfigError::Invalid {
                name: "MASSA_CHAIN",
                value: raw,
            })?,
            None => defaults.chain_id,
        };

        let grpc_url = lookup("MASSA_GRPC_URL")
            .unwrap_or_else(|| PublicGRPCURL::for_chain(chain_id).url().to_string());

        let max_gas = match lookup("MASSA_MAX_GAS") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "MASSA_MAX_GAS",
                value: raw,
            })?,
            None => defaults.max_gas,
        };

        let event_buffer = match lookup("MASSA_EVENT_BUFFER") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|size| *size > 0)
                .ok_or(ConfigError::Invalid {
                    name: "MASSA_EVENT_BUFFER",
                    value: raw,
                })?,
            None => defaults.event_buffer,
        };

        let mut address_book = HashMap::new();
        if let Some(address) = lookup("BLUEPRINT_CONTRACT_ADDRESS") {
            let name = lookup("BLUEPRINT_CONTRACT_NAME")
                .unwrap_or_else(|| DEFAULT_CONTRACT_NAME.to_string());
            address_book.insert(name, address);
        }

        Ok(Self {
            grpc_url,
            chain_id,
            private_key: lookup("PRIVATE_KEY"),
            fee: lookup("MASSA_FEE").unwrap_or(defaults.fee),
            max_gas,
            coins: lookup("MASSA_COINS").unwrap_or(defaults.coins),
            address_book,
            event_buffer,
        })
    }
}

/// Opens [`MassaTransport`]s over the public gRPC API of a Massa node.
#[derive(Debug, Clone)]
pub struct MassaConnector {
    config: MassaConfig,
}

impl MassaConnector {
    pub fn new(config: MassaConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ChainConnector for MassaConnector {
    async fn open(&self) -> Result<Arc<dyn ChainTransport>> {
        let keypair = self
            .config
            .private_key
            .as_deref()
            .map(KeyPair::from_str)
            .transpose()
            .context("Failed to create key pair from private key")?;

        let client = PublicGrpcClient::new(
            self.config.grpc_url.clone(),
            self.config.chain_id,
            keypair,
        )
        .await
        .with_context(|| format!("Failed to connect to {}", self.config.grpc_url))?;

        let transport: Arc<dyn ChainTransport> = Arc::new(MassaTransport {
            client,
            config: self.config.clone(),
            forwarders: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        Ok(transport)
    }
}

pub struct MassaTransport {
    client: PublicGrpcClient,
    config: MassaConfig,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl MassaTransport {
    fn client(&self) -> Result<PublicGrpcClient> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("Massa transport closed");
        }
        // Tonic clients are cheap handles over a shared channel.
        Ok(self.client.clone())
    }
}

#[async_trait]
impl ChainTransport for MassaTransport {
    async fn resolve_contract(&self, name: &str) -> Result<String> {
        self.config
            .address_book
            .get(name)
            .cloned()
            .with_context(|| format!("No address configured for contract `{}`", name))
    }

    async fn call(&self, contract: &str, function: &str, params: Vec<u8>) -> Result<()> {
        let mut client = self.client()?;

        let expire_period = client
            .get_absolute_expire_period()
            .await
            .context("Failed to get absolute expire period")?;

        let operation_id = client
            .call_sc(
                contract,
                function,
                params,
                &self.config.fee,
                self.config.max_gas,
                &self.config.coins,
                expire_period,
            )
            .await?;

        let status = client
            .wait_for_operation(operation_id.clone(), true)
            .await
            .with_context(|| format!("Failed to wait for operation {}", operation_id))?;

        if status != OperationExecutionStatus::Success as i32 {
            bail!(
                "Operation {} calling `{}` failed with status {}",
                operation_id,
                function,
                status
            );
        }

        debug!(operation = %operation_id, function, "Operation executed");
        Ok(())
    }

    async fn read_only_call(
        &self,
        contract: &str,
        function: &str,
        params: Vec<u8>,
    ) -> Result<Vec<u8>> {
        self.client()?
            .execute_read_only_call(contract, function, params)
            .await
    }

    async fn subscribe_events(&self, contract: &str) -> Result<RawEventStream> {
        let (requests, mut outputs) = self.client()?.subscribe_emitted_events(contract).await?;
        let (tx, rx) = mpsc::channel(self.config.event_buffer);
        let contract = contract.to_string();

        let forwarder = tokio::spawn(async move {
            // Dropping the request half ends the subscription.
            let _requests = requests;

            while let Some(response) = outputs.next().await {
                let output = match response {
                    Ok(response) => response.output,
                    Err(status) => {
                        warn!(contract = %contract, error = %status, "Event subscription failed");
                        break;
                    }
                };

                // Only final outputs, so an event is never forwarded twice.
                let Some(output) = output else { continue };
                if output.status != ExecutionOutputStatus::Final as i32 {
                    continue;
                }
                let Some(execution_output) = output.execution_output else {
                    continue;
                };

                for event in execution_output.events {
                    if is_failure(&event) {
                        continue;
                    }

                    let raw = match raw_event_from_sc_event(&event) {
                        Ok(raw) => raw,
                        Err(error) => {
                            let event_id = extract_event_details(&event)
                                .map(|details| details.event_id)
                                .unwrap_or_default();
                            warn!(event_id = %event_id, error = %format!("{error:#}"), "Ignoring contract event");
                            continue;
                        }
                    };

                    if tx.send(raw).await.is_err() {
                        debug!(contract = %contract, "Event receiver dropped");
                        return;
                    }
                }
            }

            info!(contract = %contract, "Event subscription ended");
        });

        self.forwarders.lock().push(forwarder);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for forwarder in self.forwarders.lock().drain(..) {
            forwarder.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_config_defaults_to_public_node_of_chain() {
        let buildnet = MassaConfig::from_lookup(lookup_from(&[])).unwrap();
        let mainnet = MassaConfig::from_lookup(lookup_from(&[("MASSA_CHAIN", "mainnet")])).unwrap();

        assert_eq!(buildnet.grpc_url, "grpc://buildnet.massa.net:33037");
        assert_eq!(buildnet.chain_id, ChainId::BUILDNET);
        assert_eq!(mainnet.grpc_url, "grpc://mainnet.massa.net:33037");
        assert!(mainnet.address_book.is_empty());
    }

    #[test]
    fn test_config_from_lookup() {
        let config = MassaConfig::from_lookup(lookup_from(&[
            ("MASSA_GRPC_URL", "grpc://localhost:33037"),
            ("MASSA_CHAIN", "mainnet"),
            ("MASSA_MAX_GAS", "2100000"),
            ("BLUEPRINT_CONTRACT_ADDRESS", "AS12abc"),
        ]))
        .unwrap();

        assert_eq!(config.grpc_url, "grpc://localhost:33037");
        assert_eq!(config.chain_id, ChainId::MAINNET);
        assert_eq!(config.max_gas, 2100000);
        assert_eq!(config.fee, DEFAULT_FEE);
        assert_eq!(
            config.address_book.get("Blueprint").map(String::as_str),
            Some("AS12abc")
        );
        assert!(config.private_key.is_none());
    }

    #[test]
    fn test_config_rejects_zero_event_buffer() {
        let result = MassaConfig::from_lookup(lookup_from(&[
            ("MASSA_GRPC_URL", "grpc://localhost:33037"),
            ("MASSA_EVENT_BUFFER", "0"),
        ]));

        assert!(result.is_err());
    }

    #[test]
    fn test_config_rejects_unknown_chain() {
        let result = MassaConfig::from_lookup(lookup_from(&[
            ("MASSA_GRPC_URL", "grpc://localhost:33037"),
            ("MASSA_CHAIN", "devnet"),
        ]));

        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "MASSA_CHAIN", .. })
        ));
    }

    #[tokio::test]
    #[ignore = "requires PRIVATE_KEY and a deployed Blueprint contract on the Massa buildnet"]
    async fn test_store_on_buildnet() {
        let config = MassaConfig::from_env().expect("Massa configuration");
        let contract = config
            .address_book
            .get(DEFAULT_CONTRACT_NAME)
            .cloned()
            .expect("BLUEPRINT_CONTRACT_ADDRESS not set");
        let transport = MassaConnector::new(config).open().await.unwrap();

        let params = crate::basic_elements::serializers::strings_to_args(&["k", "v"]).unwrap();
        transport.call(&contract, "store", params).await.unwrap();
    }
}

use std::str::FromStr;

use anyhow::{Context, Error, Result};
use massa_models::{
    address::Address,
    amount::Amount,
    operation::{Operation, OperationSerializer, OperationType, SecureShareOperation},
    secure_share::{SecureShareContent, SecureShareSerializer},
};
use massa_proto_rs::massa::{
    api::v1::{
        ExecuteReadOnlyCallRequest, ExecutedOpsChangesFilter, ExecutionEventFilter,
        GetStatusRequest, NewSlotExecutionOutputsFilter, NewSlotExecutionOutputsRequest,
        NewSlotExecutionOutputsResponse, SendOperationsRequest, executed_ops_changes_filter,
        execution_event_filter, new_slot_execution_outputs_filter,
        public_service_client::PublicServiceClient, send_operations_response,
    },
    model::v1::{
        ExecutionOutputStatus, FunctionCall, PublicStatus, ReadOnlyExecutionCall,
        read_only_execution_call,
    },
};
use massa_serialization::Serializer;
use massa_signature::KeyPair;
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tonic::{Request, Streaming, transport::Channel};
use tracing::{debug, info};

use crate::{
    constants::{MAX_GAS_READ_ONLY_CALL, PERIOD_TO_LIVE_DEFAULT},
    types::ChainId,
};

// Capacity of the request side of the bidirectional streams; only one request
// is ever sent on it.
const REQUEST_CHANNEL_CAPACITY: usize = 128;

/// Request half of a slot execution outputs subscription. The subscription
/// ends when this is dropped.
pub type SlotOutputsRequests = mpsc::Sender<NewSlotExecutionOutputsRequest>;

#[derive(Debug, Clone)]
pub struct PublicGrpcClient {
    pub client: PublicServiceClient<Channel>,
    pub grpc_url: String,
    pub keypair: Option<KeyPair>,
    pub chain_id: ChainId,
}

impl PublicGrpcClient {
    pub async fn new(
        grpc_url: String,
        chain_id: ChainId,
        keypair: Option<KeyPair>,
    ) -> Result<Self, tonic::transport::Error> {
        let client = PublicServiceClient::connect(grpc_url.clone()).await?;
        info!(url = %grpc_url, "Connected to Massa gRPC API");

        Ok(Self {
            client,
            grpc_url,
            keypair,
            chain_id,
        })
    }

    pub async fn get_status(&mut self) -> Result<PublicStatus> {
        let request = Request::new(GetStatusRequest {});

        let response = self.client.get_status(request).await?.into_inner();

        let status = response.status.context("Failed to get status")?;

        Ok(status)
    }

    pub async fn get_absolute_expire_period(&mut self) -> Result<u64> {
        let status = self.get_status().await.context("Failed to get status")?;

        let last_slot = status
            .last_executed_speculative_slot
            .context("Failed to get last executed speculative slot")?;

        Ok(last_slot.period + PERIOD_TO_LIVE_DEFAULT)
    }

    /// Signs and sends a `CallSC` operation, returning its operation id.
    pub async fn call_sc(
        &mut self,
        smart_contract_address: &str,
        function_name: &str,
        args: Vec<u8>,
        fee: &str,
        max_gas: u64,
        coins: &str,
        expire_period: u64,
    ) -> Result<String> {
        let keypair = self
            .keypair
            .as_ref()
            .context("No keypair provided, cannot sign the call")?;

        let operation_type = OperationType::CallSC {
            target_addr: Address::from_str(smart_contract_address)?,
            target_func: function_name.to_string(),
            param: args,
            max_gas,
            coins: Amount::from_str(coins)?,
        };

        let operation = Operation {
            fee: Amount::from_str(fee)?,
            op: operation_type,
            expire_period,
        };

        let secured: SecureShareOperation = Operation::new_verifiable(
            operation,
            OperationSerializer::new(),
            keypair,
            self.chain_id.to_u64(),
        )
        .context("Failed to create verifiable operation")?;

        let mut serialized_data = Vec::new();

        SecureShareSerializer::new()
            .serialize(&secured, &mut serialized_data)
            .context("Failed to serialize operation")?;

        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);

        let response = self
            .client
            .send_operations(Request::new(ReceiverStream::new(rx)))
            .await
            .context("Failed to send operations to the client")?;

        tx.send(SendOperationsRequest {
            operations: vec![serialized_data],
        })
        .await
        .context("Failed to send operations using the channel")?;

        let mut response_stream = response.into_inner();

        while let Some(res) = response_stream
            .message()
            .await
            .context("Failed to get message from send operations stream")?
        {
            let result = res
                .result
                .context("Failed to get result from send operations response")?;

            match result {
                send_operations_response::Result::Error(e) => {
                    return Err(Error::msg(format!("{:?}", e)));
                }
                send_operations_response::Result::OperationIds(operations) => {
                    let operation_id = operations
                        .operation_ids
                        .into_iter()
                        .next()
                        .context("Send operations response carried no operation id")?;
                    debug!(operation = %operation_id, function = function_name, "Operation sent");
                    return Ok(operation_id);
                }
            }
        }

        Err(Error::msg(
            "No valid operation ID received from the response stream",
        ))
    }

    /// Executes `function_name` without creating an operation and returns
    /// the bytes the function returned.
    pub async fn execute_read_only_call(
        &mut self,
        smart_contract_address: &str,
        function_name: &str,
        args: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let call = ReadOnlyExecutionCall {
            max_gas: MAX_GAS_READ_ONLY_CALL,
            target: Some(read_only_execution_call::Target::FunctionCall(
                FunctionCall {
                    target_address: smart_contract_address.to_string(),
                    target_function: function_name.to_string(),
                    parameter: args,
                },
            )),
            ..Default::default()
        };

        let response = self
            .client
            .execute_read_only_call(Request::new(ExecuteReadOnlyCallRequest { call: Some(call) }))
            .await
            .context("Failed to execute read-only call")?
            .into_inner();

        let output = response
            .output
            .context("Failed to get output from read-only call response")?;

        Ok(output.call_result)
    }

    /// Opens a slot execution outputs subscription with the given filters.
    pub async fn new_slot_execution_outputs(
        &mut self,
        filters: Vec<NewSlotExecutionOutputsFilter>,
    ) -> Result<(SlotOutputsRequests, Streaming<NewSlotExecutionOutputsResponse>)> {
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);

        let response = self
            .client
            .new_slot_execution_outputs(Request::new(ReceiverStream::new(rx)))
            .await
            .context("Failed to open slot execution outputs stream")?;

        tx.send(NewSlotExecutionOutputsRequest { filters })
            .await
            .context("Failed to send slot execution outputs filters")?;

        Ok((tx, response.into_inner()))
    }

    /// Subscribes to the execution outputs carrying events emitted by `emitter_address`.
    pub async fn subscribe_emitted_events(
        &mut self,
        emitter_address: &str,
    ) -> Result<(SlotOutputsRequests, Streaming<NewSlotExecutionOutputsResponse>)> {
        let filter = NewSlotExecutionOutputsFilter {
            filter: Some(new_slot_execution_outputs_filter::Filter::EventFilter(
                ExecutionEventFilter {
                    filter: Some(execution_event_filter::Filter::EmitterAddress(
                        emitter_address.to_string(),
                    )),
                },
            )),
        };

        self.new_slot_execution_outputs(vec![filter]).await
    }

    /// Waits until `operation_id` is executed and returns its execution status.
    pub async fn wait_for_operation(
        &mut self,
        operation_id: String,
        is_speculative: bool,
    ) -> Result<i32> {
        let filter = NewSlotExecutionOutputsFilter {
            filter: Some(
                new_slot_execution_outputs_filter::Filter::ExecutedOpsChangesFilter(
                    ExecutedOpsChangesFilter {
                        filter: Some(executed_ops_changes_filter::Filter::OperationId(
                            operation_id.clone(),
                        )),
                    },
                ),
            ),
        };

        // Keep the request half alive until the operation is found.
        let (_requests, mut response_stream) =
            self.new_slot_execution_outputs(vec![filter]).await?;

        let expected_status = if is_speculative {
            ExecutionOutputStatus::Candidate as i32
        } else {
            ExecutionOutputStatus::Final as i32
        };

        while let Some(response) = response_stream.next().await {
            let slot_execution_output = response
                .context("Failed to get message from slot execution outputs stream")?
                .output
                .context("Failed to get output from slot execution outputs response")?;

            if slot_execution_output.status != expected_status {
                continue;
            }

            let execution_output = slot_execution_output
                .execution_output
                .context("Failed to get execution output from slot execution output response")?;

            let states_changes = execution_output
                .state_changes
                .context("Failed to get states changes from execution output response")?;

            for executed_ops_change in states_changes.executed_ops_changes {
                if executed_ops_change.operation_id == operation_id {
                    let operation_value = executed_ops_change
                        .value
                        .context("Failed to get operation value")?;

                    return Ok(operation_value.status);
                }
            }
        }

        Err(Error::msg(format!("Operation {} not found", operation_id)))
    }
}

use crate::types::ChainId;

pub const MAX_GAS_CALL: u64 = 4294167295;
pub const PERIOD_TO_LIVE_DEFAULT: u64 = 10;

// Read-only calls are simulated by the node, so they can afford the ceiling.
pub const MAX_GAS_READ_ONLY_CALL: u64 = MAX_GAS_CALL;

pub const DEFAULT_CONTRACT_NAME: &str = "Blueprint";
pub const DEFAULT_FEE: &str = "0.01";
pub const DEFAULT_EVENT_BUFFER: usize = 128;

// Blueprint contract surface. Names and argument order must match the contract.
pub const STORE_FUNCTION: &str = "store";
pub const LOAD_FUNCTION: &str = "load";
pub const REMOVE_FUNCTION: &str = "remove";

pub const VALUE_CHANGED_EVENT: &str = "ValueChanged";
pub const VALUE_REMOVED_EVENT: &str = "ValueRemoved";

pub enum PublicGRPCURL {
    Mainnet,
    Buildnet,
}

impl PublicGRPCURL {
    pub fn for_chain(chain_id: ChainId) -> Self {
        match chain_id {
            ChainId::MAINNET => PublicGRPCURL::Mainnet,
            ChainId::BUILDNET => PublicGRPCURL::Buildnet,
        }
    }

    pub fn url(&self) -> &'static str {
        match self {
            PublicGRPCURL::Mainnet => "grpc://mainnet.massa.net:33037",
            PublicGRPCURL::Buildnet => "grpc://buildnet.massa.net:33037",
        }
    }
}

pub mod in_memory;
pub mod session;
pub mod transport;

#[cfg(feature = "massa")]
pub mod grpc_client;
#[cfg(feature = "massa")]
pub mod massa_transport;

pub use in_memory::InMemoryChain;
pub use session::ContractSession;
pub use transport::{ChainConnector, ChainTransport, RawEventStream};

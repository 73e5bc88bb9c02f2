pub mod endpoint;
pub mod error;
pub mod factory;
pub mod local;
pub mod node;
pub mod rpc;
pub mod socket;

pub use endpoint::{EndpointState, Lifecycle, Method};
pub use error::{ComError, ComResult, RemoteFault};
pub use factory::ProxyFactory;
pub use local::{LocalEndpoint, LocalProxy, Registry};
pub use node::{Node, NodeInfo, NodeRef, RefsAndEntries};
pub use rpc::{RpcEndpoint, RpcProxy};
pub use socket::{ConnectionPool, SocketEndpoint, SocketProxy};

pub mod wire;
pub mod connection;
pub mod pool;
pub mod proxy;
pub mod endpoint;

pub use connection::{Connection, CONNECT_TIMEOUT};
pub use endpoint::SocketEndpoint;
pub use pool::ConnectionPool;
pub use proxy::SocketProxy;

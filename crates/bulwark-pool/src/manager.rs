use async_trait::async_trait;
use std::fmt::Display;

/// Opens, checks and closes connections to one backing resource.
///
/// The pool calls these under its connect timeout and circuit breaker; the
/// manager only has to talk to the resource.
///
/// ```
/// use async_trait::async_trait;
/// use bulwark_pool::ConnectionManager;
///
/// struct Tcp {
///     addr: String,
/// }
///
/// #[async_trait]
/// impl ConnectionManager for Tcp {
///     type Connection = tokio::net::TcpStream;
///     type Error = std::io::Error;
///
///     async fn connect(&self) -> Result<Self::Connection, Self::Error> {
///         tokio::net::TcpStream::connect(&self.addr).await
///     }
///
///     async fn validate(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
///         conn.peer_addr().map(|_| ())
///     }
/// }
/// ```
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    /// The pooled connection handle.
    type Connection: Send + 'static;
    /// Error reported by the resource.
    type Error: Display + Send + 'static;

    /// Opens a new connection.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Performs a lightweight round trip to check a connection is usable.
    async fn validate(&self, conn: &mut Self::Connection) -> Result<(), Self::Error>;

    /// Closes a connection the pool no longer needs.
    async fn close(&self, conn: Self::Connection) {
        drop(conn);
    }
}

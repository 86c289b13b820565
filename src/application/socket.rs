// Socket connector trait for channel transports
use async_trait::async_trait;
use tokio::sync::mpsc;

/// An open text-frame connection.
///
/// The `incoming` receiver ending is the close event. Dropping the session
/// closes the connection.
#[derive(Debug)]
pub struct SocketSession {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait SocketConnector: Send + Sync {
    /// Open a connection to `url`. An error counts as an unexpected close.
    async fn connect(&self, url: &str) -> anyhow::Result<SocketSession>;
}

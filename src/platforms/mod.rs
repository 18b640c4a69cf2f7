use anyhow::Result;
use async_trait::async_trait;

pub mod twitch;

/// Capabilities the session needs from a chat connection
#[async_trait]
pub trait ChatConnection: Send + Sync {
    /// Connect and join the configured channel, returning once established
    async fn connect(&mut self) -> Result<()>;

    /// Send `message` to `channel` and wait until the server acknowledges it
    async fn say(&self, channel: &str, message: &str) -> Result<()>;

    /// Close the connection. Calling this on a closed connection is a no-op.
    async fn disconnect(&mut self) -> Result<()>;

    /// Get the platform identifier (e.g., "twitch")
    fn platform_name(&self) -> &str;

    async fn is_connected(&self) -> bool;
}

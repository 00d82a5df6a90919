use crate::error::Result;
use crate::metrics::StatisticsSnapshot;
use async_trait::async_trait;

pub mod console;
pub mod json;
pub mod csv;
pub mod sqlite;

/// Destination for flushed statistics windows.
#[async_trait]
pub trait OutputHandler: Send + Sync {
    async fn write(&mut self, snapshot: &StatisticsSnapshot) -> Result<()>;
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

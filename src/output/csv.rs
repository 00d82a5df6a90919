use super::OutputHandler;
use crate::error::Result;
use crate::metrics::StatisticsSnapshot;
use async_trait::async_trait;
use std::path::PathBuf;

pub struct CsvOutput {
    writer: csv::Writer<std::fs::File>,
}

impl CsvOutput {
    pub fn new(path: PathBuf) -> Result<Self> {
        let writer = csv::Writer::from_path(path)?;
        Ok(Self { writer })
    }
}

#[async_trait]
impl OutputHandler for CsvOutput {
    async fn write(&mut self, snapshot: &StatisticsSnapshot) -> Result<()> {
        self.writer.serialize(snapshot)?;
        self.writer.flush()?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

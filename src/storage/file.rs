use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{OrderFilter, PositionFilter, Records, Storage};
use crate::error::Error;
use crate::models::{Order, Position};
use crate::Result;

/// JSON snapshot storage
///
/// The whole record set is rewritten after every change and read back on open,
/// so a paper session can resume its order history.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    records: Mutex<Records>,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let raw = std::fs::read(&path)?;
            serde_json::from_slice(&raw)?
        } else {
            Records::default()
        };

        tracing::info!(
            "Opened storage at {} ({} orders)",
            path.display(),
            records.orders.len()
        );
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(&self, records: &Records) -> Result<()> {
        let raw = serde_json::to_vec_pretty(records)?;
        std::fs::write(&self.path, raw)
            .map_err(|e| Error::Storage(format!("{}: {}", self.path.display(), e)))
    }
}

impl Storage for FileStorage {
    fn create_order(&self, order: &mut Order) -> Result<()> {
        let mut records = self.records();
        records.create_order(order);
        self.flush(&records)
    }

    fn update_order(&self, order: &Order) -> Result<()> {
        let mut records = self.records();
        records.update_order(order)?;
        self.flush(&records)
    }

    fn orders(&self, filters: &[OrderFilter]) -> Result<Vec<Order>> {
        Ok(self.records().orders(filters))
    }

    fn create_position(&self, position: &Position) -> Result<()> {
        let mut records = self.records();
        records.create_position(position);
        self.flush(&records)
    }

    fn positions(&self, filters: &[PositionFilter]) -> Result<Vec<Position>> {
        Ok(self.records().positions(filters))
    }
}

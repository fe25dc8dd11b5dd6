use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{OrderFilter, PositionFilter, Records, Storage};
use crate::models::{Order, Position};
use crate::Result;

/// Process-local storage, used for backtests
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<Records>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    fn create_order(&self, order: &mut Order) -> Result<()> {
        self.records().create_order(order);
        Ok(())
    }

    fn update_order(&self, order: &Order) -> Result<()> {
        self.records().update_order(order)
    }

    fn orders(&self, filters: &[OrderFilter]) -> Result<Vec<Order>> {
        Ok(self.records().orders(filters))
    }

    fn create_position(&self, position: &Position) -> Result<()> {
        self.records().create_position(position);
        Ok(())
    }

    fn positions(&self, filters: &[PositionFilter]) -> Result<Vec<Position>> {
        Ok(self.records().positions(filters))
    }
}

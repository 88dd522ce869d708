use dn_core::StorageFault;
use dn_wire::{ExtentMode, Opcode};
use serde::{Deserialize, Serialize};

/// Committed size of one extent, as reported to repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentWatermark {
    pub extent_id: u64,
    pub size: u64,
}

/// Extent storage behind a replica.
///
/// Faults are reported as `StorageFault` tags; the reply code is derived
/// from the tag, never from message text.
pub trait ExtentStore: Send + Sync {
    fn create_extent(&self, partition_id: u64, extent_id: u64) -> Result<(), StorageFault>;

    fn write(
        &self,
        partition_id: u64,
        extent_id: u64,
        offset: i64,
        data: &[u8],
    ) -> Result<(), StorageFault>;

    fn read(
        &self,
        partition_id: u64,
        extent_id: u64,
        offset: i64,
        size: u32,
    ) -> Result<Vec<u8>, StorageFault>;

    fn mark_delete(&self, partition_id: u64, extent_id: u64) -> Result<(), StorageFault>;

    fn watermarks(
        &self,
        partition_id: u64,
        mode: ExtentMode,
    ) -> Result<Vec<ExtentWatermark>, StorageFault>;

    fn notify_repair(&self, partition_id: u64) -> Result<(), StorageFault>;

    /// Administrative command from the master. Returns the reply body.
    fn master_command(&self, opcode: Opcode, partition_id: u64) -> Result<Vec<u8>, StorageFault>;
}

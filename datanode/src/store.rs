//! In-memory extent store.
//!
//! Partitions map extent ids to byte vectors. Tiny extents occupy the id
//! range `1..=TINY_EXTENT_COUNT`; every other id is a normal extent.

use dn_core::StorageFault;
use dn_repl::{ExtentStore, ExtentWatermark};
use dn_wire::{ExtentMode, Opcode};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

pub const TINY_EXTENT_COUNT: u64 = 64;

#[derive(Default)]
struct Extent {
    data: Vec<u8>,
    deleted: bool,
}

#[derive(Default)]
struct Partition {
    extents: HashMap<u64, Extent>,
    offline: bool,
    repair_requests: u64,
}

#[derive(Default)]
struct Inner {
    partitions: HashMap<u64, Partition>,
    used_bytes: u64,
}

#[derive(Debug, Serialize)]
struct HeartbeatReport {
    partitions: usize,
    used_bytes: u64,
    capacity_bytes: u64,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    capacity_bytes: u64,
}

fn is_tiny(extent_id: u64) -> bool {
    (1..=TINY_EXTENT_COUNT).contains(&extent_id)
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageFault> {
    serde_json::to_vec(value).map_err(|e| StorageFault::Other(e.to_string()))
}

impl Partition {
    fn live_extent(&self, extent_id: u64) -> Result<&Extent, StorageFault> {
        if self.offline {
            return Err(StorageFault::TryAgain);
        }
        match self.extents.get(&extent_id) {
            None => Err(StorageFault::ExtentNotFound),
            Some(e) if e.deleted => Err(StorageFault::ExtentDeleted),
            Some(e) => Ok(e),
        }
    }

    fn watermarks(&self, mode: Option<ExtentMode>) -> Vec<ExtentWatermark> {
        let mut marks: Vec<ExtentWatermark> = self
            .extents
            .iter()
            .filter(|(_, e)| !e.deleted)
            .filter(|(id, _)| match mode {
                Some(ExtentMode::Tiny) => is_tiny(**id),
                Some(ExtentMode::Normal) => !is_tiny(**id),
                None => true,
            })
            .map(|(id, e)| ExtentWatermark {
                extent_id: *id,
                size: e.data.len() as u64,
            })
            .collect();
        marks.sort_by_key(|m| m.extent_id);
        marks
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity_bytes,
        }
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.read_inner().used_bytes
    }

    #[must_use]
    pub fn repair_requests(&self, partition_id: u64) -> u64 {
        self.read_inner()
            .partitions
            .get(&partition_id)
            .map_or(0, |p| p.repair_requests)
    }
}

impl ExtentStore for MemoryStore {
    fn create_extent(&self, partition_id: u64, extent_id: u64) -> Result<(), StorageFault> {
        let mut inner = self.write_inner();
        let partition = inner.partitions.entry(partition_id).or_default();
        if partition.offline {
            return Err(StorageFault::TryAgain);
        }
        match partition.extents.get(&extent_id) {
            Some(e) if e.deleted => Err(StorageFault::ExtentDeleted),
            Some(_) => Ok(()),
            None => {
                partition.extents.insert(extent_id, Extent::default());
                debug!(target: "datanode::store", partition_id, extent_id, "Extent created");
                Ok(())
            },
        }
    }

    fn write(
        &self,
        partition_id: u64,
        extent_id: u64,
        offset: i64,
        data: &[u8],
    ) -> Result<(), StorageFault> {
        let offset = usize::try_from(offset).map_err(|_| StorageFault::ParamMismatch)?;
        let mut inner = self.write_inner();
        let used = inner.used_bytes;

        let partition = inner
            .partitions
            .get_mut(&partition_id)
            .ok_or(StorageFault::ExtentNotFound)?;
        let current = partition.live_extent(extent_id)?.data.len();
        if offset > current {
            return Err(StorageFault::ParamMismatch);
        }

        let end = offset + data.len();
        let growth = end.saturating_sub(current) as u64;
        if used + growth > self.capacity_bytes {
            return Err(StorageFault::NoSpace);
        }

        let extent = partition
            .extents
            .get_mut(&extent_id)
            .ok_or(StorageFault::ExtentNotFound)?;
        if end > extent.data.len() {
            extent.data.resize(end, 0);
        }
        extent.data[offset..end].copy_from_slice(data);
        inner.used_bytes += growth;
        Ok(())
    }

    fn read(
        &self,
        partition_id: u64,
        extent_id: u64,
        offset: i64,
        size: u32,
    ) -> Result<Vec<u8>, StorageFault> {
        let offset = usize::try_from(offset).map_err(|_| StorageFault::ParamMismatch)?;
        let inner = self.read_inner();
        let extent = inner
            .partitions
            .get(&partition_id)
            .ok_or(StorageFault::ExtentNotFound)?
            .live_extent(extent_id)?;

        let end = offset + size as usize;
        if end > extent.data.len() {
            return Err(StorageFault::ParamMismatch);
        }
        Ok(extent.data[offset..end].to_vec())
    }

    fn mark_delete(&self, partition_id: u64, extent_id: u64) -> Result<(), StorageFault> {
        let mut inner = self.write_inner();
        let partition = inner
            .partitions
            .get_mut(&partition_id)
            .ok_or(StorageFault::ExtentNotFound)?;
        partition.live_extent(extent_id)?;

        let extent = partition
            .extents
            .get_mut(&extent_id)
            .ok_or(StorageFault::ExtentNotFound)?;
        let freed = extent.data.len() as u64;
        extent.deleted = true;
        extent.data = Vec::new();
        inner.used_bytes -= freed;
        debug!(target: "datanode::store", partition_id, extent_id, freed, "Extent marked deleted");
        Ok(())
    }

    fn watermarks(
        &self,
        partition_id: u64,
        mode: ExtentMode,
    ) -> Result<Vec<ExtentWatermark>, StorageFault> {
        let inner = self.read_inner();
        let partition = inner
            .partitions
            .get(&partition_id)
            .ok_or(StorageFault::ExtentNotFound)?;
        Ok(partition.watermarks(Some(mode)))
    }

    fn notify_repair(&self, partition_id: u64) -> Result<(), StorageFault> {
        let mut inner = self.write_inner();
        let partition = inner
            .partitions
            .get_mut(&partition_id)
            .ok_or(StorageFault::ExtentNotFound)?;
        partition.repair_requests += 1;
        Ok(())
    }

    fn master_command(&self, opcode: Opcode, partition_id: u64) -> Result<Vec<u8>, StorageFault> {
        let mut inner = self.write_inner();
        match opcode {
            Opcode::CreateDataPartition => {
                inner.partitions.entry(partition_id).or_default().offline = false;
                Ok(Vec::new())
            },
            Opcode::DeleteDataPartition => {
                if let Some(removed) = inner.partitions.remove(&partition_id) {
                    let freed: u64 = removed.extents.values().map(|e| e.data.len() as u64).sum();
                    inner.used_bytes -= freed;
                }
                Ok(Vec::new())
            },
            Opcode::OfflineDataPartition => {
                inner
                    .partitions
                    .get_mut(&partition_id)
                    .ok_or(StorageFault::ExtentNotFound)?
                    .offline = true;
                Ok(Vec::new())
            },
            Opcode::LoadDataPartition => {
                let partition = inner
                    .partitions
                    .get(&partition_id)
                    .ok_or(StorageFault::ExtentNotFound)?;
                to_json(&partition.watermarks(None))
            },
            Opcode::DataNodeHeartbeat => to_json(&HeartbeatReport {
                partitions: inner.partitions.len(),
                used_bytes: inner.used_bytes,
                capacity_bytes: self.capacity_bytes,
            }),
            _ => Err(StorageFault::ParamMismatch),
        }
    }
}

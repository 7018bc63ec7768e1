use serde::{Deserialize, Serialize};

use crate::error::SortError;

/// Tile shape of the onesweep sorter: every work item ranks `data_per_work_item` keys and a
/// group has `work_group_size` work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelParam {
    pub data_per_work_item: u32,
    pub work_group_size: u32,
}

impl Default for KernelParam {
    fn default() -> Self {
        Self {
            data_per_work_item: 256,
            work_group_size: 64,
        }
    }
}

impl KernelParam {
    pub fn validate(&self) -> Result<(), SortError> {
        let dpwi = self.data_per_work_item;
        let ok = dpwi % 32 == 0
            && (32..=512).contains(&dpwi)
            && matches!(self.work_group_size, 32 | 64);
        if !ok {
            return Err(SortError::UnsupportedKernelParam {
                data_per_work_item: dpwi,
                work_group_size: self.work_group_size,
            });
        }
        return Ok(());
    }

    /// number of keys one group handles
    pub fn tile_size(&self) -> usize {
        (self.data_per_work_item * self.work_group_size) as usize
    }
}

/// Size crossovers between the three sorters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchThresholds {
    pub one_work_group_max: usize,
    pub cooperative_max: usize,
}

impl Default for DispatchThresholds {
    fn default() -> Self {
        Self {
            one_work_group_max: 16384,
            cooperative_max: 262144,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncPolicy {
    /// keep polling after the retry limit was hit (the stall is logged and counted)
    #[default]
    Wait,
    /// give up and fail the sort with [SortError::SyncTimeout]. The other groups leave at
    /// their next poll, whatever they scattered stays in device memory and the caller's keys
    /// and values are returned untouched.
    Abort,
}

/// Retry bounds of the inter-group barrier. One retry is one poll of the counter by the
/// first work item of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub init_retry_limit: u32,
    pub barrier_retry_limit: u32,
    pub policy: SyncPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            init_retry_limit: 10240,
            barrier_retry_limit: 5120,
            policy: SyncPolicy::Wait,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortConfig {
    pub param: KernelParam,
    pub thresholds: DispatchThresholds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

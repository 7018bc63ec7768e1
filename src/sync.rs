/*
    Inter-group barrier for co-resident work-groups, host side.

    There is no blocking barrier across work-groups, so every sync point is an atomic counter
    in internal memory behind a ready flag:
        internal[0]         ready flag
        internal[1 + id]    arrival counter of sync point `id`
    Internal memory starts zeroed. Group 0 adds one to every counter and then raises the flag,
    the other groups only poll the flag. To pass sync point `id` a group increments its counter and polls until all
    participants arrived (counter >= 1 + participants). Counters only grow, so a group that
    reaches init after others already passed their first sync point still gets through.

    Polls are bounded by the retry limits of [SyncConfig]. Running over a limit is counted in
    the status words of the launch, after that the policy decides whether to keep waiting or to
    abort the whole launch. The status words are read back after every sort.
*/

use crate::{
    config::{SyncConfig, SyncPolicy},
    device::Device,
    error::SortError,
    kernels::{Params, SortBuffers, STATUS_WORDS},
};

/// sync id reported when the lazy initialization times out
pub const INIT_SYNC_POINT: u32 = u32::MAX;

/// internal words of a barrier with `sync_points` sync points
pub(crate) fn barrier_words(sync_points: u32) -> usize {
    1 + sync_points as usize
}

pub(crate) fn apply_sync_config(params: &mut Params, config: &SyncConfig) {
    params.init_retry_limit = config.init_retry_limit;
    params.barrier_retry_limit = config.barrier_retry_limit;
    params.abort_on_timeout = match config.policy {
        SyncPolicy::Wait => 0,
        SyncPolicy::Abort => 1,
    };
}

/// Status words a launch leaves behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LaunchStatus {
    pub barrier_stalls: u32,
    pub lookback_waits: u32,
    /// number of groups that gave up on a sync point
    pub aborted: u32,
    /// sync point and group of the first group that gave up
    pub sync_id: u32,
    pub group: u32,
    /// sync points entered, only written by the barrier check kernel
    pub passed: u32,
    pub delay: u32,
    /// sync points left before every group had arrived
    pub order_errors: u32,
}

impl LaunchStatus {
    pub(crate) fn from_words(words: &[u32]) -> Self {
        let word = |i: usize| words.get(i).copied().unwrap_or(0);
        Self {
            barrier_stalls: word(0),
            lookback_waits: word(1),
            aborted: word(2),
            sync_id: word(3),
            group: word(4),
            passed: word(5),
            delay: word(6),
            order_errors: word(7),
        }
    }

    pub(crate) fn check(&self) -> Result<(), SortError> {
        if self.aborted > 0 {
            return Err(SortError::SyncTimeout {
                sync_id: self.sync_id,
                group: self.group,
            });
        }
        return Ok(());
    }
}

/// Reads the status words of the last launch and adds them to the device counters.
pub(crate) async fn read_status(
    device: &Device,
    buffers: &SortBuffers,
) -> anyhow::Result<LaunchStatus> {
    let words = device
        .download::<u32>(&buffers.status, STATUS_WORDS)
        .await?;
    let status = LaunchStatus::from_words(&words);
    device.record_status(&status);
    if status.barrier_stalls > 0 {
        log::warn!(
            "inter-group barrier ran over its retry limit {} times",
            status.barrier_stalls
        );
    }
    if status.aborted > 0 {
        log::warn!(
            "group {} gave up at sync point {}, launch aborted",
            status.group,
            status.sync_id
        );
    }
    return Ok(status);
}

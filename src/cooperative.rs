/*
    Cooperative multi-group radix sort.

    All groups of the launch are resident at the same time and meet at three inter-group
    sync points per stage:
        0: every group posted its bucket totals
        1: the last group turned the totals into per group offsets
        2: every group scattered its keys, the next stage may load
    The whole sort is one dispatch. Stages ping-pong between the two device buffers, the
    caller's slices are only written once the launch finished without aborting.
*/

use crate::{
    config::SyncConfig,
    device::Device,
    error::SortError,
    kernels::{Kernel, Kernels, Params, Plan, SortBuffers},
    sync::{apply_sync_config, barrier_words},
};

pub(crate) const WORK_GROUP_SIZE: usize = 64;
const SMALL_PROCESS_SIZE: usize = 128;
const LARGE_PROCESS_SIZE: usize = 256;
const SYNC_POINTS_PER_STAGE: u32 = 3;

/// largest input that fits on `compute_units` co-resident groups
pub(crate) fn capacity(compute_units: u32) -> usize {
    LARGE_PROCESS_SIZE * WORK_GROUP_SIZE * compute_units as usize
}

/// keys per work item, the smaller size as long as the groups still fit on the device
fn process_size(n: usize, compute_units: usize) -> usize {
    if n <= SMALL_PROCESS_SIZE * WORK_GROUP_SIZE * compute_units {
        SMALL_PROCESS_SIZE
    } else {
        LARGE_PROCESS_SIZE
    }
}

pub(crate) fn plan(
    device: &Device,
    n: usize,
    stages: u32,
    radix_bits: u32,
) -> Result<Plan, SortError> {
    plan_for(
        device.compute_units(),
        &device.sync_config(),
        n,
        stages,
        radix_bits,
    )
}

fn plan_for(
    compute_units: u32,
    sync: &SyncConfig,
    n: usize,
    stages: u32,
    radix_bits: u32,
) -> Result<Plan, SortError> {
    let process_size = process_size(n, compute_units as usize);
    let tile = process_size * WORK_GROUP_SIZE;
    let groups = n.div_ceil(tile) as u32;
    if groups > compute_units {
        return Err(SortError::TooManyGroups {
            groups,
            compute_units,
        });
    }
    let len = groups as usize * tile;
    let bins = 1usize << radix_bits;
    log::debug!(
        "cooperative sort of {n} keys: {groups} groups x {WORK_GROUP_SIZE} work items x {process_size} keys, {stages} stages"
    );

    let mut params = Params {
        n: len as u32,
        stages,
        groups,
        tile_size: tile as u32,
        ..Default::default()
    };
    apply_sync_config(&mut params, sync);
    return Ok(Plan {
        len,
        stages,
        work_group_size: WORK_GROUP_SIZE as u32,
        // barrier, then totals and offsets of every group
        internal_words: barrier_words(stages * SYNC_POINTS_PER_STAGE)
            + 2 * groups as usize * bins,
        params: vec![params],
    });
}

pub(crate) fn record(
    kernels: &Kernels,
    buffers: &SortBuffers,
    plan: &Plan,
    encoder: &mut wgpu::CommandEncoder,
) -> u64 {
    kernels.record(Kernel::Cooperative, buffers, 0, plan.params[0].groups, encoder);
    return 1;
}

/*
    Single work-group radix sort.

    The whole input is sorted by one group in a single dispatch. Every stage counts the digits
    of all keys, scans them into bin bases and then walks the keys in sub tiles of one key per
    work item: ranks the sub tile, reorders it in local memory and writes it out behind the
    previous sub tiles of the same bins. Stages ping-pong between the two device buffers.
*/

use crate::kernels::{Kernel, Kernels, Params, Plan, SortBuffers};

pub(crate) const WORK_GROUP_SIZE: u32 = 64;
/// largest input the sorter handles
pub(crate) const CAPACITY: usize = WORK_GROUP_SIZE as usize * 256;

pub(crate) fn plan(n: usize, stages: u32) -> Plan {
    debug_assert!(n <= CAPACITY);
    let len = n.next_multiple_of(WORK_GROUP_SIZE as usize);
    log::debug!(
        "one work-group sort of {n} keys: {} sub tiles of {WORK_GROUP_SIZE} keys, {stages} stages",
        len / WORK_GROUP_SIZE as usize
    );
    return Plan {
        len,
        stages,
        work_group_size: WORK_GROUP_SIZE,
        internal_words: 0,
        params: vec![Params {
            n: len as u32,
            stages,
            groups: 1,
            tile_size: len as u32,
            ..Default::default()
        }],
    };
}

pub(crate) fn record(
    kernels: &Kernels,
    buffers: &SortBuffers,
    _plan: &Plan,
    encoder: &mut wgpu::CommandEncoder,
) -> u64 {
    kernels.record(Kernel::OneWorkGroup, buffers, 0, 1, encoder);
    return 1;
}

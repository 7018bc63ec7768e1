/*
    Multi-strategy parallel radix sort.

    Three LSD radix sorters cover the whole range of input sizes:
      - one work-group: the whole input lives in the local memory of a single group
      - cooperative:    co-resident groups meet at atomic-counter barriers every stage
      - onesweep:       one global histogram pass, then one look-back sweep per stage
    The sorters are wgpu compute kernels (shaders/radix_sort.wgsl) running on a [Device] and
    are picked by [RadixSorter] from the input size.
*/

mod config;
pub use config::{DispatchThresholds, KernelParam, SortConfig, SortOrder, SyncConfig, SyncPolicy};
mod device;
pub use device::{Device, DeviceDescriptor, Diagnostics, Limits};
mod error;
pub use error::SortError;
mod event;
pub use event::SortEvent;
mod key;
pub use key::{stage_count, RadixBits, RadixKey};
mod sorter;
pub use sorter::{RadixSorter, Strategy};
mod sync;
pub use sync::INIT_SYNC_POINT;

mod cooperative;
mod kernels;
mod lookback;
mod one_wg;
mod onesweep;

pub mod testing;

/// Sorts `keys` in place.
///
/// ```no_run
/// # use simd_radix_sort::{Device, DeviceDescriptor};
/// let device = pollster::block_on(Device::new(&DeviceDescriptor::default()))?;
/// let mut keys = [5.5f32, -1.0, 3.0];
/// simd_radix_sort::sort::<_, true, 8>(&device, &mut keys)?;
/// assert_eq!(keys, [-1.0, 3.0, 5.5]);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn sort<K, const ASCENDING: bool, const RADIX_BITS: u32>(
    device: &Device,
    keys: &mut [K],
) -> anyhow::Result<()>
where
    K: RadixKey,
{
    RadixSorter::<RADIX_BITS>::new(device).sort(keys, order::<ASCENDING>())
}

/// Sorts `keys` in place and moves `values` along with them.
pub fn sort_by_key<K, V, const ASCENDING: bool, const RADIX_BITS: u32>(
    device: &Device,
    keys: &mut [K],
    values: &mut [V],
) -> anyhow::Result<()>
where
    K: RadixKey,
    V: bytemuck::Pod + Send + Sync,
{
    RadixSorter::<RADIX_BITS>::new(device).sort_by_key(keys, values, order::<ASCENDING>())
}

fn order<const ASCENDING: bool>() -> SortOrder {
    if ASCENDING {
        SortOrder::Ascending
    } else {
        SortOrder::Descending
    }
}

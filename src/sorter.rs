/*
    Entry point of the library: picks one of the three sorters from the input size and runs
    it on the device. The choice is made once per call, before anything is allocated.

    Keys are mapped to their ordered bit pattern on the host and uploaded as u32 words, the
    tail up to the tile size is filled with the sort identity so that the kernels never see a
    partial tile. The device sorts the words together with the index of every key, the
    caller's keys and values are then permuted on the host with the downloaded indices. A sort
    that fails on the device therefore never touches the caller's slices.
*/

use bytemuck::Pod;
use futures_intrusive::channel::shared::oneshot_channel;
use rayon::prelude::*;

use crate::{
    config::{DispatchThresholds, SortConfig, SortOrder},
    cooperative,
    device::Device,
    error::SortError,
    event::SortEvent,
    kernels::{KernelKey, Kernels, Plan, SortBuffers},
    key::{stage_count, RadixBits, RadixKey},
    one_wg, onesweep, sync,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// fewer than two keys, nothing to do
    Trivial,
    OneWorkGroup,
    Cooperative,
    Onesweep,
}

type Recorder = fn(&Kernels, &SortBuffers, &Plan, &mut wgpu::CommandEncoder) -> u64;

struct RadixBitsCheck<const RADIX_BITS: u32>;

impl<const RADIX_BITS: u32> RadixBitsCheck<RADIX_BITS> {
    const SUPPORTED: () = assert!(
        RADIX_BITS == 7 || RADIX_BITS == 8,
        "only 7 or 8 radix bits are supported"
    );
}

fn select_strategy(
    n: usize,
    thresholds: &DispatchThresholds,
    cooperative_capacity: usize,
) -> Strategy {
    if n < 2 {
        Strategy::Trivial
    } else if n <= thresholds.one_work_group_max.min(one_wg::CAPACITY) {
        Strategy::OneWorkGroup
    } else if n <= thresholds.cooperative_max.min(cooperative_capacity) {
        Strategy::Cooperative
    } else {
        Strategy::Onesweep
    }
}

/// u32 words a key occupies on the device
fn key_words<K: RadixKey>() -> usize {
    if K::Bits::BITS > 32 {
        2
    } else {
        1
    }
}

/// Ordered bit patterns of `keys`, padded with the sort identity to `len` keys.
pub(crate) fn encode_keys<K: RadixKey, const ASCENDING: bool>(
    keys: &[K],
    len: usize,
    key_words: usize,
) -> Vec<u32> {
    let identity = K::sort_identity::<ASCENDING>()
        .to_ordered::<ASCENDING>()
        .words();
    let mut words = vec![0u32; len * key_words];
    words
        .par_chunks_mut(key_words)
        .enumerate()
        .for_each(|(i, w)| {
            let bits = match keys.get(i) {
                Some(k) => k.to_ordered::<ASCENDING>().words(),
                None => identity,
            };
            w.copy_from_slice(&bits[..key_words]);
        });
    return words;
}

fn apply_permutation<T: Pod + Send + Sync>(items: &mut [T], order: &[u32]) {
    let sorted: Vec<T> = order.par_iter().map(|&i| items[i as usize]).collect();
    items.copy_from_slice(&sorted);
}

/// Radix sorter bound to a device. `RADIX_BITS` is the digit width of one stage.
#[derive(Debug, Clone)]
pub struct RadixSorter<const RADIX_BITS: u32 = 8> {
    device: Device,
    config: SortConfig,
}

impl<const RADIX_BITS: u32> RadixSorter<RADIX_BITS> {
    pub fn new(device: &Device) -> Self {
        let () = RadixBitsCheck::<RADIX_BITS>::SUPPORTED;
        Self {
            device: device.clone(),
            config: SortConfig::default(),
        }
    }

    pub fn with_config(device: &Device, config: SortConfig) -> anyhow::Result<Self> {
        let () = RadixBitsCheck::<RADIX_BITS>::SUPPORTED;
        config.param.validate()?;
        Ok(Self {
            device: device.clone(),
            config,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    pub fn strategy_for(&self, n: usize) -> Strategy {
        select_strategy(
            n,
            &self.config.thresholds,
            cooperative::capacity(self.device.compute_units()),
        )
    }

    pub fn sort<K: RadixKey>(&self, keys: &mut [K], order: SortOrder) -> anyhow::Result<()> {
        let mut unit = vec![(); keys.len()];
        self.sort_by_key(keys, &mut unit, order)
    }

    /// Sorts `keys` and applies the same permutation to `values`. Equal keys keep the
    /// relative order of their values.
    pub fn sort_by_key<K, V>(
        &self,
        keys: &mut [K],
        values: &mut [V],
        order: SortOrder,
    ) -> anyhow::Result<()>
    where
        K: RadixKey,
        V: Pod + Send + Sync,
    {
        let strategy = self.strategy_for(keys.len());
        self.sort_with(strategy, keys, values, order)
    }

    /// Sorts `input` into `output`, `input` stays untouched.
    pub fn sort_into<K: RadixKey>(
        &self,
        input: &[K],
        output: &mut [K],
        order: SortOrder,
    ) -> anyhow::Result<()> {
        if input.len() != output.len() {
            anyhow::bail!(
                "output holds {} keys but the input has {}",
                output.len(),
                input.len()
            );
        }
        output.copy_from_slice(input);
        self.sort(output, order)
    }

    pub fn sort_by_key_into<K, V>(
        &self,
        keys_in: &[K],
        values_in: &[V],
        keys_out: &mut [K],
        values_out: &mut [V],
        order: SortOrder,
    ) -> anyhow::Result<()>
    where
        K: RadixKey,
        V: Pod + Send + Sync,
    {
        if keys_in.len() != keys_out.len() || values_in.len() != values_out.len() {
            anyhow::bail!("output ranges must match the input ranges in length");
        }
        keys_out.copy_from_slice(keys_in);
        values_out.copy_from_slice(values_in);
        self.sort_by_key(keys_out, values_out, order)
    }

    /// Submits the sort from a host thread and returns immediately. The keys come back
    /// through the event.
    pub fn sort_async<K>(&self, mut keys: Vec<K>, order: SortOrder) -> SortEvent<Vec<K>>
    where
        K: RadixKey + 'static,
    {
        let (tx, rx) = oneshot_channel();
        let sorter = self.clone();
        let submitted = std::thread::Builder::new()
            .name("radix sort submit".to_string())
            .spawn(move || {
                let result = sorter.sort(&mut keys, order).map(|_| keys);
                if tx.send(result).is_err() {
                    log::debug!("sort event dropped before the sort completed");
                }
            });
        // a failed spawn drops the sender, the event then resolves to an error
        if let Err(err) = submitted {
            log::warn!("could not start sort submission thread: {err}");
        }
        return SortEvent::new(rx);
    }

    /// Runs the given sorter regardless of the input size.
    pub(crate) fn sort_with<K, V>(
        &self,
        strategy: Strategy,
        keys: &mut [K],
        values: &mut [V],
        order: SortOrder,
    ) -> anyhow::Result<()>
    where
        K: RadixKey,
        V: Pod + Send + Sync,
    {
        if keys.len() != values.len() {
            return Err(SortError::LengthMismatch {
                keys: keys.len(),
                values: values.len(),
            }
            .into());
        }
        match order {
            SortOrder::Ascending => self.run::<K, V, true>(strategy, keys, values),
            SortOrder::Descending => self.run::<K, V, false>(strategy, keys, values),
        }
    }

    fn run<K, V, const ASCENDING: bool>(
        &self,
        strategy: Strategy,
        keys: &mut [K],
        values: &mut [V],
    ) -> anyhow::Result<()>
    where
        K: RadixKey,
        V: Pod + Send + Sync,
    {
        let n = keys.len();
        log::debug!(
            "sorting {n} keys ({}, {}) with {strategy:?}",
            std::any::type_name::<K>(),
            if ASCENDING { "ascending" } else { "descending" }
        );
        let stages = stage_count(K::Bits::BITS, RADIX_BITS);
        let (plan, record): (Plan, Recorder) = match strategy {
            Strategy::Trivial => return Ok(()),
            Strategy::OneWorkGroup => (one_wg::plan(n, stages), one_wg::record),
            Strategy::Cooperative => (
                cooperative::plan(&self.device, n, stages, RADIX_BITS)?,
                cooperative::record,
            ),
            Strategy::Onesweep => (
                onesweep::plan(&self.device, &self.config.param, n, stages, RADIX_BITS)?,
                onesweep::record,
            ),
        };
        if plan.len > u32::MAX as usize {
            return Err(SortError::TooManyElements {
                len: n,
                max: u32::MAX as usize,
            }
            .into());
        }

        let key_words = key_words::<K>();
        let words = encode_keys::<K, ASCENDING>(keys, plan.len, key_words);
        let kernels = self.device.kernels(KernelKey {
            radix_bits: RADIX_BITS,
            key_words: key_words as u32,
            work_group_size: plan.work_group_size,
        });

        let order = {
            let _queue = self.device.queue();
            pollster::block_on(self.execute(&kernels, &plan, record, &words, n))?
        };
        apply_permutation(keys, &order);
        apply_permutation(values, &order);
        return Ok(());
    }

    /// Uploads, sorts and returns the source index of every output position.
    async fn execute(
        &self,
        kernels: &Kernels,
        plan: &Plan,
        record: Recorder,
        words: &[u32],
        n: usize,
    ) -> anyhow::Result<Vec<u32>> {
        let device = &self.device;
        let buffers = SortBuffers::new(device, kernels, plan, words).await?;
        let mut encoder =
            device
                .wgpu_device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("radix sort encoder"),
                });
        let launches = record(kernels, &buffers, plan, &mut encoder);
        device.submit(encoder, launches);

        let status = sync::read_status(device, &buffers).await?;
        let result = match status.check() {
            Ok(()) => {
                device
                    .download::<u32>(buffers.result_values(plan.stages), n)
                    .await
            }
            Err(err) => Err(err.into()),
        };
        buffers.destroy();
        return result;
    }
}

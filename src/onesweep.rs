/*
    Onesweep radix sort.

    One pass counts the digits of every stage at once, a second pass scans the counts into
    global bin offsets. Each stage is then a single sweep over the tiles: a tile ranks its keys,
    resolves its per bin offsets through the look-back chain (see lookback.rs) and scatters.
    Tiles claim their id from a per stage ticket, so a tile only ever waits on tiles that are
    already running.
*/

use crate::{
    config::KernelParam,
    device::Device,
    error::SortError,
    kernels::{Kernel, Kernels, Params, Plan, SortBuffers, HIST_ROWS},
    lookback::COUNT_MASK,
};

/// keys counted by one group of the histogram pass
fn hist_chunk(work_group_size: u32) -> usize {
    (work_group_size * HIST_ROWS) as usize
}

pub(crate) fn plan(
    device: &Device,
    param: &KernelParam,
    n: usize,
    stages: u32,
    radix_bits: u32,
) -> Result<Plan, SortError> {
    param.validate()?;
    let tile = param.tile_size();
    let tiles = n.div_ceil(tile);
    let len = tiles * tile;
    let chunk = hist_chunk(param.work_group_size);
    let max_groups = device.max_workgroups() as usize;
    if len > COUNT_MASK as usize || tiles > max_groups || len.div_ceil(chunk) > max_groups {
        let max = (COUNT_MASK as usize).min(max_groups * tile.min(chunk)) / tile * tile;
        return Err(SortError::TooManyElements { len: n, max });
    }
    let bins = 1usize << radix_bits;
    log::debug!(
        "onesweep sort of {n} keys: {tiles} tiles x {} work items x {} keys, {stages} stages",
        param.work_group_size,
        param.data_per_work_item
    );

    let params = (0..stages)
        .map(|stage| Params {
            n: len as u32,
            stages,
            stage,
            groups: tiles as u32,
            tile_size: tile as u32,
            ..Default::default()
        })
        .collect();
    return Ok(Plan {
        len,
        stages,
        work_group_size: param.work_group_size,
        // histograms, offsets, tickets, look-back cells of every stage
        internal_words: 2 * stages as usize * bins
            + stages as usize
            + stages as usize * tiles * bins,
        params,
    });
}

/// histogram of every stage, then the scan into global bin offsets
pub(crate) fn record_global_offsets(
    kernels: &Kernels,
    buffers: &SortBuffers,
    plan: &Plan,
    encoder: &mut wgpu::CommandEncoder,
) -> u64 {
    let groups = plan.len.div_ceil(hist_chunk(plan.work_group_size)) as u32;
    kernels.record(Kernel::GlobalHistogram, buffers, 0, groups, encoder);
    kernels.record(Kernel::ScanHistogram, buffers, 0, plan.stages, encoder);
    return 2;
}

pub(crate) fn record(
    kernels: &Kernels,
    buffers: &SortBuffers,
    plan: &Plan,
    encoder: &mut wgpu::CommandEncoder,
) -> u64 {
    let mut launches = record_global_offsets(kernels, buffers, plan, encoder);
    for (stage, params) in plan.params.iter().enumerate() {
        kernels.record(Kernel::OnesweepSweep, buffers, stage, params.groups, encoder);
        launches += 1;
    }
    return launches;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SortOrder,
        device::DeviceDescriptor,
        kernels::KernelKey,
        key::RadixKey,
        lookback::Cell,
        sorter::{encode_keys, RadixSorter, Strategy},
        testing::test_device,
    };
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn device() -> Option<Device> {
        test_device(&DeviceDescriptor {
            compute_units: Some(4),
            ..Default::default()
        })
    }

    /// digit counts of every stage, computed on the host
    fn reference_histogram(keys: &[u16], len: usize, stages: u32) -> Vec<u32> {
        let mut hist = vec![0u32; stages as usize * 256];
        let ordered = keys
            .iter()
            .map(|k| k.to_ordered::<true>())
            .chain(std::iter::repeat(u16::MAX).take(len - keys.len()));
        for k in ordered {
            for stage in 0..stages {
                hist[stage as usize * 256 + k.digit::<true, 8>(stage) as usize] += 1;
            }
        }
        hist
    }

    fn exclusive_scan(counts: &[u32]) -> Vec<u32> {
        let mut sum = 0;
        counts
            .iter()
            .map(|c| {
                let start = sum;
                sum += c;
                start
            })
            .collect()
    }

    /// records `record_fn` for `keys` and returns the internal memory afterwards
    fn internal_after(
        device: &Device,
        keys: &[u16],
        param: &KernelParam,
        record_fn: fn(&Kernels, &SortBuffers, &Plan, &mut wgpu::CommandEncoder) -> u64,
    ) -> (Plan, Vec<u32>) {
        let plan = plan(device, param, keys.len(), 2, 8).unwrap();
        let kernels = device.kernels(KernelKey {
            radix_bits: 8,
            key_words: 1,
            work_group_size: param.work_group_size,
        });
        let words = encode_keys::<u16, true>(keys, plan.len, 1);
        let internal = pollster::block_on(async {
            let buffers = SortBuffers::new(device, &kernels, &plan, &words)
                .await
                .unwrap();
            let mut encoder =
                device
                    .wgpu_device()
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("onesweep test"),
                    });
            let launches = record_fn(&kernels, &buffers, &plan, &mut encoder);
            device.submit(encoder, launches);
            device
                .download::<u32>(&buffers.internal, plan.internal_words)
                .await
                .unwrap()
        });
        (plan, internal)
    }

    #[test]
    fn global_offsets_per_stage() {
        let Some(device) = device() else {
            return;
        };
        let mut rng = StdRng::seed_from_u64(20);
        let keys: Vec<u16> = (0..40_000).map(|_| rng.gen_range(0..5000)).collect();
        let (plan, internal) = internal_after(
            &device,
            &keys,
            &KernelParam::default(),
            record_global_offsets,
        );
        let hist = reference_histogram(&keys, plan.len, 2);
        assert_eq!(internal[..512], hist[..]);
        for stage in 0..2 {
            let counts = &hist[stage * 256..(stage + 1) * 256];
            let offsets = &internal[512 + stage * 256..512 + (stage + 1) * 256];
            assert_eq!(offsets, exclusive_scan(counts), "stage {stage}");
        }
    }

    #[test]
    fn look_back_leaves_inclusive_counts() {
        let Some(device) = device() else {
            return;
        };
        let param = KernelParam {
            data_per_work_item: 32,
            work_group_size: 32,
        };
        let mut rng = StdRng::seed_from_u64(23);
        let keys: Vec<u16> = (0..10_000).map(|_| rng.gen()).collect();
        let (plan, internal) = internal_after(&device, &keys, &param, record);
        let tiles = plan.params[0].groups as usize;
        let hist = reference_histogram(&keys, plan.len, 2);
        let cells = &internal[2 * 512 + 2..];
        for stage in 0..2 {
            // every tile ticketed once
            assert_eq!(internal[2 * 512 + stage], tiles as u32);
            let last = &cells[(stage * tiles + tiles - 1) * 256..(stage * tiles + tiles) * 256];
            for (b, word) in last.iter().enumerate() {
                assert_eq!(
                    Cell::decode(*word),
                    Cell::Inclusive(hist[stage * 256 + b]),
                    "stage {stage} bin {b}"
                );
            }
        }
    }

    #[test]
    fn sorts_with_small_tiles() {
        let Some(device) = device() else {
            return;
        };
        let config = crate::config::SortConfig {
            param: KernelParam {
                data_per_work_item: 32,
                work_group_size: 32,
            },
            ..Default::default()
        };
        let sorter = RadixSorter::<8>::with_config(&device, config).unwrap();
        let mut rng = StdRng::seed_from_u64(21);
        for n in [2, 1023, 1024, 1025, 70_001] {
            let mut keys: Vec<i32> = (0..n).map(|_| rng.gen()).collect();
            let mut expected = keys.clone();
            expected.sort_unstable();
            let mut unit = vec![(); n];
            sorter
                .sort_with(Strategy::Onesweep, &mut keys, &mut unit, SortOrder::Ascending)
                .unwrap();
            assert_eq!(keys, expected, "n = {n}");
        }
    }

    #[test]
    fn odd_stage_count_reads_the_second_buffer() {
        let Some(device) = device() else {
            return;
        };
        let sorter = RadixSorter::<8>::new(&device);
        let mut rng = StdRng::seed_from_u64(22);
        let n = 50_000;
        // 8 bit keys take a single stage
        let mut keys: Vec<u8> = (0..n).map(|_| rng.gen()).collect();
        let mut values: Vec<u32> = (0..n as u32).collect();
        let mut expected: Vec<(u8, u32)> = keys.iter().copied().zip(values.clone()).collect();
        expected.sort_by(|a, b| b.0.cmp(&a.0));

        sorter
            .sort_with(Strategy::Onesweep, &mut keys, &mut values, SortOrder::Descending)
            .unwrap();
        let got: Vec<(u8, u32)> = keys.into_iter().zip(values).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn rejects_bad_tile_shape() {
        let Some(device) = device() else {
            return;
        };
        let param = KernelParam {
            data_per_work_item: 100,
            work_group_size: 64,
        };
        let err = plan(&device, &param, 2, 4, 8).unwrap_err();
        assert!(matches!(err, SortError::UnsupportedKernelParam { .. }));
    }

    #[test]
    fn one_params_slot_per_stage() {
        let Some(device) = device() else {
            return;
        };
        let plan = plan(&device, &KernelParam::default(), 100_000, 4, 8).unwrap();
        assert_eq!(plan.len, 7 * 16384);
        assert_eq!(plan.params.len(), 4);
        assert!(plan
            .params
            .iter()
            .enumerate()
            .all(|(s, p)| p.stage == s as u32 && p.groups == 7));
        assert_eq!(plan.internal_words, 2 * 4 * 256 + 4 + 4 * 7 * 256);
    }
}

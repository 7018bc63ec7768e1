use std::{fs::File, path::PathBuf, time::Instant};

use clap::{Parser, ValueEnum};
use half::f16;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use simd_radix_sort::{
    testing::{generate_data, is_sorted, reference_sort, RandomKey, DEFAULT_SEED, SIZES},
    Device, DeviceDescriptor, RadixSorter, SortOrder, Strategy,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KeyType {
    U8,
    U16,
    U32,
    U64,
    I32,
    I64,
    F16,
    F32,
    F64,
}

#[derive(Debug, Parser)]
#[command(author, version)]
#[command(about = "Sorts generated data with every strategy and reports timings", long_about = None)]
struct Opt {
    /// key type to sort
    #[arg(long, value_enum, default_value = "u32")]
    key: KeyType,

    /// sort in descending order
    #[arg(long)]
    descending: bool,

    /// digit width of one stage (7 or 8)
    #[arg(long, default_value_t = 8)]
    radix_bits: u32,

    /// input sizes, defaults to the full size list
    #[arg(long, value_delimiter = ',')]
    sizes: Vec<usize>,

    /// timed runs per size
    #[arg(long, default_value_t = 5)]
    iterations: u32,

    /// number of work-groups that may be resident at the same time
    #[arg(long)]
    compute_units: Option<u32>,

    /// write the results as json
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Measurement {
    size: usize,
    strategy: String,
    mean_ms: f64,
    min_ms: f64,
    mkeys_per_s: f64,
}

fn measure<K: RandomKey, const RADIX_BITS: u32>(
    device: &Device,
    opt: &Opt,
    sizes: &[usize],
) -> anyhow::Result<Vec<Measurement>> {
    let sorter = RadixSorter::<RADIX_BITS>::new(device);
    let order = if opt.descending {
        SortOrder::Descending
    } else {
        SortOrder::Ascending
    };

    let pb = ProgressBar::new(sizes.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")?.progress_chars("=> "),
    );

    let mut results = Vec::with_capacity(sizes.len());
    for &size in sizes {
        let strategy = sorter.strategy_for(size);
        pb.set_message(format!("{size} keys ({strategy:?})"));
        let data: Vec<K> = generate_data(size, DEFAULT_SEED);
        let expected = reference_sort(&data, order);

        let mut times = Vec::with_capacity(opt.iterations as usize);
        for _ in 0..opt.iterations.max(1) {
            let mut keys = data.clone();
            let start = Instant::now();
            sorter.sort(&mut keys, order)?;
            times.push(start.elapsed().as_secs_f64() * 1000.);
            let matches = keys
                .iter()
                .zip(&expected)
                .all(|(a, b)| a.to_ordered::<true>() == b.to_ordered::<true>());
            if !matches || !is_sorted(&keys, order) {
                anyhow::bail!("{size} keys were not sorted correctly by {strategy:?}");
            }
        }

        let mean_ms = times.iter().sum::<f64>() / times.len() as f64;
        let min_ms = times.iter().cloned().fold(f64::INFINITY, f64::min);
        results.push(Measurement {
            size,
            strategy: format!("{strategy:?}"),
            mean_ms,
            min_ms,
            mkeys_per_s: if strategy == Strategy::Trivial {
                0.
            } else {
                size as f64 / min_ms / 1000.
            },
        });
        pb.inc(1);
    }
    pb.finish_and_clear();
    return Ok(results);
}

fn run<const RADIX_BITS: u32>(
    device: &Device,
    opt: &Opt,
    sizes: &[usize],
) -> anyhow::Result<Vec<Measurement>> {
    match opt.key {
        KeyType::U8 => measure::<u8, RADIX_BITS>(device, opt, sizes),
        KeyType::U16 => measure::<u16, RADIX_BITS>(device, opt, sizes),
        KeyType::U32 => measure::<u32, RADIX_BITS>(device, opt, sizes),
        KeyType::U64 => measure::<u64, RADIX_BITS>(device, opt, sizes),
        KeyType::I32 => measure::<i32, RADIX_BITS>(device, opt, sizes),
        KeyType::I64 => measure::<i64, RADIX_BITS>(device, opt, sizes),
        KeyType::F16 => measure::<f16, RADIX_BITS>(device, opt, sizes),
        KeyType::F32 => measure::<f32, RADIX_BITS>(device, opt, sizes),
        KeyType::F64 => measure::<f64, RADIX_BITS>(device, opt, sizes),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::parse();

    let device = pollster::block_on(Device::new(&DeviceDescriptor {
        label: Some("bench"),
        compute_units: opt.compute_units,
        ..Default::default()
    }))?;
    let sizes = if opt.sizes.is_empty() {
        SIZES.to_vec()
    } else {
        opt.sizes.clone()
    };
    log::info!(
        "sorting {:?} keys on {} with {} resident work-groups",
        opt.key,
        device.adapter_info().name,
        device.compute_units()
    );

    let results = match opt.radix_bits {
        7 => run::<7>(&device, &opt, &sizes)?,
        8 => run::<8>(&device, &opt, &sizes)?,
        bits => anyhow::bail!("unsupported radix bits {bits}, use 7 or 8"),
    };

    println!(
        "{:>10} {:>14} {:>10} {:>10} {:>10}",
        "size", "strategy", "mean ms", "min ms", "Mkeys/s"
    );
    for m in results.iter() {
        println!(
            "{:>10} {:>14} {:>10.3} {:>10.3} {:>10.1}",
            m.size, m.strategy, m.mean_ms, m.min_ms, m.mkeys_per_s
        );
    }
    log::info!("device diagnostics: {:?}", device.diagnostics());

    if let Some(path) = opt.output {
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(file, &results)?;
        log::info!("wrote results to {}", path.display());
    }
    return Ok(());
}

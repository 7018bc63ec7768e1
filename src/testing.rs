//! Input generators and device setup shared by the tests and the bench binary.

use half::{bf16, f16};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    config::SortOrder,
    device::{Device, DeviceDescriptor},
    key::RadixKey,
};

pub const DEFAULT_SEED: u64 = 42;

/// Sizes that cover every sorter and the edges between them.
pub const SIZES: &[usize] = &[
    1,
    6,
    16,
    43,
    256,
    316,
    2048,
    5072,
    8192,
    14001,
    1 << 14,
    (1 << 14) + 1,
    50000,
    67543,
    100000,
    1 << 17,
    179581,
    250000,
    1 << 18,
    (1 << 18) + 1,
    500000,
    888235,
    1000000,
    1 << 20,
    10000000,
];

pub trait RandomKey: RadixKey {
    fn random(rng: &mut StdRng) -> Self;
}

macro_rules! impl_random_int {
    ($($t:ty),*) => {$(
        impl RandomKey for $t {
            fn random(rng: &mut StdRng) -> Self {
                rng.gen()
            }
        }
    )*};
}

impl_random_int!(u8, u16, u32, u64, i8, i16, i32, i64);

// +-2^x with x uniform between the smallest normal exponent and 1e12 (or the largest finite
// value of narrow types)
fn random_float(rng: &mut StdRng, min_positive: f64, max: f64) -> f64 {
    let x = rng.gen_range(min_positive.log2()..max.min(1e12).log2());
    let sign = if rng.gen::<bool>() { 1.0 } else { -1.0 };
    sign * x.exp2()
}

impl RandomKey for f32 {
    fn random(rng: &mut StdRng) -> Self {
        random_float(rng, f32::MIN_POSITIVE as f64, f32::MAX as f64) as f32
    }
}

impl RandomKey for f64 {
    fn random(rng: &mut StdRng) -> Self {
        random_float(rng, f64::MIN_POSITIVE, f64::MAX)
    }
}

impl RandomKey for f16 {
    fn random(rng: &mut StdRng) -> Self {
        f16::from_f64(random_float(
            rng,
            f16::MIN_POSITIVE.to_f64(),
            f16::MAX.to_f64(),
        ))
    }
}

impl RandomKey for bf16 {
    fn random(rng: &mut StdRng) -> Self {
        bf16::from_f64(random_float(
            rng,
            bf16::MIN_POSITIVE.to_f64(),
            bf16::MAX.to_f64(),
        ))
    }
}

/// Opens a device for a test. Machines without a compute adapter get `None` and the test
/// returns early.
pub fn test_device(desc: &DeviceDescriptor) -> Option<Device> {
    let _ = env_logger::builder().is_test(true).try_init();
    match pollster::block_on(Device::new(desc)) {
        Ok(device) => Some(device),
        Err(err) => {
            log::warn!("no compute adapter, skipping: {err:#}");
            None
        }
    }
}

/// The first 75% of the keys are random, the rest repeats the start of the buffer.
pub fn generate_data<K: RandomKey>(len: usize, seed: u64) -> Vec<K> {
    let mut rng = StdRng::seed_from_u64(seed);
    let unique = (len * 3 / 4).max(len.min(1));
    let mut data: Vec<K> = (0..unique).map(|_| K::random(&mut rng)).collect();
    data.reserve(len - unique);
    for i in 0..len - unique {
        data.push(data[i]);
    }
    return data;
}

pub fn is_sorted<K: RadixKey>(keys: &[K], order: SortOrder) -> bool {
    keys.windows(2).all(|w| match order {
        SortOrder::Ascending => w[0].to_ordered::<true>() <= w[1].to_ordered::<true>(),
        SortOrder::Descending => w[0].to_ordered::<false>() <= w[1].to_ordered::<false>(),
    })
}

/// Reference result: a stable comparison sort on the ordered keys.
pub fn reference_sort<K: RadixKey>(keys: &[K], order: SortOrder) -> Vec<K> {
    let mut expected = keys.to_vec();
    match order {
        SortOrder::Ascending => expected.sort_by_key(|k| k.to_ordered::<true>()),
        SortOrder::Descending => expected.sort_by_key(|k| k.to_ordered::<false>()),
    }
    return expected;
}

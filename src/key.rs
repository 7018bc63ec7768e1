/*
    Order preserving key transform.

    Every key type is mapped onto an unsigned integer of the same width such that the natural
    unsigned order of the mapped value equals the requested order of the original keys.
    The sorters only ever look at the mapped bits to find buckets, the keys themselves are
    moved around untouched, so there is no inverse transform.
*/

use std::fmt::Debug;

use bytemuck::Pod;
use half::{bf16, f16};
use num_traits::{PrimInt, Unsigned};

/// Unsigned representation a key is ordered by.
pub trait RadixBits: PrimInt + Unsigned + Pod + Send + Sync + Debug {
    const BITS: u32;

    /// `mask` wide digit starting at bit `shift`
    fn extract(self, shift: u32, mask: u32) -> u32;

    /// low and high 32 bit word, the high word is zero for keys of up to 32 bits
    fn words(self) -> [u32; 2];
}

macro_rules! impl_radix_bits {
    ($($t:ty),*) => {$(
        impl RadixBits for $t {
            const BITS: u32 = <$t>::BITS;

            #[inline(always)]
            fn extract(self, shift: u32, mask: u32) -> u32 {
                (self >> shift) as u32 & mask
            }

            #[inline(always)]
            fn words(self) -> [u32; 2] {
                let wide = self as u64;
                [wide as u32, (wide >> 32) as u32]
            }
        }
    )*};
}

impl_radix_bits!(u8, u16, u32, u64);

/// A key that can be radix sorted.
///
/// `to_ordered` must be monotone: for the requested direction, `a` goes before `b` exactly
/// when `a.to_ordered() < b.to_ordered()`. `sort_identity` is the padding value used for lanes
/// past the end of the input. Its ordered form is always all ones, so padding sorts behind
/// every real key.
pub trait RadixKey: Pod + Send + Sync + PartialOrd + Debug {
    type Bits: RadixBits;

    fn to_ordered<const ASCENDING: bool>(self) -> Self::Bits;

    fn sort_identity<const ASCENDING: bool>() -> Self;

    /// digit of the ordered key for the given stage
    #[inline(always)]
    fn digit<const ASCENDING: bool, const RADIX_BITS: u32>(self, stage: u32) -> u32 {
        self.to_ordered::<ASCENDING>()
            .extract(stage * RADIX_BITS, (1 << RADIX_BITS) - 1)
    }
}

/// number of LSD passes needed for a key of `key_bits` bits
pub const fn stage_count(key_bits: u32, radix_bits: u32) -> u32 {
    (key_bits + radix_bits - 1) / radix_bits
}

macro_rules! impl_unsigned_key {
    ($($t:ty),*) => {$(
        impl RadixKey for $t {
            type Bits = $t;

            #[inline(always)]
            fn to_ordered<const ASCENDING: bool>(self) -> $t {
                if ASCENDING { self } else { !self }
            }

            fn sort_identity<const ASCENDING: bool>() -> Self {
                if ASCENDING { <$t>::MAX } else { <$t>::MIN }
            }
        }
    )*};
}

macro_rules! impl_signed_key {
    ($($t:ty => $u:ty),*) => {$(
        impl RadixKey for $t {
            type Bits = $u;

            #[inline(always)]
            fn to_ordered<const ASCENDING: bool>(self) -> $u {
                let mask: $u = if ASCENDING { 1 << (<$u>::BITS - 1) } else { <$u>::MAX >> 1 };
                (self as $u) ^ mask
            }

            fn sort_identity<const ASCENDING: bool>() -> Self {
                if ASCENDING { <$t>::MAX } else { <$t>::MIN }
            }
        }
    )*};
}

// positive floats get the sign bit flipped, negative floats are inverted so that larger
// magnitudes order first; descending uses the complementary masks
macro_rules! impl_float_key {
    ($($t:ty => $u:ty),*) => {$(
        impl RadixKey for $t {
            type Bits = $u;

            #[inline(always)]
            fn to_ordered<const ASCENDING: bool>(self) -> $u {
                let sign: $u = 1 << (<$u>::BITS - 1);
                let bits = self.to_bits();
                let mask = match (bits & sign == 0, ASCENDING) {
                    (true, true) => sign,
                    (true, false) => !sign,
                    (false, true) => <$u>::MAX,
                    (false, false) => 0,
                };
                bits ^ mask
            }

            fn sort_identity<const ASCENDING: bool>() -> Self {
                let sign: $u = 1 << (<$u>::BITS - 1);
                <$t>::from_bits(if ASCENDING { !sign } else { <$u>::MAX })
            }
        }
    )*};
}

impl_unsigned_key!(u8, u16, u32, u64);
impl_signed_key!(i8 => u8, i16 => u16, i32 => u32, i64 => u64);
impl_float_key!(f32 => u32, f64 => u64, f16 => u16, bf16 => u16);

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Bounded;

    fn assert_monotone<K: RadixKey>(sorted: &[K]) {
        for w in sorted.windows(2) {
            assert!(w[0].to_ordered::<true>() <= w[1].to_ordered::<true>(), "{:?}", w);
            assert!(w[0].to_ordered::<false>() >= w[1].to_ordered::<false>(), "{:?}", w);
        }
    }

    fn assert_identity_is_max<K: RadixKey>() {
        let max = K::Bits::max_value();
        assert_eq!(K::sort_identity::<true>().to_ordered::<true>(), max);
        assert_eq!(K::sort_identity::<false>().to_ordered::<false>(), max);
    }

    #[test]
    fn unsigned_identity_and_inverse() {
        assert_eq!(7u32.to_ordered::<true>(), 7);
        assert_eq!(7u32.to_ordered::<false>(), !7);
        assert_monotone(&[0u8, 1, 127, 128, 255]);
        assert_monotone(&[0u64, 1, u64::MAX / 2, u64::MAX]);
    }

    #[test]
    fn signed_crosses_zero() {
        assert_monotone(&[i8::MIN, -1, 0, 1, i8::MAX]);
        assert_monotone(&[i32::MIN, -70000, -1, 0, 3, i32::MAX]);
        assert_monotone(&[i64::MIN, -1, 0, i64::MAX]);
        assert_eq!((-1i16).to_ordered::<true>(), 0x7fff);
    }

    #[test]
    fn floats_cross_zero() {
        assert_monotone(&[
            f32::NEG_INFINITY,
            -1e30,
            -2.5,
            -f32::MIN_POSITIVE,
            -0.0,
            0.0,
            f32::MIN_POSITIVE,
            1.0,
            3e12,
            f32::INFINITY,
        ]);
        assert_monotone(&[f64::MIN, -1.0, -0.0, 0.0, 1e-300, f64::MAX]);
        assert_monotone(&[f16::MIN, f16::from_f32(-0.5), f16::ZERO, f16::ONE, f16::MAX]);
        assert_monotone(&[bf16::MIN, bf16::NEG_ONE, bf16::ZERO, bf16::MAX]);
    }

    #[test]
    fn identity_orders_last() {
        assert_identity_is_max::<u8>();
        assert_identity_is_max::<u16>();
        assert_identity_is_max::<u32>();
        assert_identity_is_max::<u64>();
        assert_identity_is_max::<i8>();
        assert_identity_is_max::<i32>();
        assert_identity_is_max::<i64>();
        assert_identity_is_max::<f32>();
        assert_identity_is_max::<f64>();
        assert_identity_is_max::<f16>();
        assert_identity_is_max::<bf16>();
        assert_eq!(f32::sort_identity::<true>().to_bits(), 0x7fff_ffff);
        assert_eq!(f32::sort_identity::<false>().to_bits(), 0xffff_ffff);
    }

    #[test]
    fn digits_and_stages() {
        assert_eq!(stage_count(32, 8), 4);
        assert_eq!(stage_count(32, 7), 5);
        assert_eq!(stage_count(8, 7), 2);
        assert_eq!(stage_count(64, 8), 8);
        let k = 0x1234_5678u32;
        assert_eq!(k.digit::<true, 8>(0), 0x78);
        assert_eq!(k.digit::<true, 8>(3), 0x12);
        assert_eq!(k.digit::<true, 7>(1), (0x1234_5678 >> 7) & 0x7f);
        assert_eq!(k.digit::<false, 8>(0), 0x87);
    }

    #[test]
    fn words_split_wide_keys() {
        assert_eq!(0xabu8.words(), [0xab, 0]);
        assert_eq!(0x1234_5678u32.words(), [0x1234_5678, 0]);
        assert_eq!(0x0102_0304_0506_0708u64.words(), [0x0506_0708, 0x0102_0304]);
        // a 7 bit digit straddling the two words
        let k = 0x0000_0003_8000_0000u64;
        assert_eq!(k.extract(28, 0x7f), 0x38);
        let [lo, hi] = k.words();
        assert_eq!(((lo >> 28) | (hi << 4)) & 0x7f, 0x38);
    }
}

use serde::{Deserialize, Serialize};

pub const S16_LOW: f64 = -32768.0;
pub const S16_HIGH: f64 = 32767.0;

/// Target range for normalized peak output. Bounds keep whatever order
/// the caller supplies; the interpolation honors inverted ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct NormalizeRange {
    pub low: f64,
    pub high: f64,
}

impl From<[f64; 2]> for NormalizeRange {
    fn from(bounds: [f64; 2]) -> Self {
        Self {
            low: bounds[0],
            high: bounds[1],
        }
    }
}

impl From<NormalizeRange> for [f64; 2] {
    fn from(range: NormalizeRange) -> Self {
        [range.low, range.high]
    }
}

/// Linear interpolation from `[from_low, from_high]` to `[to_low, to_high]`.
/// No clamping; peak values are within the source domain by construction.
pub fn normalize(value: f64, from_low: f64, from_high: f64, to_low: f64, to_high: f64) -> f64 {
    to_low + (value - from_low) / (from_high - from_low) * (to_high - to_low)
}

/// Maps one 16-bit sample into `range`, rounded to six decimal digits so
/// serialized output is reproducible across platforms.
pub fn normalize_sample(value: i16, range: NormalizeRange) -> f64 {
    round6(normalize(f64::from(value), S16_LOW, S16_HIGH, range.low, range.high))
}

pub fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_map_to_target_bounds() {
        let range = NormalizeRange::from([0.0, 1.0]);
        assert_eq!(normalize_sample(i16::MIN, range), 0.0);
        assert!((normalize_sample(i16::MAX, range) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_maps_to_midpoint() {
        // The source domain is asymmetric (-32768..32767), so zero lands a
        // hair above the exact midpoint.
        let range = NormalizeRange::from([0.0, 1.0]);
        let mid = normalize_sample(0, range);
        assert!(mid > 0.499 && mid < 0.501, "got {mid}");
    }

    #[test]
    fn signed_range_keeps_sign() {
        let range = NormalizeRange::from([-1.0, 1.0]);
        assert_eq!(normalize_sample(i16::MIN, range), -1.0);
        assert!(normalize_sample(i16::MAX, range) > 0.99);
    }

    #[test]
    fn inverted_range_interpolates_backwards() {
        let range = NormalizeRange::from([1.0, 0.0]);
        assert_eq!(normalize_sample(i16::MIN, range), 1.0);
        assert!(normalize_sample(i16::MAX, range) < 0.01);
    }

    #[test]
    fn rounding_is_six_digits() {
        assert_eq!(round6(0.123_456_789), 0.123_457);
    }
}

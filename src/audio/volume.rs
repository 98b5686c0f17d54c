//! Integer percentage gain for 16-bit PCM.

/// Gain at which samples pass through untouched.
pub const UNITY_PERCENT: u16 = 100;

#[inline]
fn scale(sample: i16, percent: u16) -> i16 {
    let scaled = i32::from(sample) * i32::from(percent) / 100;
    scaled.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// Scale samples in place by `percent / 100`, saturating at the i16 range.
pub fn scale_samples(samples: &mut [i16], percent: u16) {
    if percent == UNITY_PERCENT {
        return;
    }
    for s in samples.iter_mut() {
        *s = scale(*s, percent);
    }
}

/// Same as [`scale_samples`] for little-endian sample bytes.
///
/// A trailing odd byte is left alone.
pub fn scale_le_bytes(bytes: &mut [u8], percent: u16) {
    if percent == UNITY_PERCENT {
        return;
    }
    for pair in bytes.chunks_exact_mut(2) {
        let s = scale(i16::from_le_bytes([pair[0], pair[1]]), percent);
        pair.copy_from_slice(&s.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_gain_is_identity() {
        let mut samples = vec![i16::MIN, -1234, 0, 1, 32767];
        let original = samples.clone();
        scale_samples(&mut samples, 100);
        assert_eq!(samples, original);
    }

    #[test]
    fn half_gain_halves_magnitude() {
        let mut samples = vec![20000, -20000, 3, -3, i16::MIN];
        scale_samples(&mut samples, 50);
        assert_eq!(samples, vec![10000, -10000, 1, -1, -16384]);
    }

    #[test]
    fn double_gain_saturates() {
        let mut samples = vec![20000, -20000, 100];
        scale_samples(&mut samples, 200);
        assert_eq!(samples, vec![32767, -32768, 200]);
    }

    #[test]
    fn zero_gain_mutes() {
        let mut samples = vec![20000, -20000];
        scale_samples(&mut samples, 0);
        assert_eq!(samples, vec![0, 0]);
    }

    #[test]
    fn byte_variant_matches_sample_variant() {
        let samples: Vec<i16> = vec![20000, -7, 12345, -32768];
        let mut bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        bytes.push(0x7f);
        scale_le_bytes(&mut bytes, 150);

        let mut expected = samples.clone();
        scale_samples(&mut expected, 150);
        let mut expected_bytes: Vec<u8> = expected.iter().flat_map(|s| s.to_le_bytes()).collect();
        expected_bytes.push(0x7f);
        assert_eq!(bytes, expected_bytes);
    }
}

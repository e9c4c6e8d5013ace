//! Strategic sampling of a large serialized payload into a compact prompt
//! input for the analysis agent (spec §4.4). Samples are raw substring
//! slices — they need not be syntactically valid JSON.

use serde::Serialize;

const FULL_THRESHOLD: usize = 5120;
const FIRST_LEN: usize = 1024;
const MID_LEN: usize = 512;
const LAST_LEN: usize = 500;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SampleStrategy {
    Full,
    Strategic,
}

#[derive(Debug, Clone, Serialize)]
pub struct Samples {
    pub first: String,
    pub middle: Vec<String>,
    pub last: String,
    pub strategy: SampleStrategy,
}

/// Byte-safe substring: clamps to char boundaries so we never panic on
/// multi-byte UTF-8 sequences straddling a slice edge.
fn slice(s: &str, start: usize, end: usize) -> &str {
    let start = start.min(s.len());
    let end = end.min(s.len()).max(start);
    let mut lo = start;
    while lo < s.len() && !s.is_char_boundary(lo) {
        lo += 1;
    }
    let mut hi = end;
    while hi < s.len() && !s.is_char_boundary(hi) {
        hi += 1;
    }
    &s[lo..hi]
}

pub fn sample(payload: &str) -> Samples {
    let len = payload.len();
    if len <= FULL_THRESHOLD {
        return Samples {
            first: payload.to_string(),
            middle: Vec::new(),
            last: String::new(),
            strategy: SampleStrategy::Full,
        };
    }

    let first = slice(payload, 0, FIRST_LEN).to_string();
    let middle = vec![
        slice(payload, len / 4, len / 4 + MID_LEN).to_string(),
        slice(payload, len / 2, len / 2 + MID_LEN).to_string(),
        slice(payload, 3 * len / 4, 3 * len / 4 + MID_LEN).to_string(),
    ];
    let last = slice(payload, len.saturating_sub(LAST_LEN), len).to_string();

    Samples {
        first,
        middle,
        last,
        strategy: SampleStrategy::Strategic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_at_threshold_is_full() {
        let payload = "a".repeat(FULL_THRESHOLD);
        let s = sample(&payload);
        assert_eq!(s.strategy, SampleStrategy::Full);
        assert_eq!(s.first.len(), FULL_THRESHOLD);
        assert!(s.middle.is_empty());
        assert_eq!(s.last, "");
    }

    #[test]
    fn one_byte_over_threshold_is_strategic() {
        let payload = "a".repeat(FULL_THRESHOLD + 1);
        let s = sample(&payload);
        assert_eq!(s.strategy, SampleStrategy::Strategic);
        assert_eq!(s.first.len(), FIRST_LEN);
        assert_eq!(s.middle.len(), 3);
        assert_eq!(s.last.len(), LAST_LEN);
    }

    #[test]
    fn strategic_slices_land_at_expected_offsets() {
        let payload: String = (0..20000).map(|i| char::from((b'0' + (i % 10) as u8) as u8)).collect();
        let s = sample(&payload);
        assert_eq!(s.first, &payload[0..FIRST_LEN]);
        assert_eq!(s.last, &payload[payload.len() - LAST_LEN..]);
    }

    #[test]
    fn handles_multibyte_boundaries_without_panicking() {
        let payload = "é".repeat(4000); // 2 bytes each, len = 8000 bytes
        let _ = sample(&payload);
    }
}

//! JPEG quantization-table inspection.
//!
//! Re-encoding a JPEG at a quality it already has (or exceeds) shrinks it by a few bytes every
//! time while losing detail on each pass. Comparing the stored luminance table against the
//! standard table scaled to the target quality tells us whether a re-encode can only degrade.

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const DQT: u8 = 0xDB;

/// Annex K.1 luminance table. Only the sum is used, so element order does not matter.
#[rustfmt::skip]
const STD_LUMA_QTABLE: [u8; 64] = [
    16, 11, 10, 16,  24,  40,  51,  61,
    12, 12, 14, 19,  26,  58,  60,  55,
    14, 13, 16, 24,  40,  57,  69,  56,
    14, 17, 22, 29,  51,  87,  80,  62,
    18, 22, 37, 56,  68, 109, 103,  77,
    24, 35, 55, 64,  81, 104, 113,  92,
    49, 64, 78, 87, 103, 121, 120, 101,
    72, 92, 95, 98, 112, 100, 103,  99,
];

/// Sum of the luminance table an IJG-style encoder writes at `quality`.
pub(super) fn reference_luma_sum(quality: u8) -> u32 {
    let quality = u32::from(quality.clamp(1, 100));
    let scale = if quality < 50 {
        5000 / quality
    } else {
        200 - quality * 2
    };
    STD_LUMA_QTABLE
        .iter()
        .map(|&v| ((u32::from(v) * scale + 50) / 100).clamp(1, 255))
        .sum()
}

/// Sum of table 0 (luminance) from the first DQT segment that defines it.
///
/// `None` when the bytes are not a baseline-readable JPEG or carry no table 0.
pub(super) fn luma_table_sum(bytes: &[u8]) -> Option<u32> {
    if bytes.get(..2)? != [0xFF, SOI] {
        return None;
    }
    let mut pos = 2;
    loop {
        if *bytes.get(pos)? != 0xFF {
            return None;
        }
        // Markers may be preceded by any number of fill bytes.
        while *bytes.get(pos)? == 0xFF {
            pos += 1;
        }
        let marker = *bytes.get(pos)?;
        pos += 1;
        if marker == SOS || marker == EOI {
            return None;
        }
        if (0xD0..=0xD7).contains(&marker) || marker == 0x01 {
            continue;
        }
        let len = usize::from(u16::from_be_bytes([*bytes.get(pos)?, *bytes.get(pos + 1)?]));
        let segment = bytes.get(pos + 2..pos + len.max(2))?;
        if marker == DQT {
            if let Some(sum) = table_zero_sum(segment) {
                return Some(sum);
            }
        }
        pos += len;
    }
}

/// A DQT payload holds one or more `Pq/Tq` + 64-entry tables back to back.
fn table_zero_sum(mut segment: &[u8]) -> Option<u32> {
    while let Some((&pqtq, rest)) = segment.split_first() {
        let wide = pqtq >> 4 != 0;
        let entry = if wide { 2 } else { 1 };
        let table = rest.get(..64 * entry)?;
        if pqtq & 0x0F == 0 {
            let sum = if wide {
                table
                    .chunks_exact(2)
                    .map(|pair| u32::from(u16::from_be_bytes([pair[0], pair[1]])))
                    .sum()
            } else {
                table.iter().map(|&v| u32::from(v)).sum()
            };
            return Some(sum);
        }
        segment = &rest[64 * entry..];
    }
    None
}

/// True when the stored luminance table is at least as coarse as `quality` would make it.
pub(super) fn at_or_below_quality(bytes: &[u8], quality: u8) -> bool {
    luma_table_sum(bytes).is_some_and(|sum| sum >= reference_luma_sum(quality))
}

use std::io::Read;

use crate::SlimError;

/// Default maximum uncompressed size permitted for any single part inflated into memory.
///
/// Guards against ZIP bombs (tiny compressed size, huge uncompressed size) and forged ZIP
/// metadata (e.g. an incorrect `uncompressed_size` field).
pub(crate) const DEFAULT_MAX_PART_BYTES: u64 = 256 * 1024 * 1024; // 256MiB

/// Default maximum total uncompressed bytes across all parts of one package.
pub(crate) const DEFAULT_MAX_TOTAL_BYTES: u64 = 512 * 1024 * 1024; // 512MiB

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Byte iterator over a part name in canonical form: percent-escapes decoded, leading separators
/// dropped, `\` mapped to `/`, ASCII lowercased.
struct CanonicalBytes<'a> {
    bytes: &'a [u8],
    in_leading_separators: bool,
}

impl<'a> CanonicalBytes<'a> {
    fn new(s: &'a str) -> Self {
        Self {
            bytes: s.as_bytes(),
            in_leading_separators: true,
        }
    }
}

impl Iterator for CanonicalBytes<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        loop {
            let b = *self.bytes.first()?;
            let decoded = if b == b'%' && self.bytes.len() >= 3 {
                match (hex_val(self.bytes[1]), hex_val(self.bytes[2])) {
                    (Some(hi), Some(lo)) => {
                        self.bytes = &self.bytes[3..];
                        (hi << 4) | lo
                    }
                    _ => {
                        self.bytes = &self.bytes[1..];
                        b
                    }
                }
            } else {
                self.bytes = &self.bytes[1..];
                b
            };

            // Skip any number of leading `/` or `\` separators, even when percent-encoded.
            if self.in_leading_separators && matches!(decoded, b'/' | b'\\') {
                continue;
            }
            self.in_leading_separators = false;

            return Some(if decoded == b'\\' {
                b'/'
            } else {
                decoded.to_ascii_lowercase()
            });
        }
    }
}

/// Whether two part names address the same part, tolerating non-canonical producer output.
pub(crate) fn part_names_equivalent(a: &str, b: &str) -> bool {
    CanonicalBytes::new(a).eq(CanonicalBytes::new(b))
}

/// Whether `name` starts with `canonical_prefix` (which must already be lowercase with `/`
/// separators and no leading slash).
pub(crate) fn part_name_starts_with(name: &str, canonical_prefix: &str) -> bool {
    let mut n = CanonicalBytes::new(name);
    canonical_prefix
        .bytes()
        .all(|expected| n.next() == Some(expected))
}

/// Canonical lowercase form of a part name, used as a set key when matching deleted parts.
pub(crate) fn canonical_part_name(name: &str) -> String {
    let bytes: Vec<u8> = CanonicalBytes::new(name).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[derive(Debug, Clone)]
pub(crate) struct ZipInflateBudget {
    max_total_bytes: u64,
    used_bytes: u64,
}

impl ZipInflateBudget {
    pub(crate) fn new(max_total_bytes: u64) -> Self {
        Self {
            max_total_bytes,
            used_bytes: 0,
        }
    }

    fn remaining_bytes(&self) -> u64 {
        self.max_total_bytes.saturating_sub(self.used_bytes)
    }

    fn too_large(&self, total: u64) -> SlimError {
        SlimError::CorruptArchive(format!(
            "package is too large to load safely: {total} bytes uncompressed (max {})",
            self.max_total_bytes
        ))
    }
}

fn part_too_large(part: &str, size: u64, max: u64) -> SlimError {
    SlimError::CorruptArchive(format!(
        "part is too large to load safely: {part} is {size} bytes (max {max} bytes)"
    ))
}

/// Read a ZIP entry into memory with both a per-part and a package-wide uncompressed limit.
///
/// ZIP metadata is not trusted: `declared_size` is only a fast-path check, the actual read is
/// capped at `limit + 1` bytes and rejected if it overflows.
pub(crate) fn read_zip_file_bytes_with_budget<R: Read>(
    file: &mut R,
    declared_size: u64,
    part: &str,
    max_part_bytes: u64,
    budget: &mut ZipInflateBudget,
) -> Result<Vec<u8>, SlimError> {
    let used_before = budget.used_bytes;
    let effective_max = max_part_bytes.min(budget.remaining_bytes());
    let limit_is_total = effective_max < max_part_bytes;

    if declared_size > max_part_bytes {
        return Err(part_too_large(part, declared_size, max_part_bytes));
    }
    if limit_is_total && declared_size > effective_max {
        return Err(budget.too_large(used_before.saturating_add(declared_size)));
    }

    let mut buf = Vec::with_capacity(declared_size.min(effective_max) as usize);
    let mut reader = file.take(effective_max.saturating_add(1));
    reader.read_to_end(&mut buf)?;

    let observed = buf.len() as u64;
    if observed > effective_max {
        if limit_is_total {
            return Err(budget.too_large(used_before.saturating_add(observed)));
        }
        return Err(part_too_large(part, observed, max_part_bytes));
    }

    budget.used_bytes = used_before.saturating_add(observed);
    Ok(buf)
}

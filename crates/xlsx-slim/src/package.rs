use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::FileOptions;

use crate::content_types::CONTENT_TYPES_PART;
use crate::zip_util::{
    part_names_equivalent, read_zip_file_bytes_with_budget, ZipInflateBudget,
    DEFAULT_MAX_PART_BYTES, DEFAULT_MAX_TOTAL_BYTES,
};
use crate::SlimError;

/// Deflate level used for every repacked entry.
pub const REPACK_COMPRESSION_LEVEL: i64 = 9;

/// Limits applied while inflating a package into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageLimits {
    pub max_part_bytes: u64,
    pub max_total_bytes: u64,
}

impl Default for PackageLimits {
    fn default() -> Self {
        Self {
            max_part_bytes: DEFAULT_MAX_PART_BYTES,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
        }
    }
}

/// An unpacked OOXML workbook: part name -> bytes.
///
/// Names are kept exactly as the producer wrote them (no canonicalization) so a package with no
/// edits repacks to the same set of parts; lookups tolerate non-canonical names instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    parts: BTreeMap<String, Vec<u8>>,
}

impl Package {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SlimError> {
        Self::from_bytes_limited(bytes, PackageLimits::default())
    }

    pub fn from_bytes_limited(bytes: &[u8], limits: PackageLimits) -> Result<Self, SlimError> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|err| {
            SlimError::CorruptArchive(format!("not a valid ZIP container: {err}"))
        })?;

        let mut parts = BTreeMap::new();
        let mut budget = ZipInflateBudget::new(limits.max_total_bytes);
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).map_err(|err| {
                SlimError::CorruptArchive(format!("unreadable ZIP entry #{i}: {err}"))
            })?;
            if !file.is_file() {
                continue;
            }

            let name = file.name().to_string();
            let declared_size = file.size();
            let buf = read_zip_file_bytes_with_budget(
                &mut file,
                declared_size,
                &name,
                limits.max_part_bytes,
                &mut budget,
            )?;
            parts.insert(name, buf);
        }

        let package = Self { parts };
        if package.part(CONTENT_TYPES_PART).is_none() {
            return Err(SlimError::CorruptArchive(format!(
                "missing {CONTENT_TYPES_PART}; not an OOXML package"
            )));
        }
        Ok(package)
    }

    /// Build a package from an already-inflated part map. No layout validation is done.
    pub fn from_parts(parts: BTreeMap<String, Vec<u8>>) -> Self {
        Self { parts }
    }

    pub fn into_parts(self) -> BTreeMap<String, Vec<u8>> {
        self.parts
    }

    /// The stored key for `name`, resolving leading slashes, `\` separators, ASCII case and
    /// percent-encoding differences. An exact match always wins.
    pub fn part_key(&self, name: &str) -> Option<&str> {
        if let Some((key, _)) = self.parts.get_key_value(name) {
            return Some(key.as_str());
        }
        self.parts
            .keys()
            .find(|key| part_names_equivalent(key.as_str(), name))
            .map(String::as_str)
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        if let Some(bytes) = self.parts.get(name) {
            return Some(bytes.as_slice());
        }
        let key = self.part_key(name)?;
        self.parts.get(key).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.part_key(name).is_some()
    }

    pub fn parts(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.parts
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }

    pub fn set_part(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.parts.insert(name.into(), bytes);
    }

    /// Remove a part by (equivalent) name, returning its stored name and bytes.
    pub fn remove_part(&mut self, name: &str) -> Option<(String, Vec<u8>)> {
        let key = self.part_key(name)?.to_string();
        let bytes = self.parts.remove(&key)?;
        Some((key, bytes))
    }

    /// Move a part to a new name. Fails (returns `false`) if `from` is missing or `to` is taken.
    pub fn rename_part(&mut self, from: &str, to: &str) -> bool {
        if self.contains(to) {
            return false;
        }
        match self.remove_part(from) {
            Some((_, bytes)) => {
                self.parts.insert(to.to_string(), bytes);
                true
            }
            None => false,
        }
    }

    /// Write the package as a ZIP: maximum deflate, lexicographic entry order, fixed timestamps.
    ///
    /// Identical packages always produce identical bytes.
    pub fn write_to_bytes(&self) -> Result<Vec<u8>, SlimError> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::<()>::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .compression_level(Some(REPACK_COMPRESSION_LEVEL))
            .last_modified_time(zip::DateTime::default());

        for (name, bytes) in &self.parts {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }

        Ok(zip.finish()?.into_inner())
    }
}

/// Reject anything but `.xlsx` / `.xlsm` (case-insensitive) before any work starts.
pub fn check_workbook_extension(path: &Path) -> Result<(), SlimError> {
    let ok = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx") || ext.eq_ignore_ascii_case("xlsm"));
    if ok {
        Ok(())
    } else {
        Err(SlimError::UnsupportedFormat {
            path: path.to_path_buf(),
        })
    }
}

/// Read a workbook from disk into memory. The input file is only ever opened for reading.
pub fn extract(input: &Path) -> Result<Package, SlimError> {
    check_workbook_extension(input)?;
    let bytes = std::fs::read(input)?;
    Package::from_bytes(&bytes)
}

/// Repack `package` to `output` atomically, returning the number of bytes written.
///
/// A failed write leaves no partial file behind and never replaces an existing `output`.
pub fn repack(package: &Package, output: &Path) -> Result<u64, SlimError> {
    let bytes = package.write_to_bytes()?;
    slim_fs::atomic_write_bytes(output, &bytes)?;
    Ok(bytes.len() as u64)
}

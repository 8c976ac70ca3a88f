//! Keep every reference to renamed media consistent after recompression.
//!
//! Three independent passes, each idempotent and tolerant of missing parts:
//! relationship targets, literal paths inside legacy VML drawings, and `Override` entries in
//! `[Content_Types].xml`. A part that fails to parse is left unchanged and recorded.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::content_types::{
    content_type_for_extension, ensure_content_types_default, rename_media_overrides,
    CONTENT_TYPES_PART,
};
use crate::path::split_extension;
use crate::rels::{is_rels_part, rename_media_targets};
use crate::report::OperationRecord;
use crate::{Package, ReferencePatchError, SlimError};

/// Old media file name -> new media file name (names only, no directory).
pub type RenameMap = BTreeMap<String, String>;

/// How many parts each pass rewrote, plus per-part outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub rels_parts: usize,
    pub vml_parts: usize,
    pub content_types_parts: usize,
    pub records: Vec<OperationRecord>,
}

impl SyncReport {
    pub fn parts_changed(&self) -> usize {
        self.rels_parts + self.vml_parts + self.content_types_parts
    }
}

const OPERATION: &str = "sync-references";

fn is_vml_part(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 4 && bytes[bytes.len() - 4..].eq_ignore_ascii_case(b".vml")
}

/// Apply `renames` to every part that can reference media. An empty map is a no-op.
pub fn sync_references(package: &mut Package, renames: &RenameMap) -> SyncReport {
    let mut report = SyncReport::default();
    if renames.is_empty() {
        return report;
    }

    let rels_parts: Vec<String> = package
        .part_names()
        .filter(|name| is_rels_part(name))
        .map(str::to_string)
        .collect();
    for name in rels_parts {
        match patch_part(package, &name, |xml| rename_media_targets(xml, renames)) {
            Ok(true) => {
                report.rels_parts += 1;
                report.records.push(OperationRecord::applied(OPERATION, &name));
            }
            Ok(false) => {}
            Err(err) => record_failure(&mut report, err),
        }
    }

    let vml_parts: Vec<String> = package
        .part_names()
        .filter(|name| is_vml_part(name))
        .map(str::to_string)
        .collect();
    for name in vml_parts {
        if let Some(bytes) = package.part(&name) {
            if let Some(patched) = replace_media_paths(bytes, renames) {
                package.set_part(name.clone(), patched);
                report.vml_parts += 1;
                report.records.push(OperationRecord::applied(OPERATION, &name));
            }
        }
    }

    match sync_content_types(package, renames) {
        Ok(true) => {
            report.content_types_parts += 1;
            report
                .records
                .push(OperationRecord::applied(OPERATION, CONTENT_TYPES_PART));
        }
        Ok(false) => {}
        Err(err) => record_failure(&mut report, err),
    }

    log::debug!(
        "reference sync: {} rels, {} vml, {} content types part(s) updated",
        report.rels_parts,
        report.vml_parts,
        report.content_types_parts
    );
    report
}

fn record_failure(report: &mut SyncReport, err: ReferencePatchError) {
    log::warn!("{err}");
    report
        .records
        .push(OperationRecord::failed(OPERATION, &err.part, &err.source));
}

/// Run an XML rewrite over one part, storing the result only when it changed.
fn patch_part<F>(package: &mut Package, name: &str, rewrite: F) -> Result<bool, ReferencePatchError>
where
    F: FnOnce(&[u8]) -> Result<Option<Vec<u8>>, SlimError>,
{
    let Some(bytes) = package.part(name) else {
        return Ok(false);
    };
    match rewrite(bytes) {
        Ok(Some(patched)) => {
            package.set_part(name.to_string(), patched);
            Ok(true)
        }
        Ok(None) => Ok(false),
        Err(source) => Err(ReferencePatchError {
            part: name.to_string(),
            source,
        }),
    }
}

/// Byte-level substitution of `/xl/media/<old>` with `/xl/media/<new>`.
///
/// VML drawings address images by literal path and are frequently not well-formed XML, so this
/// pass never parses them.
pub(crate) fn replace_media_paths(bytes: &[u8], renames: &RenameMap) -> Option<Vec<u8>> {
    let mut current: Option<Vec<u8>> = None;
    for (old, new) in renames {
        let needle = format!("/xl/media/{old}");
        let replacement = format!("/xl/media/{new}");
        let source = current.as_deref().unwrap_or(bytes);
        if let Some(replaced) = replace_all(source, needle.as_bytes(), replacement.as_bytes()) {
            current = Some(replaced);
        }
    }
    current
}

fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Option<Vec<u8>> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    let mut out: Option<Vec<u8>> = None;
    let mut last = 0;
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            let buf = out.get_or_insert_with(|| Vec::with_capacity(haystack.len()));
            buf.extend_from_slice(&haystack[last..i]);
            buf.extend_from_slice(replacement);
            i += needle.len();
            last = i;
        } else {
            i += 1;
        }
    }
    let mut out = out?;
    out.extend_from_slice(&haystack[last..]);
    Some(out)
}

fn sync_content_types(package: &mut Package, renames: &RenameMap) -> Result<bool, ReferencePatchError> {
    let Some(ct_key) = package.part_key(CONTENT_TYPES_PART).map(str::to_string) else {
        return Ok(false);
    };
    let mut changed = patch_part(package, &ct_key, |xml| rename_media_overrides(xml, renames))?;

    let new_extensions: BTreeSet<String> = renames
        .values()
        .map(|name| split_extension(name).1)
        .collect();
    for ext in new_extensions {
        let Some(content_type) = content_type_for_extension(&ext) else {
            continue;
        };
        changed |= ensure_content_types_default(package, &ext, content_type).map_err(|source| {
            ReferencePatchError {
                part: ct_key.clone(),
                source,
            }
        })?;
    }
    Ok(changed)
}

//! Structural pruning: parts a workbook does not need to open and calculate correctly.
//!
//! Every operation is independent and treats a missing part as nothing to do. Deleting a part
//! also deletes its own relationships, every relationship pointing at it (plus the `r:id`
//! attributes that used those relationships) and its content-type override.

mod defined_names;

pub use defined_names::{
    clean_workbook_defined_names, filter_defined_names, DefinedNamesStats, DefinedNamesStrategy,
    KEEP_NAMES, WORKBOOK_PART,
};

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::content_types::{remove_overrides, CONTENT_TYPES_PART};
use crate::path::{rels_for_part, resolve_target, source_part_for_rels};
use crate::rels::{
    is_rels_part, parse_relationships, remove_relationships_to,
    RELATIONSHIP_TYPE_PIVOT_CACHE_RECORDS,
};
use crate::report::OperationRecord;
use crate::xml::{
    attribute_value, local_name, rewrite_elements, with_attribute, without_attributes, ElementEdit,
};
use crate::zip_util::{canonical_part_name, part_name_starts_with};
use crate::{Package, SlimError};

/// Which pruning operations run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOptions {
    pub calc_chain: bool,
    pub printer_settings: bool,
    pub thumbnail: bool,
    pub custom_properties: bool,
    pub pivot_save_data: bool,
    pub custom_xml: bool,
}

impl PruneOptions {
    /// `do_xml_cleanup` enables everything except custom XML, which needs its own opt-in.
    pub fn from_flags(do_xml_cleanup: bool, force_custom_xml_removal: bool) -> Self {
        Self {
            calc_chain: do_xml_cleanup,
            printer_settings: do_xml_cleanup,
            thumbnail: do_xml_cleanup,
            custom_properties: do_xml_cleanup,
            pivot_save_data: do_xml_cleanup,
            custom_xml: force_custom_xml_removal,
        }
    }

    pub fn any(&self) -> bool {
        self.calc_chain
            || self.printer_settings
            || self.thumbnail
            || self.custom_properties
            || self.pivot_save_data
            || self.custom_xml
    }
}

/// Parts deleted by one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Removal {
    pub parts: Vec<String>,
    pub bytes: u64,
}

impl Removal {
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn absorb(&mut self, other: Removal) {
        self.parts.extend(other.parts);
        self.bytes += other.bytes;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub removed: Removal,
    /// Pivot cache definitions switched to `saveData="0"`.
    pub pivot_definitions: usize,
    pub records: Vec<OperationRecord>,
}

/// Run every operation `options` enables. A failing operation is recorded and the rest still run.
pub fn prune(package: &mut Package, options: &PruneOptions) -> PruneReport {
    let mut report = PruneReport::default();

    type Op = fn(&mut Package) -> Result<Removal, SlimError>;
    let ops: [(&str, bool, Op); 5] = [
        ("remove-calc-chain", options.calc_chain, remove_calc_chain),
        ("remove-printer-settings", options.printer_settings, remove_printer_settings),
        ("remove-thumbnail", options.thumbnail, remove_thumbnail),
        ("remove-custom-properties", options.custom_properties, remove_custom_properties),
        ("remove-custom-xml", options.custom_xml, remove_custom_xml),
    ];
    for (operation, enabled, op) in ops {
        if !enabled {
            continue;
        }
        match op(package) {
            Ok(removal) => record_removal(&mut report, operation, removal),
            Err(err) => {
                log::warn!("{operation}: {err}");
                report
                    .records
                    .push(OperationRecord::failed(operation, "package", err));
            }
        }
    }

    if options.pivot_save_data {
        let operation = "disable-pivot-save-data";
        match disable_pivot_save_data(package) {
            Ok((definitions, removal)) => {
                report.pivot_definitions += definitions;
                if definitions > 0 && removal.is_empty() {
                    report.records.push(OperationRecord::applied(
                        operation,
                        format!("{definitions} pivot cache definition(s)"),
                    ));
                }
                record_removal(&mut report, operation, removal);
            }
            Err(err) => {
                log::warn!("{operation}: {err}");
                report
                    .records
                    .push(OperationRecord::failed(operation, "package", err));
            }
        }
    }

    report
}

fn record_removal(report: &mut PruneReport, operation: &str, removal: Removal) {
    if removal.is_empty() {
        report
            .records
            .push(OperationRecord::skipped(operation, "package", "nothing to remove"));
        return;
    }
    for part in &removal.parts {
        log::debug!("{operation}: removed {part}");
        report.records.push(OperationRecord::applied(operation, part));
    }
    report.removed.absorb(removal);
}

fn matching_parts(package: &Package, matches: impl Fn(&str) -> bool) -> Vec<String> {
    package
        .part_names()
        .filter(|name| matches(&canonical_part_name(name)))
        .map(str::to_string)
        .collect()
}

pub fn remove_calc_chain(package: &mut Package) -> Result<Removal, SlimError> {
    let parts = matching_parts(package, |name| name == "xl/calcchain.xml");
    delete_parts(package, &parts)
}

pub fn remove_printer_settings(package: &mut Package) -> Result<Removal, SlimError> {
    let parts = matching_parts(package, |name| {
        name.starts_with("xl/printersettings/") && name.ends_with(".bin")
    });
    delete_parts(package, &parts)
}

pub fn remove_thumbnail(package: &mut Package) -> Result<Removal, SlimError> {
    let parts = matching_parts(package, |name| name.starts_with("docprops/thumbnail."));
    delete_parts(package, &parts)
}

pub fn remove_custom_properties(package: &mut Package) -> Result<Removal, SlimError> {
    let parts = matching_parts(package, |name| name == "docprops/custom.xml");
    delete_parts(package, &parts)
}

/// Delete `customXml/` and `xl/customXml/`. Callers gate this behind an explicit opt-in: add-ins
/// and document management systems store data there.
pub fn remove_custom_xml(package: &mut Package) -> Result<Removal, SlimError> {
    let parts = matching_parts(package, |name| {
        name.starts_with("customxml/") || name.starts_with("xl/customxml/")
    });
    delete_parts(package, &parts)
}

fn is_pivot_cache_definition(name: &str) -> bool {
    part_name_starts_with(name, "xl/pivotcache/pivotcachedefinition")
        && canonical_part_name(name).ends_with(".xml")
}

/// Set `saveData="0"` on every pivot cache definition and delete the cached records they point
/// to. Returns how many definitions were rewritten, plus the removed parts.
pub fn disable_pivot_save_data(package: &mut Package) -> Result<(usize, Removal), SlimError> {
    let definitions: Vec<String> = package
        .part_names()
        .filter(|name| is_pivot_cache_definition(name))
        .map(str::to_string)
        .collect();

    let mut records = BTreeSet::new();
    for definition in &definitions {
        let Some(rels) = package.part(&rels_for_part(definition)) else {
            continue;
        };
        for rel in parse_relationships(rels)? {
            if rel.is_external() || rel.type_uri != RELATIONSHIP_TYPE_PIVOT_CACHE_RECORDS {
                continue;
            }
            if let Some(key) = package.part_key(&resolve_target(definition, &rel.target)) {
                records.insert(key.to_string());
            }
        }
    }
    let records: Vec<String> = records.into_iter().collect();
    let removal = delete_parts(package, &records)?;

    let mut count = 0;
    for definition in &definitions {
        let Some(xml) = package.part(definition) else {
            continue;
        };
        if let Some(out) = set_root_save_data_off(xml)? {
            package.set_part(definition.clone(), out);
            count += 1;
        }
    }
    Ok((count, removal))
}

fn set_root_save_data_off(xml: &[u8]) -> Result<Option<Vec<u8>>, SlimError> {
    let mut seen_root = false;
    rewrite_elements(xml, |e| {
        if seen_root {
            return Ok(ElementEdit::Keep);
        }
        seen_root = true;
        if !local_name(e.name().as_ref()).eq_ignore_ascii_case(b"pivotCacheDefinition") {
            return Ok(ElementEdit::Keep);
        }
        if attribute_value(e, b"saveData")?.is_some_and(|value| value.trim() == "0") {
            return Ok(ElementEdit::Keep);
        }
        Ok(ElementEdit::Replace(with_attribute(e, "saveData", "0")?))
    })
}

/// Delete `parts` (stored names) and every reference to them.
///
/// All rewrites are computed before anything is removed, so an error leaves the package as it was.
pub fn delete_parts(package: &mut Package, parts: &[String]) -> Result<Removal, SlimError> {
    let mut doomed: BTreeSet<String> = BTreeSet::new();
    for part in parts {
        let Some(key) = package.part_key(part) else {
            continue;
        };
        doomed.insert(key.to_string());
        if let Some(rels_key) = package.part_key(&rels_for_part(key)) {
            doomed.insert(rels_key.to_string());
        }
    }
    if doomed.is_empty() {
        return Ok(Removal::default());
    }
    let deleted: BTreeSet<String> = doomed.iter().map(|name| canonical_part_name(name)).collect();

    let mut patches: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut dropped_ids: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (name, xml) in package.parts() {
        if doomed.contains(name) || !is_rels_part(name) {
            continue;
        }
        let Some(source) = source_part_for_rels(name) else {
            continue;
        };
        let (out, ids) = remove_relationships_to(xml, &source, &deleted)?;
        if let Some(out) = out {
            patches.insert(name.to_string(), out);
        }
        if !ids.is_empty() && !source.is_empty() {
            if let Some(source_key) = package.part_key(&source) {
                dropped_ids
                    .entry(source_key.to_string())
                    .or_default()
                    .extend(ids);
            }
        }
    }

    for (source, ids) in &dropped_ids {
        if doomed.contains(source) {
            continue;
        }
        let base = patches
            .get(source)
            .map(Vec::as_slice)
            .or_else(|| package.part(source))
            .unwrap_or_default();
        if let Some(out) = strip_relationship_ids(base, ids)? {
            patches.insert(source.clone(), out);
        }
    }

    if let Some(ct_key) = package.part_key(CONTENT_TYPES_PART).map(str::to_string) {
        if let Some(xml) = package.part(&ct_key) {
            if let Some(out) = remove_overrides(xml, &deleted)? {
                patches.insert(ct_key, out);
            }
        }
    }

    let mut removal = Removal::default();
    for name in &doomed {
        if let Some((key, bytes)) = package.remove_part(name) {
            removal.bytes += bytes.len() as u64;
            removal.parts.push(key);
        }
    }
    for (name, bytes) in patches {
        package.set_part(name, bytes);
    }
    Ok(removal)
}

/// Drop prefixed `id` attributes (`r:id`) whose value is one of `ids`.
fn strip_relationship_ids(
    xml: &[u8],
    ids: &BTreeSet<String>,
) -> Result<Option<Vec<u8>>, SlimError> {
    rewrite_elements(xml, |e| {
        let stripped = without_attributes(e, |key, value| {
            key.contains(&b':') && local_name(key) == b"id" && ids.contains(value)
        })?;
        Ok(match stripped {
            Some(tag) => ElementEdit::Replace(tag),
            None => ElementEdit::Keep,
        })
    })
}

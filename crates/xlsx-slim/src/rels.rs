//! Relationship parts (`*.rels`): parsing and the two edits the slimmer makes to them.

use std::collections::BTreeSet;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::path::resolve_target;
use crate::xml::{attribute_value, local_name, rewrite_elements, with_attribute, ElementEdit};
use crate::zip_util::canonical_part_name;
use crate::{RenameMap, SlimError};

pub const RELATIONSHIP_TYPE_PIVOT_CACHE_RECORDS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/pivotCacheRecords";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub type_uri: String,
    pub target: String,
    pub target_mode: Option<String>,
}

impl Relationship {
    pub fn is_external(&self) -> bool {
        self.target_mode
            .as_deref()
            .is_some_and(|mode| mode.trim().eq_ignore_ascii_case("External"))
    }
}

pub fn is_rels_part(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 5 && bytes[bytes.len() - 5..].eq_ignore_ascii_case(b".rels")
}

pub fn parse_relationships(xml: &[u8]) -> Result<Vec<Relationship>, SlimError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut relationships = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) | Event::Empty(start)
                if local_name(start.name().as_ref()).eq_ignore_ascii_case(b"Relationship") =>
            {
                let mut id = None;
                let mut target = None;
                let mut type_uri = None;
                let mut target_mode = None;
                for attr in start.attributes().with_checks(false) {
                    let attr = attr?;
                    let key = local_name(attr.key.as_ref());
                    let value = attr.unescape_value()?.into_owned();
                    if key.eq_ignore_ascii_case(b"Id") {
                        id = Some(value);
                    } else if key.eq_ignore_ascii_case(b"Target") {
                        target = Some(value);
                    } else if key.eq_ignore_ascii_case(b"Type") {
                        type_uri = Some(value);
                    } else if key.eq_ignore_ascii_case(b"TargetMode") {
                        target_mode = Some(value);
                    }
                }
                if let (Some(id), Some(target), Some(type_uri)) = (id, target, type_uri) {
                    relationships.push(Relationship {
                        id,
                        type_uri,
                        target,
                        target_mode,
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(relationships)
}

/// `<new>` target for `target` if it addresses `media/<old>` for some rename, else `None`.
///
/// Only the final path segment is replaced; any `#fragment` is preserved.
pub(crate) fn renamed_media_target(target: &str, renames: &RenameMap) -> Option<String> {
    let (path, fragment) = match target.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (target, None),
    };
    for (old, new) in renames {
        let Some(prefix) = path.strip_suffix(old.as_str()) else {
            continue;
        };
        let Some(dir) = prefix.strip_suffix("media/") else {
            continue;
        };
        if !(dir.is_empty() || dir.ends_with('/')) {
            continue;
        }
        let mut out = format!("{prefix}{new}");
        if let Some(fragment) = fragment {
            out.push('#');
            out.push_str(fragment);
        }
        return Some(out);
    }
    None
}

/// Point every relationship at `media/<old>` to `media/<new>`.
pub(crate) fn rename_media_targets(
    xml: &[u8],
    renames: &RenameMap,
) -> Result<Option<Vec<u8>>, SlimError> {
    rewrite_elements(xml, |e| {
        if !local_name(e.name().as_ref()).eq_ignore_ascii_case(b"Relationship") {
            return Ok(ElementEdit::Keep);
        }
        let Some(target) = attribute_value(e, b"Target")? else {
            return Ok(ElementEdit::Keep);
        };
        match renamed_media_target(&target, renames) {
            Some(new_target) => Ok(ElementEdit::Replace(with_attribute(e, "Target", &new_target)?)),
            None => Ok(ElementEdit::Keep),
        }
    })
}

/// Remove internal relationships of `source_part` that resolve to a deleted part.
///
/// `deleted` holds canonical part names. Returns the rewritten XML (if anything changed) and the
/// ids of the removed relationships.
pub(crate) fn remove_relationships_to(
    xml: &[u8],
    source_part: &str,
    deleted: &BTreeSet<String>,
) -> Result<(Option<Vec<u8>>, BTreeSet<String>), SlimError> {
    let mut removed_ids = BTreeSet::new();
    let out = rewrite_elements(xml, |e| {
        if !local_name(e.name().as_ref()).eq_ignore_ascii_case(b"Relationship") {
            return Ok(ElementEdit::Keep);
        }
        let external = attribute_value(e, b"TargetMode")?
            .is_some_and(|mode| mode.trim().eq_ignore_ascii_case("External"));
        if external {
            return Ok(ElementEdit::Keep);
        }
        let Some(target) = attribute_value(e, b"Target")? else {
            return Ok(ElementEdit::Keep);
        };
        let resolved = canonical_part_name(&resolve_target(source_part, &target));
        if !deleted.contains(&resolved) {
            return Ok(ElementEdit::Keep);
        }
        if let Some(id) = attribute_value(e, b"Id")? {
            removed_ids.insert(id);
        }
        Ok(ElementEdit::Remove)
    })?;
    Ok((out, removed_ids))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/printerSettings" Target="../printerSettings/printerSettings1.bin"/><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing" Target="../drawings/drawing1.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com/printerSettings1.bin" TargetMode="External"/></Relationships>"#;

    fn renames(pairs: &[(&str, &str)]) -> RenameMap {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn parse_relationships_reads_all_fields() {
        let rels = parse_relationships(SHEET_RELS.as_bytes()).unwrap();
        assert_eq!(rels.len(), 3);
        assert_eq!(rels[0].id, "rId2");
        assert_eq!(rels[0].target, "../printerSettings/printerSettings1.bin");
        assert!(!rels[0].is_external());
        assert!(rels[2].is_external());
    }

    #[test]
    fn renamed_media_target_matches_whole_segment_only() {
        let map = renames(&[("image1.png", "image1.jpg")]);
        assert_eq!(
            renamed_media_target("../media/image1.png", &map).as_deref(),
            Some("../media/image1.jpg")
        );
        assert_eq!(
            renamed_media_target("/xl/media/image1.png#frag", &map).as_deref(),
            Some("/xl/media/image1.jpg#frag")
        );
        assert_eq!(
            renamed_media_target("media/image1.png", &map).as_deref(),
            Some("media/image1.jpg")
        );
        assert_eq!(renamed_media_target("../media/ximage1.png", &map), None);
        assert_eq!(renamed_media_target("../othermedia/image1.png", &map), None);
        assert_eq!(renamed_media_target("../media/image1.png.bak", &map), None);
    }

    #[test]
    fn rename_media_targets_is_idempotent() {
        let xml = br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="../media/image1.png"/></Relationships>"#;
        let map = renames(&[("image1.png", "image1.jpg")]);
        let once = rename_media_targets(xml, &map).unwrap().expect("changed");
        assert!(std::str::from_utf8(&once).unwrap().contains(r#"Target="../media/image1.jpg""#));
        assert!(rename_media_targets(&once, &map).unwrap().is_none());
    }

    #[test]
    fn remove_relationships_to_deleted_parts_reports_ids() {
        let deleted: BTreeSet<String> =
            [canonical_part_name("xl/printerSettings/printerSettings1.bin")].into();
        let (out, ids) =
            remove_relationships_to(SHEET_RELS.as_bytes(), "xl/worksheets/sheet1.xml", &deleted)
                .unwrap();
        let out = String::from_utf8(out.expect("changed")).unwrap();
        assert_eq!(ids, BTreeSet::from(["rId2".to_string()]));
        assert!(!out.contains("rId2"));
        assert!(out.contains("rId1"));
        // External targets never resolve to package parts.
        assert!(out.contains("rId3"));
    }
}

//! Defined-name cleanup for `xl/workbook.xml`.
//!
//! Workbooks accumulate thousands of stale names (broken external links, add-in leftovers).
//! Only the print-layout names are kept.

use std::sync::OnceLock;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

use crate::xml::{attribute_value, local_name};
use crate::{Package, SlimError};

pub const WORKBOOK_PART: &str = "xl/workbook.xml";

/// Names that survive cleanup.
pub const KEEP_NAMES: [&str; 4] = [
    "_xlnm.Print_Area",
    "_xlnm.Print_Titles",
    "Print_Area",
    "Print_Titles",
];

fn is_kept(name: &str) -> bool {
    KEEP_NAMES.contains(&name)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DefinedNamesStats {
    pub total: usize,
    pub kept: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefinedNamesStrategy {
    /// Splice only the `<definedNames>` span; every other byte of the workbook is untouched.
    #[default]
    TextSpan,
    /// Stream the whole workbook through `quick-xml` and re-serialize it.
    Structural,
}

/// Filter the defined names of one workbook part.
///
/// Returns the rewritten XML, or `None` when nothing was removed.
pub fn filter_defined_names(
    xml: &[u8],
    strategy: DefinedNamesStrategy,
) -> Result<(Option<Vec<u8>>, DefinedNamesStats), SlimError> {
    match strategy {
        DefinedNamesStrategy::TextSpan => Ok(filter_text_span(xml)),
        DefinedNamesStrategy::Structural => filter_structural(xml),
    }
}

/// Filter `xl/workbook.xml` in place. A package without a workbook part reports zero names.
pub fn clean_workbook_defined_names(
    package: &mut Package,
    strategy: DefinedNamesStrategy,
) -> Result<DefinedNamesStats, SlimError> {
    let Some(key) = package.part_key(WORKBOOK_PART).map(str::to_string) else {
        return Ok(DefinedNamesStats::default());
    };
    let Some(xml) = package.part(&key) else {
        return Ok(DefinedNamesStats::default());
    };
    let (out, stats) = filter_defined_names(xml, strategy)?;
    if let Some(out) = out {
        package.set_part(key, out);
    }
    log::debug!(
        "defined names: {} total, {} kept, {} removed",
        stats.total,
        stats.kept,
        stats.removed
    );
    Ok(stats)
}

fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)(<definedNames\b[^>]*>)(.*?)(</definedNames>)").expect("valid regex")
    })
}

fn name_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<definedName\b").expect("valid regex"))
}

fn name_chunk_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<definedName\b[^>]*?(?:/>|>.*?</definedName>)").expect("valid regex")
    })
}

fn name_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bname\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
    })
}

/// `name` attribute of a `<definedName ...>` chunk, looked up in the start tag only.
fn chunk_name(chunk: &[u8]) -> Option<&[u8]> {
    let tag_end = chunk.iter().position(|&b| b == b'>').unwrap_or(chunk.len());
    let caps = name_attr_re().captures(&chunk[..tag_end])?;
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_bytes())
}

fn filter_text_span(xml: &[u8]) -> (Option<Vec<u8>>, DefinedNamesStats) {
    let mut stats = DefinedNamesStats::default();
    let Some(caps) = block_re().captures(xml) else {
        return (None, stats);
    };
    let (Some(block), Some(open), Some(inner), Some(close)) =
        (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
    else {
        return (None, stats);
    };

    stats.total = name_open_re().find_iter(inner.as_bytes()).count();
    let mut kept = Vec::with_capacity(inner.len());
    for chunk in name_chunk_re().find_iter(inner.as_bytes()) {
        let keep = chunk_name(chunk.as_bytes())
            .and_then(|name| std::str::from_utf8(name).ok())
            .is_some_and(is_kept);
        if keep {
            stats.kept += 1;
            kept.extend_from_slice(chunk.as_bytes());
        }
    }
    stats.removed = stats.total - stats.kept;
    if stats.removed == 0 {
        return (None, stats);
    }

    let mut out = Vec::with_capacity(xml.len());
    out.extend_from_slice(&xml[..block.start()]);
    if stats.kept > 0 {
        out.extend_from_slice(open.as_bytes());
        out.extend_from_slice(&kept);
        out.extend_from_slice(close.as_bytes());
    }
    out.extend_from_slice(&xml[block.end()..]);
    (Some(out), stats)
}

fn is_tag(e: &BytesStart<'_>, local: &[u8]) -> bool {
    local_name(e.name().as_ref()) == local
}

fn start_is_kept(e: &BytesStart<'_>) -> Result<bool, SlimError> {
    Ok(attribute_value(e, b"name")?.is_some_and(|name| is_kept(&name)))
}

/// One `<definedName>` being buffered until its end tag.
struct PendingName {
    keep: bool,
    depth: usize,
    events: Vec<Event<'static>>,
}

fn filter_structural(xml: &[u8]) -> Result<(Option<Vec<u8>>, DefinedNamesStats), SlimError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut buf = Vec::new();
    let mut stats = DefinedNamesStats::default();

    let mut block: Option<BytesStart<'static>> = None;
    let mut kept_events: Vec<Event<'static>> = Vec::new();
    let mut pending: Option<PendingName> = None;

    loop {
        let event = reader.read_event_into(&mut buf)?;

        if let Some(name) = pending.as_mut() {
            match &event {
                Event::Start(_) => name.depth += 1,
                Event::End(_) => name.depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            name.events.push(event.into_owned());
            if name.depth == 0 {
                if let Some(done) = pending.take() {
                    stats.total += 1;
                    if done.keep {
                        stats.kept += 1;
                        kept_events.extend(done.events);
                    }
                }
            }
            buf.clear();
            continue;
        }

        match event {
            Event::Start(e) if block.is_none() && is_tag(&e, b"definedNames") => {
                block = Some(e.into_owned());
            }
            Event::Start(e) if block.is_some() && is_tag(&e, b"definedName") => {
                pending = Some(PendingName {
                    keep: start_is_kept(&e)?,
                    depth: 1,
                    events: vec![Event::Start(e.into_owned())],
                });
            }
            Event::Empty(e) if block.is_some() && is_tag(&e, b"definedName") => {
                stats.total += 1;
                if start_is_kept(&e)? {
                    stats.kept += 1;
                    kept_events.push(Event::Empty(e.into_owned()));
                }
            }
            Event::End(e) if is_tag_end(&e, b"definedNames") => {
                if let Some(start) = block.take() {
                    if !kept_events.is_empty() {
                        writer.write_event(Event::Start(start))?;
                        for kept in kept_events.drain(..) {
                            writer.write_event(kept)?;
                        }
                        writer.write_event(Event::End(e))?;
                    }
                } else {
                    writer.write_event(Event::End(e))?;
                }
            }
            Event::Eof => break,
            // Whitespace and comments between names are dropped along with the names.
            _ if block.is_some() => {}
            other => writer.write_event(other)?,
        }
        buf.clear();
    }

    stats.removed = stats.total - stats.kept;
    if stats.removed == 0 {
        return Ok((None, stats));
    }
    Ok((Some(writer.into_inner()), stats))
}

fn is_tag_end(e: &BytesEnd<'_>, local: &[u8]) -> bool {
    local_name(e.name().as_ref()) == local
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn workbook(names: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets><definedNames>{names}</definedNames><calcPr calcId="191029"/></workbook>"#
        )
    }

    const PRINT_AREA: &str =
        r#"<definedName name="_xlnm.Print_Area" localSheetId="0">Sheet1!$A$1:$D$20</definedName>"#;
    const MACRO: &str = r#"<definedName name="Macro1" hidden="1">'[1]Book'!$A$1</definedName>"#;

    #[test]
    fn print_area_kept_macro_removed() {
        let xml = workbook(&format!("{PRINT_AREA}\n    {MACRO}"));
        for strategy in [DefinedNamesStrategy::TextSpan, DefinedNamesStrategy::Structural] {
            let (out, stats) = filter_defined_names(xml.as_bytes(), strategy).unwrap();
            assert_eq!(
                stats,
                DefinedNamesStats {
                    total: 2,
                    kept: 1,
                    removed: 1
                }
            );
            let out = String::from_utf8(out.expect("changed")).unwrap();
            assert!(out.contains("_xlnm.Print_Area"), "{strategy:?}: {out}");
            assert!(!out.contains("Macro1"), "{strategy:?}: {out}");
            roxmltree::Document::parse(&out).unwrap();
        }
    }

    #[test]
    fn text_span_leaves_everything_outside_the_block_untouched() {
        let xml = workbook(&format!("{PRINT_AREA}{MACRO}"));
        let (out, _) = filter_defined_names(xml.as_bytes(), DefinedNamesStrategy::TextSpan).unwrap();
        assert_eq!(
            String::from_utf8(out.unwrap()).unwrap(),
            workbook(PRINT_AREA)
        );
    }

    #[test]
    fn block_is_dropped_when_nothing_is_kept() {
        let xml = workbook(&format!(r#"{MACRO}<definedName name="Other"/>"#));
        for strategy in [DefinedNamesStrategy::TextSpan, DefinedNamesStrategy::Structural] {
            let (out, stats) = filter_defined_names(xml.as_bytes(), strategy).unwrap();
            assert_eq!(stats.removed, 2, "{strategy:?}");
            let out = String::from_utf8(out.unwrap()).unwrap();
            assert!(!out.contains("definedNames"), "{strategy:?}: {out}");
            assert!(out.contains(r#"<calcPr calcId="191029"/>"#));
        }
    }

    #[test]
    fn nothing_removed_means_no_rewrite() {
        let xml = workbook(PRINT_AREA);
        let (out, stats) =
            filter_defined_names(xml.as_bytes(), DefinedNamesStrategy::TextSpan).unwrap();
        assert!(out.is_none());
        assert_eq!(stats.kept, 1);

        let no_block = br#"<workbook><sheets/></workbook>"#;
        let (out, stats) = filter_defined_names(no_block, DefinedNamesStrategy::Structural).unwrap();
        assert!(out.is_none());
        assert_eq!(stats, DefinedNamesStats::default());
    }

    #[test]
    fn missing_workbook_part_is_not_an_error() {
        let mut package = Package::default();
        let stats =
            clean_workbook_defined_names(&mut package, DefinedNamesStrategy::TextSpan).unwrap();
        assert_eq!(stats.total, 0);
    }

    fn name_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("_xlnm.Print_Area".to_string()),
            Just("_xlnm.Print_Titles".to_string()),
            Just("Print_Titles".to_string()),
            "[A-Za-z][A-Za-z0-9_]{0,12}",
        ]
    }

    proptest! {
        #[test]
        fn strategies_agree_and_keep_only_print_names(
            names in proptest::collection::vec((name_strategy(), any::<bool>()), 1..12)
        ) {
            let body: String = names
                .iter()
                .map(|(name, empty)| {
                    if *empty {
                        format!(r#"<definedName name="{name}"/>"#)
                    } else {
                        format!(r#"<definedName name="{name}">Sheet1!$A$1</definedName>"#)
                    }
                })
                .collect();
            let xml = workbook(&body);
            let expected_kept = names.iter().filter(|(name, _)| is_kept(name)).count();

            let (text_out, text_stats) =
                filter_defined_names(xml.as_bytes(), DefinedNamesStrategy::TextSpan).unwrap();
            let (_, structural_stats) =
                filter_defined_names(xml.as_bytes(), DefinedNamesStrategy::Structural).unwrap();

            prop_assert_eq!(text_stats, structural_stats);
            prop_assert_eq!(text_stats.total, names.len());
            prop_assert_eq!(text_stats.kept, expected_kept);
            prop_assert_eq!(text_out.is_some(), expected_kept < names.len());

            let out = text_out.map(String::from_utf8).transpose().unwrap().unwrap_or(xml);
            let doc = roxmltree::Document::parse(&out).unwrap();
            let remaining = doc
                .descendants()
                .filter(|n| n.has_tag_name("definedName"))
                .count();
            prop_assert_eq!(remaining, expected_kept);
        }
    }
}

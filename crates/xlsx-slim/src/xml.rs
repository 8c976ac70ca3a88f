//! Streaming XML edits shared by the reference synchronizer and the pruner.
//!
//! Edits go through `quick-xml` event by event so untouched markup (declarations, whitespace,
//! namespace prefixes, attribute quoting) is written back byte-for-byte; only elements an edit
//! touches are re-serialized.

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::SlimError;

pub fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

/// `prefix:local` using the namespace prefix of `container_name`, if it has one.
pub(crate) fn prefixed_tag(container_name: &[u8], local: &str) -> String {
    match container_name.iter().position(|&b| b == b':') {
        Some(idx) => {
            let prefix = std::str::from_utf8(&container_name[..idx]).unwrap_or_default();
            format!("{prefix}:{local}")
        }
        None => local.to_string(),
    }
}

/// Decision for one start or empty element during [`rewrite_elements`].
pub(crate) enum ElementEdit {
    Keep,
    /// Write this tag instead. It must keep the original element name.
    Replace(BytesStart<'static>),
    /// Drop the element together with all of its content.
    Remove,
}

/// Stream `xml` through `edit`, which sees every start/empty element outside removed subtrees.
///
/// Returns `Ok(None)` when no edit changed anything so callers can keep the original bytes.
pub(crate) fn rewrite_elements<F>(xml: &[u8], mut edit: F) -> Result<Option<Vec<u8>>, SlimError>
where
    F: FnMut(&BytesStart<'_>) -> Result<ElementEdit, SlimError>,
{
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut buf = Vec::new();
    let mut changed = false;
    let mut skip_depth = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
            continue;
        }

        match event {
            Event::Start(e) => match edit(&e)? {
                ElementEdit::Keep => writer.write_event(Event::Start(e))?,
                ElementEdit::Replace(new) => {
                    changed = true;
                    writer.write_event(Event::Start(new))?;
                }
                ElementEdit::Remove => {
                    changed = true;
                    skip_depth = 1;
                }
            },
            Event::Empty(e) => match edit(&e)? {
                ElementEdit::Keep => writer.write_event(Event::Empty(e))?,
                ElementEdit::Replace(new) => {
                    changed = true;
                    writer.write_event(Event::Empty(new))?;
                }
                ElementEdit::Remove => changed = true,
            },
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
        buf.clear();
    }

    Ok(changed.then(|| writer.into_inner()))
}

/// Unescaped value of the first attribute whose local name matches `key` (ASCII case-insensitive).
pub(crate) fn attribute_value(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, SlimError> {
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        if local_name(attr.key.as_ref()).eq_ignore_ascii_case(key) {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Copy of `e` with the attribute whose local name is `key` set to `value`, appending it when
/// absent. Other attributes keep their raw (already escaped) values and order.
pub(crate) fn with_attribute(
    e: &BytesStart<'_>,
    key: &str,
    value: &str,
) -> Result<BytesStart<'static>, SlimError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    let mut replaced = false;
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        if !replaced && local_name(attr.key.as_ref()) == key.as_bytes() {
            let qualified = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            out.push_attribute((qualified.as_str(), value));
            replaced = true;
        } else {
            out.push_attribute(attr);
        }
    }
    if !replaced {
        out.push_attribute((key, value));
    }
    Ok(out)
}

/// Copy of `e` without the attributes `drop` selects, or `None` when nothing matched.
pub(crate) fn without_attributes<F>(
    e: &BytesStart<'_>,
    mut drop: F,
) -> Result<Option<BytesStart<'static>>, SlimError>
where
    F: FnMut(&[u8], &str) -> bool,
{
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    let mut dropped = false;
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        let value = attr.unescape_value()?;
        if drop(attr.key.as_ref(), value.as_ref()) {
            dropped = true;
            continue;
        }
        out.push_attribute(attr);
    }
    Ok(dropped.then_some(out))
}

use std::collections::BTreeSet;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader as XmlReader, Writer as XmlWriter};

use crate::path::split_extension;
use crate::xml::{
    attribute_value, local_name, prefixed_tag, rewrite_elements, with_attribute, ElementEdit,
};
use crate::zip_util::canonical_part_name;
use crate::{Package, RenameMap, SlimError};

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

/// MIME type registered for a media extension (lowercase, without the dot).
pub fn content_type_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "emf" => "image/x-emf",
        "wmf" => "image/x-wmf",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => return None,
    })
}

/// Rewrite `Override` entries whose `PartName` ends with `/xl/media/<old>` to the new name.
///
/// When the extension changes the entry's `ContentType` follows it, if the new extension is known.
pub(crate) fn rename_media_overrides(
    xml: &[u8],
    renames: &RenameMap,
) -> Result<Option<Vec<u8>>, SlimError> {
    rewrite_elements(xml, |e| {
        if !local_name(e.name().as_ref()).eq_ignore_ascii_case(b"Override") {
            return Ok(ElementEdit::Keep);
        }
        let Some(part_name) = attribute_value(e, b"PartName")? else {
            return Ok(ElementEdit::Keep);
        };
        for (old, new) in renames {
            if let Some(prefix) = part_name.strip_suffix(&format!("/xl/media/{old}")) {
                let renamed = format!("{prefix}/xl/media/{new}");
                let mut edited = with_attribute(e, "PartName", &renamed)?;
                let (_, old_ext) = split_extension(old);
                let (_, new_ext) = split_extension(new);
                if old_ext != new_ext {
                    if let Some(content_type) = content_type_for_extension(&new_ext) {
                        edited = with_attribute(&edited, "ContentType", content_type)?;
                    }
                }
                return Ok(ElementEdit::Replace(edited));
            }
        }
        Ok(ElementEdit::Keep)
    })
}

/// Drop `Override` entries for parts that no longer exist.
///
/// `deleted` holds canonical part names (see [`canonical_part_name`]).
pub(crate) fn remove_overrides(
    xml: &[u8],
    deleted: &BTreeSet<String>,
) -> Result<Option<Vec<u8>>, SlimError> {
    rewrite_elements(xml, |e| {
        if !local_name(e.name().as_ref()).eq_ignore_ascii_case(b"Override") {
            return Ok(ElementEdit::Keep);
        }
        match attribute_value(e, b"PartName")? {
            Some(part_name) if deleted.contains(&canonical_part_name(&part_name)) => {
                Ok(ElementEdit::Remove)
            }
            _ => Ok(ElementEdit::Keep),
        }
    })
}

/// Ensure `[Content_Types].xml` has a `<Default Extension=".." ContentType=".."/>` for `ext`.
///
/// Returns whether the manifest changed. A package without a manifest is left alone; we never
/// synthesize one.
pub fn ensure_content_types_default(
    package: &mut Package,
    ext: &str,
    content_type: &str,
) -> Result<bool, SlimError> {
    let Some(ct_key) = package.part_key(CONTENT_TYPES_PART).map(str::to_string) else {
        return Ok(false);
    };
    let Some(existing) = package.part(&ct_key) else {
        return Ok(false);
    };

    let normalized_ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    if normalized_ext.is_empty() {
        return Ok(false);
    }

    let mut reader = XmlReader::from_reader(existing);
    reader.config_mut().trim_text(false);
    let mut writer = XmlWriter::new(Vec::with_capacity(existing.len() + 128));
    let mut buf = Vec::new();

    let mut default_tag_name: Option<String> = None;
    let mut found = false;
    let mut changed = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e)
                if local_name(e.name().as_ref()).eq_ignore_ascii_case(b"Default") =>
            {
                if default_tag_name.is_none() {
                    default_tag_name =
                        Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                }
                if let Some(existing_ext) = attribute_value(e, b"Extension")? {
                    if existing_ext.trim().eq_ignore_ascii_case(&normalized_ext) {
                        found = true;
                    }
                }
                writer.write_event(event)?;
            }
            Event::End(e) if local_name(e.name().as_ref()).eq_ignore_ascii_case(b"Types") => {
                if !found {
                    changed = true;
                    let tag = default_tag_name
                        .clone()
                        .unwrap_or_else(|| prefixed_tag(e.name().as_ref(), "Default"));
                    let mut default_el = BytesStart::new(tag.as_str());
                    default_el.push_attribute(("Extension", normalized_ext.as_str()));
                    default_el.push_attribute(("ContentType", content_type));
                    writer.write_event(Event::Empty(default_el))?;
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Empty(e) if local_name(e.name().as_ref()).eq_ignore_ascii_case(b"Types") => {
                // Degenerate self-closing `<Types/>` root: expand it so the Default fits inside.
                if found {
                    writer.write_event(Event::Empty(e))?;
                } else {
                    changed = true;
                    let types_tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    let tag = prefixed_tag(types_tag.as_bytes(), "Default");
                    writer.write_event(Event::Start(e))?;
                    let mut default_el = BytesStart::new(tag.as_str());
                    default_el.push_attribute(("Extension", normalized_ext.as_str()));
                    default_el.push_attribute(("ContentType", content_type));
                    writer.write_event(Event::Empty(default_el))?;
                    writer.write_event(Event::End(BytesEnd::new(types_tag.as_str())))?;
                }
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
        buf.clear();
    }

    if changed {
        package.set_part(ct_key, writer.into_inner());
    }
    Ok(changed)
}

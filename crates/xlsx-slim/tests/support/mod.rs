#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::FileOptions;
use zip::ZipWriter;

/// Builds small but structurally complete workbooks: one sheet, an optional drawing with
/// images, an optional legacy VML drawing, and whatever extra parts a test needs.
#[derive(Debug, Clone, Default)]
pub struct WorkbookBuilder {
    defined_names: Option<String>,
    media: BTreeMap<String, Vec<u8>>,
    vml_media: Vec<String>,
    calc_chain: bool,
    extra_parts: BTreeMap<String, Vec<u8>>,
}

impl WorkbookBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw `<definedName>` elements to place inside `<definedNames>`.
    pub fn defined_names(mut self, xml: &str) -> Self {
        self.defined_names = Some(xml.to_string());
        self
    }

    /// An image under `xl/media/`, referenced from `xl/drawings/drawing1.xml`.
    pub fn media(mut self, file_name: &str, bytes: Vec<u8>) -> Self {
        self.media.insert(file_name.to_string(), bytes);
        self
    }

    /// Also reference `file_name` by literal path from `xl/drawings/vmlDrawing1.vml`.
    pub fn vml_reference(mut self, file_name: &str) -> Self {
        self.vml_media.push(file_name.to_string());
        self
    }

    pub fn calc_chain(mut self) -> Self {
        self.calc_chain = true;
        self
    }

    pub fn part(mut self, name: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.extra_parts.insert(name.to_string(), bytes.into());
        self
    }

    pub fn parts(&self) -> BTreeMap<String, Vec<u8>> {
        let mut parts = BTreeMap::new();
        let mut overrides = vec![
            r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#.to_string(),
            r#"<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#.to_string(),
        ];

        parts.insert(
            "_rels/.rels".to_string(),
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
                .to_vec(),
        );

        let defined_names = self
            .defined_names
            .as_deref()
            .map(|names| format!("<definedNames>{names}</definedNames>"))
            .unwrap_or_default();
        parts.insert(
            "xl/workbook.xml".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets>{defined_names}<calcPr calcId="191029"/></workbook>"#
            )
            .into_bytes(),
        );

        let mut workbook_rels = vec![
            r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>"#.to_string(),
        ];
        if self.calc_chain {
            workbook_rels.push(r#"<Relationship Id="rId9" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/>"#.to_string());
            overrides.push(r#"<Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/>"#.to_string());
            parts.insert(
                "xl/calcChain.xml".to_string(),
                br#"<calcChain xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><c r="A1" i="1"/></calcChain>"#.to_vec(),
            );
        }
        parts.insert(
            "xl/_rels/workbook.xml.rels".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{}</Relationships>"#,
                workbook_rels.concat()
            )
            .into_bytes(),
        );

        let drawing = if self.media.is_empty() {
            ""
        } else {
            r#"<drawing r:id="rId1"/>"#
        };
        parts.insert(
            "xl/worksheets/sheet1.xml".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheetData><row r="1"><c r="A1"><v>1</v></c></row></sheetData>{drawing}</worksheet>"#
            )
            .into_bytes(),
        );

        if !self.media.is_empty() {
            parts.insert(
                "xl/worksheets/_rels/sheet1.xml.rels".to_string(),
                br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing" Target="../drawings/drawing1.xml"/></Relationships>"#
                    .to_vec(),
            );
            overrides.push(r#"<Override PartName="/xl/drawings/drawing1.xml" ContentType="application/vnd.openxmlformats-officedocument.drawing+xml"/>"#.to_string());

            let mut pics = String::new();
            let mut rels = String::new();
            for (idx, (name, bytes)) in self.media.iter().enumerate() {
                let id = idx + 1;
                pics.push_str(&format!(
                    r#"<xdr:oneCellAnchor><xdr:from><xdr:col>0</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>{idx}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from><xdr:ext cx="952500" cy="952500"/><xdr:pic><xdr:nvPicPr><xdr:cNvPr id="{id}" name="Picture {id}"/><xdr:cNvPicPr/></xdr:nvPicPr><xdr:blipFill><a:blip r:embed="rId{id}"/></xdr:blipFill><xdr:spPr/></xdr:pic><xdr:clientData/></xdr:oneCellAnchor>"#
                ));
                rels.push_str(&format!(
                    r#"<Relationship Id="rId{id}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="../media/{name}"/>"#
                ));
                parts.insert(format!("xl/media/{name}"), bytes.clone());
                overrides.push(format!(
                    r#"<Override PartName="/xl/media/{name}" ContentType="{}"/>"#,
                    media_content_type(name)
                ));
            }
            parts.insert(
                "xl/drawings/drawing1.xml".to_string(),
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">{pics}</xdr:wsDr>"#
                )
                .into_bytes(),
            );
            parts.insert(
                "xl/drawings/_rels/drawing1.xml.rels".to_string(),
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{rels}</Relationships>"#
                )
                .into_bytes(),
            );
        }

        if !self.vml_media.is_empty() {
            let shapes: String = self
                .vml_media
                .iter()
                .map(|name| {
                    format!(
                        r##"<v:shape type="#_x0000_t75" style="width:100pt;height:100pt"><v:imagedata src="/xl/media/{name}" o:title=""/></v:shape>"##
                    )
                })
                .collect();
            // Legacy VML is routinely not well-formed XML (unclosed <br>).
            parts.insert(
                "xl/drawings/vmlDrawing1.vml".to_string(),
                format!(
                    r#"<xml xmlns:v="urn:schemas-microsoft-com:vml" xmlns:o="urn:schemas-microsoft-com:office:office"><o:shapelayout v:ext="edit"><br></o:shapelayout>{shapes}</xml>"#
                )
                .into_bytes(),
            );
        }

        parts.insert(
            "[Content_Types].xml".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Default Extension="vml" ContentType="application/vnd.openxmlformats-officedocument.vmlDrawing"/>{}</Types>"#,
                overrides.concat()
            )
            .into_bytes(),
        );

        for (name, bytes) in &self.extra_parts {
            parts.insert(name.clone(), bytes.clone());
        }
        parts
    }

    /// ZIP bytes, stored (uncompressed) so every stage has something to win.
    pub fn build(&self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            FileOptions::<()>::default().compression_method(zip::CompressionMethod::Stored);
        for (name, bytes) in self.parts() {
            zip.start_file(name, options).unwrap();
            zip.write_all(&bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    pub fn write(&self, path: &Path) {
        std::fs::write(path, self.build()).unwrap();
    }
}

fn media_content_type(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Opaque RGB image with a gradient plus low-amplitude noise: large as PNG, cheap as JPEG.
#[cfg(feature = "images")]
pub fn noisy_png(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x9E37_79B9;
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let noise = (state & 0x0F) as u8;
        image::Rgb([
            ((x * 200) / width.max(1)) as u8 + noise,
            ((y * 200) / height.max(1)) as u8 + noise,
            120u8.wrapping_add(noise),
        ])
    });
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// RGBA image with real transparency.
#[cfg(feature = "images")]
pub fn transparent_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(width, height, |x, y| {
        let alpha = if (x / 8 + y / 8) % 2 == 0 { 0 } else { 255 };
        image::Rgba([(x % 256) as u8, (y % 256) as u8, 90, alpha])
    });
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

pub fn part_text(parts: &BTreeMap<String, Vec<u8>>, name: &str) -> String {
    String::from_utf8(parts.get(name).unwrap_or_else(|| panic!("missing {name}")).clone())
        .unwrap()
}

#[cfg(feature = "images")]
pub fn small_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 64]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

/// Two flat colour bands, like a chart screenshot. Compresses extremely well as PNG.
#[cfg(feature = "images")]
pub fn banded_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |_, y| {
        if y < height / 2 {
            image::Rgb([30, 90, 200])
        } else {
            image::Rgb([240, 240, 240])
        }
    });
    encode(image::DynamicImage::ImageRgb8(img), image::ImageFormat::Png)
}

/// The noisy gradient written as a JPEG at `quality`.
#[cfg(feature = "images")]
pub fn noisy_jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
    let img = image::load_from_memory(&noisy_png(width, height)).unwrap();
    let mut out = Vec::new();
    img.write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality))
        .unwrap();
    out
}

/// The noisy gradient in another container format (BMP, TIFF, ...).
#[cfg(feature = "images")]
pub fn noisy_image(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    encode(image::load_from_memory(&noisy_png(width, height)).unwrap(), format)
}

#[cfg(feature = "images")]
fn encode(img: image::DynamicImage, format: image::ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}

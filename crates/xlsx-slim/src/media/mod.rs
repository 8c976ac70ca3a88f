//! Media recompression.
//!
//! Every asset directly under `xl/media/` is decoded, optionally resized, and re-encoded. An
//! asset is only replaced when the new encoding is strictly smaller. Format conversions
//! (aggressive mode, opaque images to JPEG) rename the part; the returned [`RenameMap`] must be
//! passed to [`crate::sync_references`] before the package is written.

#[cfg(feature = "images")]
mod codec;
#[cfg(feature = "images")]
mod quant;

use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::Capabilities;
use crate::path::{file_name, split_extension};
use crate::report::{human_size, OperationRecord, Outcome};
use crate::zip_util::{canonical_part_name, part_name_starts_with};
use crate::{AssetError, Package, RenameMap, SlimError};

const MEDIA_DIR: &str = "xl/media/";
const OPERATION: &str = "recompress";

pub const SAFE_JPEG_QUALITY: u8 = 85;
pub const DEFAULT_JPEG_QUALITY: u8 = 70;
pub const DEFAULT_MAX_IMAGE_EDGE: u32 = 1600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecompressMode {
    /// Lossless-ish: same format, same dimensions, high JPEG quality.
    #[default]
    Safe,
    /// Resize to the edge limit and convert opaque images to JPEG.
    Aggressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecompressOptions {
    pub mode: RecompressMode,
    /// Longest edge after resizing (aggressive mode only).
    pub max_image_edge: u32,
    /// JPEG quality in aggressive mode. Safe mode always uses [`SAFE_JPEG_QUALITY`].
    pub jpeg_quality: u8,
}

impl RecompressOptions {
    pub fn safe() -> Self {
        Self {
            mode: RecompressMode::Safe,
            ..Self::aggressive()
        }
    }

    pub fn aggressive() -> Self {
        Self {
            mode: RecompressMode::Aggressive,
            max_image_edge: DEFAULT_MAX_IMAGE_EDGE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn effective_jpeg_quality(&self) -> u8 {
        match self.mode {
            RecompressMode::Safe => SAFE_JPEG_QUALITY,
            RecompressMode::Aggressive => self.jpeg_quality.clamp(1, 100),
        }
    }
}

impl Default for RecompressOptions {
    fn default() -> Self {
        Self::safe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Jpeg,
    Png,
    Bmp,
    Tiff,
    Gif,
    Other,
}

impl MediaFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "jpe" => Self::Jpeg,
            "png" => Self::Png,
            "bmp" | "dib" => Self::Bmp,
            "tif" | "tiff" => Self::Tiff,
            "gif" => Self::Gif,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Gif => "gif",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    /// Stored part name, e.g. `xl/media/image1.png`.
    pub part_name: String,
    /// Final path segment, e.g. `image1.png`.
    pub file_name: String,
    pub format: MediaFormat,
    pub bytes: Vec<u8>,
}

/// Media parts directly under `xl/media/`, in part-name order.
pub fn media_assets(package: &Package) -> Vec<MediaAsset> {
    package
        .parts()
        .filter(|(name, _)| is_direct_media_child(name))
        .map(|(name, bytes)| {
            let file = file_name(name).to_string();
            let format = MediaFormat::from_extension(&split_extension(&file).1);
            MediaAsset {
                part_name: name.to_string(),
                file_name: file,
                format,
                bytes: bytes.to_vec(),
            }
        })
        .collect()
}

fn is_direct_media_child(name: &str) -> bool {
    if !part_name_starts_with(name, MEDIA_DIR) {
        return false;
    }
    let canonical = canonical_part_name(name);
    let rest = &canonical[MEDIA_DIR.len()..];
    !rest.is_empty() && !rest.contains('/')
}

/// One re-encoded asset that beat the original size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub(crate) bytes: Vec<u8>,
    /// New extension when the format changed.
    pub(crate) extension: Option<&'static str>,
    pub(crate) note: String,
}

impl Candidate {
    #[cfg_attr(not(feature = "images"), allow(dead_code))]
    pub(crate) fn new(bytes: Vec<u8>, extension: Option<&'static str>) -> Self {
        Self {
            bytes,
            extension,
            note: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AssetDecision {
    Keep(String),
    Replace(Candidate),
}

/// An [`AssetDecision`] after it has been written into the package.
enum Applied {
    Replaced {
        after: u64,
        renamed_to: Option<String>,
        note: String,
    },
    Kept(String),
}

#[cfg(feature = "images")]
fn process_asset(asset: &MediaAsset, options: &RecompressOptions) -> Result<AssetDecision, AssetError> {
    codec::process(&asset.bytes, asset.format, options)
}

#[cfg(not(feature = "images"))]
fn process_asset(_asset: &MediaAsset, _options: &RecompressOptions) -> Result<AssetDecision, AssetError> {
    Err(AssetError::CodecUnavailable)
}

/// What happened to one asset; the image stage log is written from these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetReport {
    pub part_name: String,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub renamed_to: Option<String>,
    pub note: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecompressReport {
    /// Number of assets replaced.
    pub changed: usize,
    pub rename_map: RenameMap,
    pub assets: Vec<AssetReport>,
    pub records: Vec<OperationRecord>,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Recompress every media asset in `package` in place.
///
/// Assets are processed in parallel; results are applied in part-name order so renames are
/// deterministic. A failure on one asset is recorded and the asset is kept as-is.
pub fn recompress(
    package: &mut Package,
    options: &RecompressOptions,
) -> Result<RecompressReport, SlimError> {
    if !Capabilities::detect().images {
        return Err(SlimError::MissingCapability("image codec"));
    }

    let assets = media_assets(package);
    let results: Vec<(MediaAsset, Result<AssetDecision, AssetError>)> = assets
        .into_par_iter()
        .map(|asset| {
            let decision = process_asset(&asset, options);
            (asset, decision)
        })
        .collect();

    let mut taken: BTreeSet<String> = package.part_names().map(canonical_part_name).collect();
    let mut report = RecompressReport::default();
    for (asset, decision) in results {
        let before = asset.bytes.len() as u64;
        report.bytes_before += before;

        let applied = decision.and_then(|decision| match decision {
            AssetDecision::Replace(candidate) => {
                let after = candidate.bytes.len() as u64;
                let renamed_to = match candidate.extension {
                    Some(ext) => {
                        let new_part =
                            apply_conversion(package, &asset, ext, candidate.bytes, &mut taken)?;
                        Some(file_name(&new_part).to_string())
                    }
                    None => {
                        package.set_part(asset.part_name.clone(), candidate.bytes);
                        None
                    }
                };
                Ok(Applied::Replaced {
                    after,
                    renamed_to,
                    note: candidate.note,
                })
            }
            AssetDecision::Keep(reason) => Ok(Applied::Kept(reason)),
        });

        let (after, renamed_to, note, outcome) = match applied {
            Ok(Applied::Replaced {
                after,
                renamed_to,
                note,
            }) => {
                if let Some(new_name) = &renamed_to {
                    report
                        .rename_map
                        .insert(asset.file_name.clone(), new_name.clone());
                }
                report.changed += 1;
                log::info!(
                    "{}: {} -> {}{}",
                    asset.part_name,
                    human_size(before),
                    human_size(after),
                    renamed_to
                        .as_deref()
                        .map(|name| format!(" as {name}"))
                        .unwrap_or_default()
                );
                (after, renamed_to, note, Outcome::Applied)
            }
            Ok(Applied::Kept(reason)) => {
                log::debug!("{}: kept ({reason})", asset.part_name);
                (before, None, String::new(), Outcome::Skipped(reason))
            }
            Err(err) => {
                log::warn!("{}: {err}", asset.part_name);
                (before, None, String::new(), Outcome::Failed(err.to_string()))
            }
        };

        report.bytes_after += after;
        report.records.push(OperationRecord::new(
            OPERATION,
            asset.part_name.clone(),
            outcome.clone(),
        ));
        report.assets.push(AssetReport {
            part_name: asset.part_name,
            bytes_before: before,
            bytes_after: after,
            renamed_to,
            note,
            outcome,
        });
    }

    Ok(report)
}

/// Move `asset` to a free name with extension `ext` and store `bytes` there. Returns the new
/// part name.
fn apply_conversion(
    package: &mut Package,
    asset: &MediaAsset,
    ext: &str,
    bytes: Vec<u8>,
    taken: &mut BTreeSet<String>,
) -> Result<String, AssetError> {
    let dir = &asset.part_name[..asset.part_name.len() - asset.file_name.len()];
    let (stem, _) = split_extension(&asset.file_name);
    let new_name = unique_media_name(dir, stem, ext, taken);
    let new_part = format!("{dir}{new_name}");

    if !package.rename_part(&asset.part_name, &new_part) {
        return Err(AssetError::NameTaken {
            from: asset.part_name.clone(),
            to: new_part,
        });
    }
    package.set_part(new_part.clone(), bytes);
    taken.remove(&canonical_part_name(&asset.part_name));
    taken.insert(canonical_part_name(&new_part));
    Ok(new_part)
}

/// `stem.ext`, or `stem-1.ext`, `stem-2.ext`, ... if that name is already in the package.
fn unique_media_name(dir: &str, stem: &str, ext: &str, taken: &BTreeSet<String>) -> String {
    let is_free = |name: &str| !taken.contains(&canonical_part_name(&format!("{dir}{name}")));
    let first = format!("{stem}.{ext}");
    if is_free(&first) {
        return first;
    }
    (1u32..)
        .map(|n| format!("{stem}-{n}.{ext}"))
        .find(|name| is_free(name))
        .unwrap_or(first)
}

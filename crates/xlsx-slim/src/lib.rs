//! Shrink `.xlsx` / `.xlsm` workbooks without changing what they do.
//!
//! A workbook is an OPC package: a ZIP of XML parts plus embedded media. This crate unpacks it
//! into memory ([`Package`]), recompresses media while keeping every reference to renamed media
//! consistent ([`recompress`], [`sync_references`]), prunes parts the workbook does not need
//! ([`prune`]), cleans stale defined names, and repacks deterministically ([`repack`]).
//!
//! [`run_pipeline`] strings these together into the three user-facing stages and manages
//! backups, intermediate files and output naming.

pub mod config;
pub mod content_types;
mod error;
pub mod media;
pub mod package;
pub mod path;
pub mod pipeline;
pub mod prune;
pub mod refs;
pub mod rels;
pub mod report;
pub mod xml;
mod zip_util;

pub use config::{
    Capabilities, LogVerbosity, Settings, SettingsError, SettingsStore, SlimConfig,
    StageSelection,
};
pub use error::{AssetError, ReferencePatchError, SlimError};
pub use media::{
    media_assets, recompress, MediaAsset, MediaFormat, RecompressMode, RecompressOptions,
    RecompressReport,
};
pub use package::{check_workbook_extension, extract, repack, Package, PackageLimits};
pub use pipeline::{
    clean_defined_names, optimize_images, precision_slim, run_pipeline, NullSink, ProgressSink,
    Stage,
};
pub use prune::{
    clean_workbook_defined_names, filter_defined_names, prune, DefinedNamesStats,
    DefinedNamesStrategy, PruneOptions, PruneReport, Removal,
};
pub use refs::{sync_references, RenameMap, SyncReport};
pub use report::{human_size, OperationRecord, Outcome, RunReport, StageReport};

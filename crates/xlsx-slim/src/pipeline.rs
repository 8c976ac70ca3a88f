//! Stage sequencing, backups, intermediates and final naming.
//!
//! Each stage reads the current file and writes a new sibling; the input of a run is only ever
//! read. Intermediates, stage logs and (unless `keep_backup`) backups are removed once every
//! stage has succeeded; on failure they stay behind for inspection.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use slim_fs::{
    move_file, parent_dir_or_dot, remove_file_if_exists, split_file_name, unique_path,
    unique_sibling_with_suffix,
};

use crate::config::{Capabilities, LogVerbosity, SlimConfig};
use crate::media::{recompress, RecompressReport};
use crate::package::{check_workbook_extension, extract, repack};
use crate::prune::{clean_workbook_defined_names, prune, WORKBOOK_PART};
use crate::refs::{sync_references, SyncReport};
use crate::report::{human_size, OperationRecord, Outcome, RunReport, StageReport};
use crate::{Package, SlimError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    NameCleanup,
    ImageOptimization,
    PrecisionSlim,
}

impl Stage {
    pub const ALL: [Stage; 3] = [
        Stage::NameCleanup,
        Stage::ImageOptimization,
        Stage::PrecisionSlim,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::NameCleanup => "name-cleanup",
            Stage::ImageOptimization => "image-optimization",
            Stage::PrecisionSlim => "precision-slim",
        }
    }

    /// Status line shown while the stage runs.
    pub fn label(self) -> &'static str {
        match self {
            Stage::NameCleanup => "Cleaning defined names",
            Stage::ImageOptimization => "Optimizing images",
            Stage::PrecisionSlim => "Running precision slimmer",
        }
    }

    /// Stem suffix of the file the stage writes.
    pub fn output_suffix(self) -> &'static str {
        match self {
            Stage::NameCleanup => "_clean",
            Stage::ImageOptimization => "_slim",
            Stage::PrecisionSlim => FINAL_SUFFIX,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const FINAL_SUFFIX: &str = "_slimmed";
pub const BACKUP_SUFFIX: &str = "_backup";
pub const IMAGE_LOG_SUFFIX: &str = "_image_slim.log";

/// Where the pipeline reports progress. Front-ends implement this; the library never prints.
pub trait ProgressSink {
    fn log(&mut self, message: &str);
    /// `percent` is `None` when progress is indeterminate (after an error).
    fn set_status(&mut self, label: &str, percent: Option<f32>);
    fn show_error(&mut self, title: &str, message: &str);
    fn on_finished(&mut self, final_path: &Path);
    /// Point the user at a file, e.g. the last stage log after a failure.
    fn reveal(&mut self, _path: &Path) {}
}

/// A sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn log(&mut self, _message: &str) {}
    fn set_status(&mut self, _label: &str, _percent: Option<f32>) {}
    fn show_error(&mut self, _title: &str, _message: &str) {}
    fn on_finished(&mut self, _final_path: &Path) {}
}

struct Reporter<'a> {
    sink: &'a mut dyn ProgressSink,
    verbose: bool,
}

impl Reporter<'_> {
    fn info(&mut self, message: &str) {
        log::info!("{message}");
        self.sink.log(message);
    }

    /// Only shown with verbose logging.
    fn detail(&mut self, message: &str) {
        log::debug!("{message}");
        if self.verbose {
            self.sink.log(message);
        }
    }

    fn warn(&mut self, message: &str) {
        log::warn!("{message}");
        self.sink.log(message);
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// `<stem>_image_slim.log` next to the image stage's input.
pub fn image_log_path(input: &Path) -> PathBuf {
    let (stem, _) = split_file_name(input);
    parent_dir_or_dot(input).join(format!("{stem}{IMAGE_LOG_SUFFIX}"))
}

fn make_backup(input: &Path) -> Result<PathBuf, SlimError> {
    let backup = unique_sibling_with_suffix(input, BACKUP_SUFFIX, None);
    slim_fs::copy_atomic(input, &backup)?;
    Ok(backup)
}

/// Write a stage result. When the stage changed nothing and repacking alone did not shrink the
/// file, the input bytes are carried forward instead.
fn write_stage_output(
    input: &Path,
    bytes_before: u64,
    package: &Package,
    changed: bool,
    output: &Path,
) -> Result<u64, SlimError> {
    let written = repack(package, output)?;
    if !changed && written >= bytes_before {
        log::debug!(
            "{}: repack not smaller, carrying input forward",
            input.display()
        );
        return Ok(slim_fs::copy_atomic(input, output)?);
    }
    Ok(written)
}

/// Backup, then keep only print-layout defined names. Writes `<stem>_clean<ext>`.
pub fn clean_defined_names(
    input: &Path,
    config: &SlimConfig,
    take_backup: bool,
) -> Result<StageReport, SlimError> {
    let bytes_before = fs::metadata(input)?.len();
    let mut package = extract(input)?;
    let backup = take_backup.then(|| make_backup(input)).transpose()?;

    let stats = clean_workbook_defined_names(&mut package, config.defined_names_strategy)?;
    let record = if stats.removed > 0 {
        OperationRecord::applied("clean-defined-names", WORKBOOK_PART)
    } else {
        OperationRecord::skipped("clean-defined-names", WORKBOOK_PART, "no stale defined names")
    };

    let output = unique_sibling_with_suffix(input, Stage::NameCleanup.output_suffix(), None);
    let bytes_after = write_stage_output(input, bytes_before, &package, stats.removed > 0, &output)?;
    Ok(StageReport {
        stage: Stage::NameCleanup,
        input: input.to_path_buf(),
        output,
        bytes_before,
        bytes_after,
        backup,
        log_file: None,
        summary: format!(
            "total={}, kept={}, removed={}",
            stats.total, stats.kept, stats.removed
        ),
        records: vec![record],
    })
}

/// Recompress media and fix up references. Writes `<stem>_slim<ext>` and a per-asset log.
pub fn optimize_images(input: &Path, config: &SlimConfig) -> Result<StageReport, SlimError> {
    let bytes_before = fs::metadata(input)?.len();
    let mut package = extract(input)?;

    let recompressed = recompress(&mut package, &config.recompress_options())?;
    let sync = sync_references(&mut package, &recompressed.rename_map);
    let log_file = image_log_path(input);
    write_image_log(&log_file, input, &recompressed, &sync)?;

    let output = unique_sibling_with_suffix(input, Stage::ImageOptimization.output_suffix(), None);
    let bytes_after = write_stage_output(
        input,
        bytes_before,
        &package,
        recompressed.changed > 0,
        &output,
    )?;

    let summary = format!(
        "{} of {} media asset(s) recompressed, {} renamed, {} reference part(s) updated",
        recompressed.changed,
        recompressed.assets.len(),
        recompressed.rename_map.len(),
        sync.parts_changed()
    );
    let mut records = recompressed.records;
    records.extend(sync.records);
    Ok(StageReport {
        stage: Stage::ImageOptimization,
        input: input.to_path_buf(),
        output,
        bytes_before,
        bytes_after,
        backup: None,
        log_file: Some(log_file),
        summary,
        records,
    })
}

fn write_image_log(
    path: &Path,
    input: &Path,
    recompressed: &RecompressReport,
    sync: &SyncReport,
) -> Result<(), SlimError> {
    let mut lines = vec![format!(
        "[INFO] {}: {} media asset(s)",
        file_label(input),
        recompressed.assets.len()
    )];
    for asset in &recompressed.assets {
        lines.push(match &asset.outcome {
            Outcome::Applied => {
                let renamed = asset
                    .renamed_to
                    .as_deref()
                    .map(|name| format!(" -> {name}"))
                    .unwrap_or_default();
                let note = if asset.note.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", asset.note)
                };
                format!(
                    "[OK] {}{renamed}: {} -> {}{note}",
                    asset.part_name,
                    human_size(asset.bytes_before),
                    human_size(asset.bytes_after)
                )
            }
            Outcome::Skipped(reason) => format!("[SKIP] {}: {reason}", asset.part_name),
            Outcome::Failed(reason) => format!("[WARN] {}: {reason}", asset.part_name),
        });
    }
    for record in &sync.records {
        if let Outcome::Failed(reason) = &record.outcome {
            lines.push(format!("[WARN] {}: {reason}", record.target));
        }
    }
    lines.push(format!(
        "[INFO] media: {} -> {}, {} reference part(s) updated",
        human_size(recompressed.bytes_before),
        human_size(recompressed.bytes_after),
        sync.parts_changed()
    ));

    let mut text = lines.join("\n");
    text.push('\n');
    slim_fs::atomic_write_bytes(path, text.as_bytes())?;
    Ok(())
}

/// Optional backup, media recompression, reference sync and structural pruning.
/// Writes `<stem>_slimmed<ext>`.
pub fn precision_slim(
    input: &Path,
    config: &SlimConfig,
    take_backup: bool,
) -> Result<StageReport, SlimError> {
    let bytes_before = fs::metadata(input)?.len();
    let mut package = extract(input)?;
    let backup = take_backup.then(|| make_backup(input)).transpose()?;

    let mut records = Vec::new();
    let mut summary = Vec::new();
    let mut changed = false;

    if Capabilities::detect().images {
        let recompressed = recompress(&mut package, &config.recompress_options())?;
        let sync = sync_references(&mut package, &recompressed.rename_map);
        changed |= recompressed.changed > 0;
        summary.push(format!(
            "{} media asset(s) recompressed",
            recompressed.changed
        ));
        records.extend(recompressed.records);
        records.extend(sync.records);
    } else {
        records.push(OperationRecord::skipped(
            "recompress",
            "xl/media",
            "image codecs are not compiled into this build",
        ));
    }

    let prune_options = config.prune_options();
    if prune_options.any() {
        let pruned = prune(&mut package, &prune_options);
        changed |= !pruned.removed.is_empty() || pruned.pivot_definitions > 0;
        summary.push(format!(
            "{} part(s) pruned ({})",
            pruned.removed.parts.len(),
            human_size(pruned.removed.bytes)
        ));
        records.extend(pruned.records);
    }

    let output = unique_sibling_with_suffix(input, Stage::PrecisionSlim.output_suffix(), None);
    let bytes_after = write_stage_output(input, bytes_before, &package, changed, &output)?;
    Ok(StageReport {
        stage: Stage::PrecisionSlim,
        input: input.to_path_buf(),
        output,
        bytes_before,
        bytes_after,
        backup,
        log_file: None,
        summary: summary.join(", "),
        records,
    })
}

/// Checks run before any stage: a workbook extension and a readable file.
fn input_size(input: &Path) -> Result<u64, SlimError> {
    check_workbook_extension(input)?;
    let metadata = fs::metadata(input)?;
    if !metadata.is_file() {
        return Err(SlimError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a file", input.display()),
        )));
    }
    Ok(metadata.len())
}

/// Run every enabled stage of `config` against `input`.
///
/// Progress goes to `sink`; the returned report covers every stage. On failure the error is
/// returned as [`SlimError::StageFailure`] after `sink.show_error`, and intermediate files stay
/// on disk.
pub fn run_pipeline(
    input: &Path,
    config: &SlimConfig,
    sink: &mut dyn ProgressSink,
) -> Result<RunReport, SlimError> {
    let mut out = Reporter {
        sink,
        verbose: config.log_verbosity == LogVerbosity::Verbose,
    };

    let original_bytes = match input_size(input) {
        Ok(len) => len,
        Err(err) => {
            let title = match err {
                SlimError::UnsupportedFormat { .. } => "Unsupported file",
                _ => "Cannot read input",
            };
            out.info(&format!("[ERROR] {err}"));
            out.sink.set_status("Error", None);
            out.sink.show_error(title, &err.to_string());
            return Err(err);
        }
    };

    let stages: Vec<Stage> = Stage::ALL
        .into_iter()
        .filter(|stage| match stage {
            Stage::NameCleanup => config.stages.clean,
            Stage::ImageOptimization => config.stages.images,
            Stage::PrecisionSlim => config.stages.precision,
        })
        .collect();
    out.info(&format!(
        "[INFO] pipeline start: {}, {} stage(s)",
        file_label(input),
        stages.len()
    ));

    let mut current = input.to_path_buf();
    let mut intermediates: Vec<PathBuf> = Vec::new();
    let mut backups: Vec<PathBuf> = Vec::new();
    let mut log_files: Vec<PathBuf> = Vec::new();
    let mut reports: Vec<StageReport> = Vec::new();
    let total = stages.len();

    for (index, &stage) in stages.iter().enumerate() {
        let base = index as f32 * 100.0 / total as f32;
        out.sink.set_status(stage.label(), Some(base));
        out.info(&format!(
            "[{}/{total}] {}: {}",
            index + 1,
            stage.label(),
            file_label(&current)
        ));

        let result = match stage {
            Stage::NameCleanup => clean_defined_names(&current, config, !config.no_backup),
            Stage::ImageOptimization => optimize_images(&current, config),
            Stage::PrecisionSlim => {
                let backup_taken = stages.contains(&Stage::NameCleanup);
                precision_slim(&current, config, !config.no_backup && !backup_taken)
            }
        };

        let report = match result {
            Ok(report) => report,
            Err(source) => {
                if stage == Stage::ImageOptimization {
                    let log_file = image_log_path(&current);
                    if log_file.exists() {
                        log_files.push(log_file);
                    }
                }
                let message = format!("{stage} stage failed\n\n{source}");
                let err = SlimError::stage(stage, source);
                out.info(&format!("[ERROR] {err}"));
                out.sink.set_status("Error", None);
                if config.open_log_on_error {
                    if let Some(log_file) = log_files.last() {
                        out.sink.reveal(log_file);
                    }
                }
                out.sink.show_error("Error", &message);
                return Err(err);
            }
        };

        if let Some(backup) = &report.backup {
            out.detail(&format!(" - backup: {}", backup.display()));
            backups.push(backup.clone());
        }
        if let Some(log_file) = &report.log_file {
            out.detail(&format!(" - log: {}", log_file.display()));
            log_files.push(log_file.clone());
        }
        out.detail(&format!(" - {}", report.summary));
        out.detail(&format!(
            " - before: {}, after: {}, saved: {}",
            human_size(report.bytes_before),
            human_size(report.bytes_after),
            human_size(report.saved_bytes())
        ));
        for failure in report.records.iter().filter(|r| r.outcome.is_failed()) {
            out.warn(&format!("[WARN] {failure}"));
        }

        current = report.output.clone();
        if index + 1 < total {
            intermediates.push(current.clone());
        }
        reports.push(report);
    }

    if total > 0 {
        current = finalize_name(&mut out, input, current);
        if let Some(dir) = &config.output_directory {
            current = relocate(&mut out, dir, current);
        }

        if !config.keep_backup {
            for backup in &backups {
                remove_artifact(&mut out, backup, &current, "backup");
            }
        }
        for intermediate in &intermediates {
            remove_artifact(&mut out, intermediate, &current, "intermediate");
        }
        for log_file in &log_files {
            remove_artifact(&mut out, log_file, &current, "log");
        }
    }

    let final_bytes = fs::metadata(&current)?.len();
    out.sink.set_status("Done", Some(100.0));
    out.info(&format!(
        "[INFO] pipeline finished: {}",
        current.display()
    ));
    out.sink.on_finished(&current);

    Ok(RunReport {
        input: input.to_path_buf(),
        final_path: current,
        original_bytes,
        final_bytes,
        stages: reports,
    })
}

/// Rename the last stage output to `<original-stem>_slimmed<ext>`, disambiguated with `(n)`.
fn finalize_name(out: &mut Reporter<'_>, input: &Path, current: PathBuf) -> PathBuf {
    let (stem, _) = split_file_name(input);
    let (_, ext) = split_file_name(&current);
    let desired = unique_path(
        parent_dir_or_dot(&current),
        &format!("{stem}{FINAL_SUFFIX}"),
        &ext,
        Some(&current),
    );
    if desired == current {
        return current;
    }
    match move_file(&current, &desired) {
        Ok(()) => {
            out.detail(&format!(
                "[INFO] renamed {} -> {}",
                file_label(&current),
                file_label(&desired)
            ));
            desired
        }
        Err(err) => {
            out.warn(&format!("[WARN] final rename failed: {err}"));
            current
        }
    }
}

fn relocate(out: &mut Reporter<'_>, dir: &Path, current: PathBuf) -> PathBuf {
    if let Err(err) = fs::create_dir_all(dir) {
        out.warn(&format!(
            "[WARN] cannot create output directory {}: {err}",
            dir.display()
        ));
        return current;
    }
    let same_dir = match (
        fs::canonicalize(dir),
        fs::canonicalize(parent_dir_or_dot(&current)),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if same_dir {
        return current;
    }

    let (stem, ext) = split_file_name(&current);
    let target = unique_path(dir, &stem, &ext, None);
    match move_file(&current, &target) {
        Ok(()) => {
            out.info(&format!(
                "[INFO] moved {} -> {}",
                current.display(),
                target.display()
            ));
            target
        }
        Err(err) => {
            out.warn(&format!(
                "[WARN] move to {} failed: {err}",
                dir.display()
            ));
            current
        }
    }
}

fn remove_artifact(out: &mut Reporter<'_>, path: &Path, keep: &Path, kind: &str) {
    if path == keep {
        return;
    }
    match remove_file_if_exists(path) {
        Ok(true) => out.detail(&format!("[INFO] removed {kind}: {}", path.display())),
        Ok(false) => {}
        Err(err) => out.warn(&format!(
            "[WARN] failed to remove {kind} {}: {err}",
            path.display()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Cursor, Write};

    use zip::write::FileOptions;
    use zip::ZipWriter;

    use crate::config::StageSelection;

    #[derive(Default)]
    struct Recorder {
        messages: Vec<String>,
        statuses: Vec<(String, Option<f32>)>,
        errors: Vec<(String, String)>,
        revealed: Vec<PathBuf>,
        finished: Option<PathBuf>,
    }

    impl ProgressSink for Recorder {
        fn log(&mut self, message: &str) {
            self.messages.push(message.to_string());
        }
        fn set_status(&mut self, label: &str, percent: Option<f32>) {
            self.statuses.push((label.to_string(), percent));
        }
        fn show_error(&mut self, title: &str, message: &str) {
            self.errors.push((title.to_string(), message.to_string()));
        }
        fn on_finished(&mut self, final_path: &Path) {
            self.finished = Some(final_path.to_path_buf());
        }
        fn reveal(&mut self, path: &Path) {
            self.revealed.push(path.to_path_buf());
        }
    }

    const CT: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/></Types>"#;

    fn write_workbook(path: &Path, defined_names: &str) {
        let workbook = format!(
            r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheets><sheet name="Sheet1" sheetId="1"/></sheets><definedNames>{defined_names}</definedNames></workbook>"#
        );
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            FileOptions::<()>::default().compression_method(zip::CompressionMethod::Stored);
        for (name, body) in [("[Content_Types].xml", CT), ("xl/workbook.xml", workbook.as_str())] {
            zip.start_file(name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        fs::write(path, zip.finish().unwrap().into_inner()).unwrap();
    }

    fn names_config() -> SlimConfig {
        SlimConfig {
            stages: StageSelection {
                clean: true,
                images: false,
                precision: false,
            },
            ..SlimConfig::default()
        }
    }

    fn dir_listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn name_cleanup_run_leaves_only_input_and_final_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("book.xlsx");
        write_workbook(
            &input,
            r#"<definedName name="Print_Area">Sheet1!$A$1</definedName><definedName name="junk">#REF!</definedName>"#,
        );
        let original = fs::read(&input).unwrap();

        let mut sink = Recorder::default();
        let report = run_pipeline(&input, &names_config(), &mut sink).unwrap();

        assert_eq!(report.final_path, dir.path().join("book_slimmed.xlsx"));
        assert_eq!(dir_listing(dir.path()), vec!["book.xlsx", "book_slimmed.xlsx"]);
        assert_eq!(fs::read(&input).unwrap(), original);
        assert_eq!(report.stages[0].summary, "total=2, kept=1, removed=1");
        assert_eq!(sink.finished.as_deref(), Some(report.final_path.as_path()));
        assert_eq!(sink.statuses.first().unwrap().1, Some(0.0));
        assert_eq!(sink.statuses.last().unwrap(), &("Done".to_string(), Some(100.0)));
    }

    #[test]
    fn keep_backup_keeps_the_backup() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("book.xlsx");
        write_workbook(&input, r#"<definedName name="junk">1</definedName>"#);
        let config = SlimConfig {
            keep_backup: true,
            ..names_config()
        };
        run_pipeline(&input, &config, &mut NullSink).unwrap();
        assert_eq!(
            dir_listing(dir.path()),
            vec!["book.xlsx", "book_backup.xlsx", "book_slimmed.xlsx"]
        );
    }

    #[test]
    fn unsupported_extension_fails_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("book.csv");
        fs::write(&input, b"a,b").unwrap();
        let mut sink = Recorder::default();
        let err = run_pipeline(&input, &names_config(), &mut sink).unwrap_err();
        assert!(matches!(err, SlimError::UnsupportedFormat { .. }));
        assert_eq!(sink.errors.len(), 1);
        assert_eq!(dir_listing(dir.path()), vec!["book.csv"]);
    }

    #[test]
    fn missing_input_goes_through_the_error_callback() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("gone.xlsx");
        let mut sink = Recorder::default();

        let err = run_pipeline(&input, &names_config(), &mut sink).unwrap_err();

        assert!(matches!(err, SlimError::Io(_)), "{err:?}");
        assert_eq!(sink.statuses, vec![("Error".to_string(), None)]);
        assert_eq!(sink.errors.len(), 1);
        assert_eq!(sink.errors[0].0, "Cannot read input");
        assert!(sink.finished.is_none());
        assert!(dir_listing(dir.path()).is_empty());
    }

    #[test]
    fn corrupt_input_is_a_stage_failure_with_error_callback() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("book.xlsx");
        fs::write(&input, b"not a zip").unwrap();
        let mut sink = Recorder::default();
        let err = run_pipeline(&input, &names_config(), &mut sink).unwrap_err();
        match &err {
            SlimError::StageFailure { stage, source } => {
                assert_eq!(*stage, Stage::NameCleanup);
                assert!(matches!(**source, SlimError::CorruptArchive(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(sink.statuses.last().unwrap().1, None);
        assert!(sink.errors[0].1.starts_with("name-cleanup stage failed"));
        assert!(sink.finished.is_none());
        assert!(sink.revealed.is_empty());
    }

    #[test]
    fn minimal_verbosity_hides_detail_lines() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("book.xlsx");
        write_workbook(&input, r#"<definedName name="junk">1</definedName>"#);
        let config = SlimConfig {
            log_verbosity: LogVerbosity::Minimal,
            ..names_config()
        };
        let mut sink = Recorder::default();
        run_pipeline(&input, &config, &mut sink).unwrap();
        assert!(sink.messages.iter().all(|m| !m.starts_with(" - ")));
        assert!(sink.messages.iter().any(|m| m.starts_with("[1/1]")));
    }

    #[test]
    fn no_stages_reports_the_untouched_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("book.xlsx");
        write_workbook(&input, "");
        let config = SlimConfig {
            stages: StageSelection {
                clean: false,
                images: false,
                precision: false,
            },
            ..SlimConfig::default()
        };
        let report = run_pipeline(&input, &config, &mut NullSink).unwrap();
        assert_eq!(report.final_path, input);
        assert!(report.stages.is_empty());
        assert_eq!(dir_listing(dir.path()), vec!["book.xlsx"]);
    }
}

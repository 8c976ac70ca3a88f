//! Filesystem helpers shared by the slimming pipeline and its front-ends.
//!
//! Two concerns live here:
//! - atomic writes: data goes to a temp file in the destination directory, is flushed and
//!   synced, then renamed into place, so a reader never observes a half-written workbook and a
//!   failed write never clobbers an existing file;
//! - output naming: `<stem><suffix><ext>` siblings with `(1)`, `(2)`, ... disambiguation so a
//!   run never overwrites an earlier output.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

#[derive(Debug)]
pub enum AtomicWriteError<E> {
    Io(io::Error),
    Writer(E),
}

impl<E> From<io::Error> for AtomicWriteError<E> {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl<E: std::fmt::Display> std::fmt::Display for AtomicWriteError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AtomicWriteError::Io(err) => write!(f, "io error: {err}"),
            AtomicWriteError::Writer(err) => write!(f, "write error: {err}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AtomicWriteError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AtomicWriteError::Io(err) => Some(err),
            AtomicWriteError::Writer(err) => Some(err),
        }
    }
}

impl AtomicWriteError<io::Error> {
    /// Collapse the two arms when the writer itself only produces `io::Error`s.
    pub fn into_io(self) -> io::Error {
        match self {
            AtomicWriteError::Io(err) | AtomicWriteError::Writer(err) => err,
        }
    }
}

/// `Path::parent` returns `Some("")` for bare names like `book.xlsx`; treat that as `.`.
pub fn parent_dir_or_dot(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Atomically write `dest` through `write_fn`.
///
/// The closure receives a temp file created next to `dest`. When it returns `Err`, the temp file
/// is removed and `dest` is left exactly as it was.
pub fn atomic_write<T, E>(
    dest: impl AsRef<Path>,
    write_fn: impl FnOnce(&mut File) -> Result<T, E>,
) -> Result<T, AtomicWriteError<E>> {
    let dest = dest.as_ref();
    let dir = parent_dir_or_dot(dest);
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    let out = write_fn(tmp.as_file_mut()).map_err(AtomicWriteError::Writer)?;

    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;

    let tmp_path = tmp.into_temp_path();
    replace_file(tmp_path.as_ref(), dest)?;
    // The rename already happened; a failed directory sync is not a failed write.
    let _ = sync_parent_dir(dest);

    Ok(out)
}

/// Atomically write a full byte slice to `dest`.
pub fn atomic_write_bytes(dest: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    atomic_write(dest, |file| file.write_all(bytes)).map_err(AtomicWriteError::into_io)
}

/// Copy `src` to `dest` without ever exposing a partial `dest`.
pub fn copy_atomic(src: impl AsRef<Path>, dest: impl AsRef<Path>) -> io::Result<u64> {
    let src = src.as_ref();
    atomic_write(dest, |file| {
        let mut input = File::open(src)?;
        io::copy(&mut input, file)
    })
    .map_err(AtomicWriteError::into_io)
}

/// Move `from` to `to`.
///
/// Tries a plain rename first; across filesystems it falls back to an atomic copy and only
/// removes `from` once the copy is fully in place.
pub fn move_file(from: impl AsRef<Path>, to: impl AsRef<Path>) -> io::Result<()> {
    let (from, to) = (from.as_ref(), to.as_ref());
    if let Some(dir) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_atomic(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Remove a file, treating "already gone" as success. Returns whether a file was removed.
pub fn remove_file_if_exists(path: impl AsRef<Path>) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

fn sync_parent_dir(path: &Path) -> io::Result<()> {
    // Opening a directory as a file works on most Unix platforms; elsewhere this may fail and
    // callers treat it as best-effort.
    File::open(parent_dir_or_dot(path))?.sync_all()
}

fn replace_file(from: &Path, to: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt as _;
        use windows_sys::Win32::Storage::FileSystem::{MoveFileExW, MOVEFILE_REPLACE_EXISTING};

        fn to_wide_null(path: &Path) -> Vec<u16> {
            let mut wide: Vec<u16> = path.as_os_str().encode_wide().collect();
            wide.push(0);
            wide
        }

        let from_w = to_wide_null(from);
        let to_w = to_wide_null(to);
        let ok = unsafe { MoveFileExW(from_w.as_ptr(), to_w.as_ptr(), MOVEFILE_REPLACE_EXISTING) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(windows))]
    {
        fs::rename(from, to)
    }
}

/// Split a path's file name into `(stem, extension)`, the extension keeping its leading dot.
///
/// `book.xlsx` → `("book", ".xlsx")`, `archive.tar.gz` → `("archive.tar", ".gz")`,
/// `README` → `("README", "")`.
pub fn split_file_name(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

/// First free path among `dir/<stem><ext>`, `dir/<stem>(1)<ext>`, `dir/<stem>(2)<ext>`, ...
///
/// A candidate equal to `reserved` counts as free: callers pass the file they are about to
/// rename so that renaming a file onto its own name is not "disambiguated" away.
pub fn unique_path(dir: &Path, stem: &str, ext: &str, reserved: Option<&Path>) -> PathBuf {
    let is_free = |candidate: &Path| reserved == Some(candidate) || !candidate.exists();

    let first = dir.join(format!("{stem}{ext}"));
    if is_free(&first) {
        return first;
    }
    let mut idx: u32 = 1;
    loop {
        let candidate = dir.join(format!("{stem}({idx}){ext}"));
        if is_free(&candidate) {
            return candidate;
        }
        idx += 1;
    }
}

/// [`unique_path`] for a `<stem><suffix><ext>` sibling of `path`.
pub fn unique_sibling_with_suffix(path: &Path, suffix: &str, reserved: Option<&Path>) -> PathBuf {
    let (stem, ext) = split_file_name(path);
    unique_path(parent_dir_or_dot(path), &format!("{stem}{suffix}"), &ext, reserved)
}

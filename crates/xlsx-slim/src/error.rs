use std::path::PathBuf;

use crate::pipeline::Stage;

#[derive(Debug, thiserror::Error)]
pub enum SlimError {
    #[error("unsupported file format: {} (expected .xlsx or .xlsm)", path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),
    #[error("{stage} stage failed: {source}")]
    StageFailure {
        stage: Stage,
        #[source]
        source: Box<SlimError>,
    },
    #[error("{0} support is not compiled into this build")]
    MissingCapability(&'static str),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
}

impl SlimError {
    pub(crate) fn stage(stage: Stage, source: SlimError) -> Self {
        Self::StageFailure {
            stage,
            source: Box::new(source),
        }
    }
}

impl From<slim_fs::AtomicWriteError<SlimError>> for SlimError {
    fn from(err: slim_fs::AtomicWriteError<SlimError>) -> Self {
        match err {
            slim_fs::AtomicWriteError::Io(err) => Self::Io(err),
            slim_fs::AtomicWriteError::Writer(err) => err,
        }
    }
}

/// Failure to re-encode a single media asset. Recorded per asset; never aborts a run.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[cfg(feature = "images")]
    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image codecs are not compiled into this build")]
    CodecUnavailable,
    #[error("cannot rename {from} to {to}: name already taken")]
    NameTaken { from: String, to: String },
}

/// A part the reference synchronizer could not rewrite. The part is left unchanged.
#[derive(Debug, thiserror::Error)]
#[error("failed to patch references in {part}: {source}")]
pub struct ReferencePatchError {
    pub part: String,
    #[source]
    pub source: SlimError,
}

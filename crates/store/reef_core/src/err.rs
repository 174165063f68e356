use reef_fs::FsError;
use reef_pack::PackError;

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to decode object metadata: {0}")]
    Meta(#[from] PackError),

    #[error("unsupported object-metadata version {0}")]
    MetaVersion(u8),

    #[error("no available mountpath for {0:?}")]
    NoMountpaths(String),

    #[error("object {0:?} not found")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl CoreError {
    pub fn other(msg: impl std::fmt::Display) -> Self {
        Self::Other(msg.to_string())
    }
}

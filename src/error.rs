use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Decode step during which an image read happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Access,
    Superblock,
    GroupDescriptors,
    BlockBitmap { group: usize },
    InodeBitmap { group: usize },
    Extension(&'static str),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Access => write!(f, "image access"),
            Stage::Superblock => write!(f, "superblock"),
            Stage::GroupDescriptors => write!(f, "group descriptor table"),
            Stage::BlockBitmap { group } => write!(f, "block bitmap of group {}", group),
            Stage::InodeBitmap { group } => write!(f, "inode bitmap of group {}", group),
            Stage::Extension(name) => write!(f, "{} pass", name),
        }
    }
}

#[derive(Debug, Error)]
pub enum Ext2Error {
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("failure opening the disk image {}: {source}", .path.display())]
    ImageOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failure reading {stage}: need {needed} bytes at offset {offset:#x}, got {read}")]
    TruncatedImage {
        stage: Stage,
        offset: u64,
        needed: usize,
        read: usize,
    },

    #[error("failure reading {stage} at offset {offset:#x}: {source}")]
    Io {
        stage: Stage,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("invalid filesystem: {0}")]
    InvalidFilesystem(String),

    #[error("failure writing {}: {source}", .path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Ext2Error {
    /// Re-tag a read failure with the decode step that issued it.
    pub fn during(self, stage: Stage) -> Self {
        match self {
            Ext2Error::TruncatedImage {
                offset,
                needed,
                read,
                ..
            } => Ext2Error::TruncatedImage {
                stage,
                offset,
                needed,
                read,
            },
            Ext2Error::Io { offset, source, .. } => Ext2Error::Io {
                stage,
                offset,
                source,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Ext2Error>;

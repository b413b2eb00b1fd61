use std::path::PathBuf;

/// Errors surfaced by `retrocap-core`'s constructive operations
/// (settings validation, metadata load/save). Producer-facing hot path
/// operations elsewhere in the workspace keep boolean returns; this crate
/// only exposes configuration and persistence paths, which are not hot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown video codec '{0}'")]
    UnknownVideoCodec(String),

    #[error("unknown audio codec '{0}'")]
    UnknownAudioCodec(String),

    #[error("unknown preset '{0}'")]
    UnknownPreset(String),

    #[error("unknown container '{0}'")]
    UnknownContainer(String),

    #[error("unknown h265 profile '{0}'")]
    UnknownH265Profile(String),

    #[error("unknown h265 level '{0}'")]
    UnknownH265Level(String),

    #[error("failed to read metadata file {path}: {source}")]
    MetadataRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write metadata file {path}: {source}")]
    MetadataWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse metadata file {path}: {source}")]
    MetadataParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no recording found with id '{0}'")]
    UnknownRecording(String),
}

use std::path::PathBuf;

/// Errors from the constructive operations of the pipeline: building an
/// encoder, opening a muxer sink, starting a recording. The hot-path
/// producer operations (`push_frame`, `push_audio`, `encode_video`,
/// `encode_audio`, `mux_packet`) keep the spec's boolean-return failure
/// signaling instead of this type — see §7.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("video codec '{0}' is not available in this ffmpeg build")]
    VideoCodecUnavailable(&'static str),

    #[error("audio codec '{0}' is not available in this ffmpeg build")]
    AudioCodecUnavailable(&'static str),

    #[error("container format '{0}' is not available in this ffmpeg build")]
    ContainerUnavailable(&'static str),

    #[error("ffmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_the_third::Error),

    #[error("already recording")]
    AlreadyRecording,

    #[error("not recording")]
    NotRecording,

    #[error("failed to create output directory {path}: {source}")]
    CreateOutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open output sink {path}: {source}")]
    OpenSink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] retrocap_core::Error),
}

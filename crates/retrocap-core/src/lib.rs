//! Plain data types, settings parsing and the on-disk metadata registry for
//! the retrocap media pipeline. No FFmpeg and no threading live here; see
//! `retrocap-pipeline` for the synchronizer, encoder, muxer and recorder.

pub mod error;
pub mod metadata;
pub mod settings;
pub mod types;

pub use error::Error;
pub use metadata::{MetadataRegistry, RecordingMetadata};
pub use settings::{RawRecordingSettings, RecordingSettings};
pub use types::{
    AudioChunk, AudioCodecKind, AudioConfig, Container, EncodedPacket, H265Level, H265Profile,
    Preset, SyncZone, VideoCodecKind, VideoConfig, VideoFrame, NO_TIMESTAMP,
};

// crates/retrocap-core/src/types.rs
//
// Plain data shared across retrocap-pipeline's internal module boundaries and,
// potentially, an embedding application. No FFmpeg, no threading — just types.

use std::sync::Arc;

/// Sentinel used by `EncodedPacket` to mean "no timestamp available",
/// mirroring FFmpeg's `AV_NOPTS_VALUE` convention at the type's own boundary.
pub const NO_TIMESTAMP: i64 = -1;

/// A captured video frame with its RGB24 payload and capture timestamp.
///
/// `buffer` is `width * height * 3` bytes; violating that invariant is
/// rejected at the producer boundary (`Synchronizer::push_video`), never
/// constructed here.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub buffer: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub capture_timestamp_us: i64,
    pub processed: bool,
}

impl VideoFrame {
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }
}

/// A captured interleaved S16 audio chunk with its capture timestamp.
#[derive(Clone, Debug)]
pub struct AudioChunk {
    pub samples: Arc<[i16]>,
    pub sample_count: usize,
    pub capture_timestamp_us: i64,
    pub duration_us: i64,
    pub processed: bool,
}

impl AudioChunk {
    /// `sample_count` is the *total* sample count across all channels.
    pub fn duration_us(sample_count: usize, sample_rate: u32, channels: u32) -> i64 {
        if sample_rate == 0 || channels == 0 {
            return 0;
        }
        (sample_count as i64 * 1_000_000) / (sample_rate as i64 * channels as i64)
    }
}

/// An immutable descriptor of the temporal window over which video and audio
/// buffers have content that can be muxed together.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyncZone {
    pub start_us: i64,
    pub end_us: i64,
    pub video_start_idx: usize,
    pub video_end_idx: usize,
    pub audio_start_idx: usize,
    pub audio_end_idx: usize,
}

impl SyncZone {
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.start_us < self.end_us
            && self.video_end_idx > self.video_start_idx
            && self.audio_end_idx > self.audio_start_idx
    }
}

/// Video codecs recognized by `RecordingSettings::codec`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoCodecKind {
    H264,
    H265,
    Vp8,
    Vp9,
}

impl VideoCodecKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "h264" => Some(Self::H264),
            "h265" => Some(Self::H265),
            "vp8" => Some(Self::Vp8),
            "vp9" => Some(Self::Vp9),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
        }
    }

    /// Whether this codec emits out-of-band decoder configuration
    /// (`extradata`) that must be carried into container stream parameters.
    pub fn is_global_header(self) -> bool {
        matches!(self, Self::H265 | Self::Vp8 | Self::Vp9)
    }
}

/// x264/x265 encoder speed presets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Preset {
    UltraFast,
    SuperFast,
    VeryFast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    VerySlow,
}

impl Preset {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "ultrafast" => Self::UltraFast,
            "superfast" => Self::SuperFast,
            "veryfast" => Self::VeryFast,
            "faster" => Self::Faster,
            "fast" => Self::Fast,
            "medium" => Self::Medium,
            "slow" => Self::Slow,
            "slower" => Self::Slower,
            "veryslow" => Self::VerySlow,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UltraFast => "ultrafast",
            Self::SuperFast => "superfast",
            Self::VeryFast => "veryfast",
            Self::Faster => "faster",
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Slower => "slower",
            Self::VerySlow => "veryslow",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum H265Profile {
    Main,
    Main10,
}

impl H265Profile {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "main" => Some(Self::Main),
            "main10" => Some(Self::Main10),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Main10 => "main10",
        }
    }
}

/// H.265 level, parsed from the dotted strings in `RecordingSettings::h265_level`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum H265Level {
    Auto,
    L1,
    L2,
    L2_1,
    L3,
    L3_1,
    L4,
    L4_1,
    L5,
    L5_1,
    L5_2,
    L6,
    L6_1,
    L6_2,
}

impl H265Level {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "auto" => Self::Auto,
            "1" => Self::L1,
            "2" => Self::L2,
            "2.1" => Self::L2_1,
            "3" => Self::L3,
            "3.1" => Self::L3_1,
            "4" => Self::L4,
            "4.1" => Self::L4_1,
            "5" => Self::L5,
            "5.1" => Self::L5_1,
            "5.2" => Self::L5_2,
            "6" => Self::L6,
            "6.1" => Self::L6_1,
            "6.2" => Self::L6_2,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::L1 => "1",
            Self::L2 => "2",
            Self::L2_1 => "2.1",
            Self::L3 => "3",
            Self::L3_1 => "3.1",
            Self::L4 => "4",
            Self::L4_1 => "4.1",
            Self::L5 => "5",
            Self::L5_1 => "5.1",
            Self::L5_2 => "5.2",
            Self::L6 => "6",
            Self::L6_1 => "6.1",
            Self::L6_2 => "6.2",
        }
    }
}

/// Codec-specific knobs live alongside the common fields; fields that don't
/// apply to `codec` are ignored rather than rejected (spec §3).
#[derive(Clone, Debug)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
    pub codec: VideoCodecKind,
    pub preset: Preset,
    pub h265_profile: H265Profile,
    pub h265_level: H265Level,
    pub vp8_speed: i32,
    pub vp9_speed: i32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 60,
            bitrate: 8_000_000,
            codec: VideoCodecKind::H264,
            preset: Preset::VeryFast,
            h265_profile: H265Profile::Main,
            h265_level: H265Level::Auto,
            vp8_speed: 12,
            vp9_speed: 6,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioCodecKind {
    Aac,
    Mp3,
    Opus,
}

impl AudioCodecKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aac" => Some(Self::Aac),
            "mp3" => Some(Self::Mp3),
            "opus" => Some(Self::Opus),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aac => "aac",
            Self::Mp3 => "mp3",
            Self::Opus => "opus",
        }
    }
}

/// `codec = None` means audio is disabled for this session.
#[derive(Clone, Debug)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate: u32,
    pub codec: Option<AudioCodecKind>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            bitrate: 128_000,
            codec: Some(AudioCodecKind::Aac),
        }
    }
}

/// A compressed frame/chunk leaving the encoder, ready for the muxer.
#[derive(Clone, Debug)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    pub pts: i64,
    pub dts: i64,
    pub is_keyframe: bool,
    pub is_video: bool,
    pub capture_timestamp_us: i64,
}

/// Output container formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Container {
    Mp4,
    Matroska,
    WebM,
    MpegTs,
    Avi,
}

impl Container {
    /// File-extension-based detection per spec §4.3.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "mp4" | "m4v" => Self::Mp4,
            "mkv" => Self::Matroska,
            "webm" => Self::WebM,
            _ => Self::Mp4,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mp4" => Some(Self::Mp4),
            "mkv" => Some(Self::Matroska),
            "avi" => Some(Self::Avi),
            "webm" => Some(Self::WebM),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Matroska => "mkv",
            Self::WebM => "webm",
            Self::MpegTs => "ts",
            Self::Avi => "avi",
        }
    }

    /// The FFmpeg muxer short name for `format::output_as`.
    pub fn format_name(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Matroska => "matroska",
            Self::WebM => "webm",
            Self::MpegTs => "mpegts",
            Self::Avi => "avi",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_from_extension_defaults_to_mp4() {
        assert_eq!(Container::from_extension("mov"), Container::Mp4);
        assert_eq!(Container::from_extension("MKV"), Container::Matroska);
        assert_eq!(Container::from_extension("webm"), Container::WebM);
    }

    #[test]
    fn audio_chunk_duration_matches_spec_formula() {
        // 44_100 Hz stereo, 1 second of samples = 88_200 interleaved samples.
        let us = AudioChunk::duration_us(88_200, 44_100, 2);
        assert_eq!(us, 1_000_000);
    }

    #[test]
    fn sync_zone_invalid_by_default() {
        assert!(!SyncZone::invalid().is_valid());
    }

    #[test]
    fn video_codec_kind_round_trips_through_str() {
        for kind in [
            VideoCodecKind::H264,
            VideoCodecKind::H265,
            VideoCodecKind::Vp8,
            VideoCodecKind::Vp9,
        ] {
            assert_eq!(VideoCodecKind::parse(kind.as_str()), Some(kind));
        }
    }
}

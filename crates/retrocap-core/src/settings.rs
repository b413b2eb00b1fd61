use crate::error::Error;
use crate::types::{
    AudioCodecKind, Container, H265Level, H265Profile, Preset, VideoCodecKind,
};

/// Parameters for `Recorder::start`. Every enumerated field is validated at
/// construction via `RecordingSettings::parse`; callers who already have
/// parsed enum values can build the struct directly.
#[derive(Clone, Debug)]
pub struct RecordingSettings {
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

    pub audio_bitrate: u32,
    pub audio_codec: AudioCodecKind,

    pub container: Container,

    pub output_path: String,
    pub filename_template: String,

    pub include_audio: bool,
    pub auto_start: bool,
    pub max_duration_us: u64,
    pub max_file_size: u64,
}

impl Default for RecordingSettings {
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
            audio_bitrate: 256_000,
            audio_codec: AudioCodecKind::Aac,
            container: Container::Mp4,
            output_path: String::from("."),
            filename_template: String::from("rec_%Y%m%d_%H%M%S"),
            include_audio: true,
            auto_start: false,
            max_duration_us: 0,
            max_file_size: 0,
        }
    }
}

/// Raw, string-keyed settings as they arrive from an embedding application
/// (e.g. deserialized from a preset file). `RecordingSettings::parse`
/// validates every enumerated option and rejects anything unrecognized,
/// per spec §6 ("every field is an enumerated recognized option").
#[derive(Clone, Debug, Default)]
pub struct RawRecordingSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
    pub codec: String,
    pub preset: String,
    pub h265_profile: String,
    pub h265_level: String,
    pub vp8_speed: i32,
    pub vp9_speed: i32,
    pub audio_bitrate: u32,
    pub audio_codec: String,
    pub container: String,
    pub output_path: String,
    pub filename_template: String,
    pub include_audio: bool,
    pub auto_start: bool,
    pub max_duration_us: u64,
    pub max_file_size: u64,
}

impl RecordingSettings {
    pub fn parse(raw: &RawRecordingSettings) -> Result<Self, Error> {
        let codec = VideoCodecKind::parse(&raw.codec)
            .ok_or_else(|| Error::UnknownVideoCodec(raw.codec.clone()))?;
        let preset =
            Preset::parse(&raw.preset).ok_or_else(|| Error::UnknownPreset(raw.preset.clone()))?;
        let h265_profile = H265Profile::parse(&raw.h265_profile)
            .ok_or_else(|| Error::UnknownH265Profile(raw.h265_profile.clone()))?;
        let h265_level = H265Level::parse(&raw.h265_level)
            .ok_or_else(|| Error::UnknownH265Level(raw.h265_level.clone()))?;
        let audio_codec = AudioCodecKind::parse(&raw.audio_codec)
            .ok_or_else(|| Error::UnknownAudioCodec(raw.audio_codec.clone()))?;
        let container = Container::parse(&raw.container)
            .ok_or_else(|| Error::UnknownContainer(raw.container.clone()))?;

        Ok(Self {
            width: raw.width,
            height: raw.height,
            fps: raw.fps,
            bitrate: raw.bitrate,
            codec,
            preset,
            h265_profile,
            h265_level,
            vp8_speed: raw.vp8_speed.clamp(0, 16),
            vp9_speed: raw.vp9_speed.clamp(0, 9),
            audio_bitrate: raw.audio_bitrate,
            audio_codec,
            container,
            output_path: raw.output_path.clone(),
            filename_template: raw.filename_template.clone(),
            include_audio: raw.include_audio,
            auto_start: raw.auto_start,
            max_duration_us: raw.max_duration_us,
            max_file_size: raw.max_file_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_defaults() -> RawRecordingSettings {
        RawRecordingSettings {
            width: 1280,
            height: 720,
            fps: 60,
            bitrate: 8_000_000,
            codec: "h264".into(),
            preset: "veryfast".into(),
            h265_profile: "main".into(),
            h265_level: "auto".into(),
            vp8_speed: 12,
            vp9_speed: 6,
            audio_bitrate: 256_000,
            audio_codec: "aac".into(),
            container: "mp4".into(),
            output_path: "/tmp".into(),
            filename_template: "rec_%Y".into(),
            include_audio: true,
            auto_start: false,
            max_duration_us: 0,
            max_file_size: 0,
        }
    }

    #[test]
    fn parses_well_formed_settings() {
        let parsed = RecordingSettings::parse(&raw_defaults()).unwrap();
        assert_eq!(parsed.codec, VideoCodecKind::H264);
        assert_eq!(parsed.container, Container::Mp4);
    }

    #[test]
    fn rejects_unknown_codec() {
        let mut raw = raw_defaults();
        raw.codec = "divx".into();
        assert!(matches!(
            RecordingSettings::parse(&raw),
            Err(Error::UnknownVideoCodec(_))
        ));
    }

    #[test]
    fn clamps_vpx_speed_into_range() {
        let mut raw = raw_defaults();
        raw.codec = "vp9".into();
        raw.vp9_speed = 99;
        let parsed = RecordingSettings::parse(&raw).unwrap();
        assert_eq!(parsed.vp9_speed, 9);
    }
}

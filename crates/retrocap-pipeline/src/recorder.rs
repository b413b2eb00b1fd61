use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Local;

use retrocap_core::{
    AudioConfig, Container, MetadataRegistry, RecordingMetadata, RecordingSettings, VideoConfig,
};

use crate::encoder::Encoder;
use crate::log_throttle::LogThrottle;
use crate::muxer::{Muxer, Sink};
use crate::sync::{Synchronizer, SynchronizerConfig};
use crate::thumbnail;
use crate::PipelineError;

const CLEANUP_INTERVAL: u64 = 10;
const BACKLOG_VIDEO_THRESHOLD: usize = 5;
const BACKLOG_AUDIO_THRESHOLD: usize = 10;
const STATUS_LOG_INTERVAL: u64 = 100;

/// Orchestrates one Encoder + one Muxer + one bounded Synchronizer against a
/// filesystem sink, and owns the background encoding thread (C4).
pub struct Recorder {
    registry_path: PathBuf,
    registry: Mutex<MetadataRegistry>,

    running: Arc<AtomicBool>,
    recording: Arc<AtomicBool>,
    stop_request: Arc<AtomicBool>,

    thread: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<RecorderShared>,

    audio_sample_rate: AtomicU64,
    audio_channels: AtomicU64,

    /// Fixed zero-point for `now_us()`. `Instant` has no absolute meaning of
    /// its own, so every capture timestamp in this crate is relative to the
    /// single instant captured here rather than to wall-clock time, which can
    /// jump backward under NTP adjustment.
    epoch: Instant,
}

struct RecorderShared {
    synchronizer: Synchronizer,
    current_filename: Mutex<Option<String>>,
    current_duration_us: AtomicI64,
    current_file_size: AtomicU64,
    start_ts_us: AtomicI64,
    frame_push_log: LogThrottle,
    audio_push_log: LogThrottle,
}

impl Recorder {
    pub fn new(registry_path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let registry_path = registry_path.into();
        let registry = MetadataRegistry::load(&registry_path)?;

        Ok(Self {
            registry_path,
            registry: Mutex::new(registry),
            running: Arc::new(AtomicBool::new(false)),
            recording: Arc::new(AtomicBool::new(false)),
            stop_request: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
            shared: Arc::new(RecorderShared {
                synchronizer: Synchronizer::new(SynchronizerConfig::default()),
                current_filename: Mutex::new(None),
                current_duration_us: AtomicI64::new(0),
                current_file_size: AtomicU64::new(0),
                start_ts_us: AtomicI64::new(0),
                frame_push_log: LogThrottle::new(3),
                audio_push_log: LogThrottle::new(3),
            }),
            audio_sample_rate: AtomicU64::new(44_100),
            audio_channels: AtomicU64::new(2),
            epoch: Instant::now(),
        })
    }

    /// Microseconds elapsed since this `Recorder` was constructed, from a
    /// monotonic clock that cannot jump backward the way wall-clock time can.
    fn now_us(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }

    /// Must be called before the first `push_audio` to describe the input
    /// format; if never called, `44100 Hz / 2ch` is assumed (matching the
    /// original source's behavior — this is not treated as an error).
    pub fn set_audio_format(&self, sample_rate: u32, channels: u32) {
        self.audio_sample_rate.store(sample_rate as u64, Ordering::Relaxed);
        self.audio_channels.store(channels as u64, Ordering::Relaxed);
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub fn push_frame(&self, rgb: &[u8], width: u32, height: u32) -> bool {
        if !self.is_recording() {
            return false;
        }
        let ts_us = self.now_us();
        let ok = self.shared.synchronizer.push_video(rgb, width, height, ts_us);
        if !ok && self.shared.frame_push_log.should_log() {
            log::warn!("push_frame: rejected frame at {width}x{height}");
        }
        ok
    }

    pub fn push_audio(&self, samples: &[i16], include_audio: bool) -> bool {
        if !self.is_recording() || !include_audio {
            return false;
        }
        let ts_us = self.now_us();
        let sample_rate = self.audio_sample_rate.load(Ordering::Relaxed) as u32;
        let channels = self.audio_channels.load(Ordering::Relaxed) as u32;
        let ok = self
            .shared
            .synchronizer
            .push_audio(samples, ts_us, sample_rate, channels);
        if !ok && self.shared.audio_push_log.should_log() {
            log::warn!("push_audio: rejected chunk of {} samples", samples.len());
        }
        ok
    }

    pub fn current_duration_us(&self) -> i64 {
        self.shared.current_duration_us.load(Ordering::Relaxed)
    }

    pub fn current_file_size(&self) -> u64 {
        self.shared.current_file_size.load(Ordering::Relaxed)
    }

    pub fn current_filename(&self) -> Option<String> {
        self.shared.current_filename.lock().unwrap().clone()
    }

    pub fn list_recordings(&self) -> Vec<RecordingMetadata> {
        self.registry.lock().unwrap().list().to_vec()
    }

    pub fn delete_recording(&self, id: &str) -> Result<(), PipelineError> {
        self.registry.lock().unwrap().delete(id)?;
        Ok(())
    }

    pub fn rename_recording(&self, id: &str, new_name: &str) -> Result<(), PipelineError> {
        self.registry.lock().unwrap().rename(id, new_name)?;
        Ok(())
    }

    pub fn recording_path(&self, id: &str) -> Option<String> {
        self.registry.lock().unwrap().recording_path(id)
    }

    /// Builds the output path, creates the metadata shell, resets the
    /// synchronizer, initializes encoder + muxer, and spawns the encoding
    /// thread. Tears down everything already built on any step's failure.
    pub fn start(&self, settings: RecordingSettings) -> Result<(), PipelineError> {
        if self.is_recording() {
            return Err(PipelineError::AlreadyRecording);
        }

        let filename = generate_filename(&settings.filename_template, settings.container);
        let output_dir = PathBuf::from(&settings.output_path);
        std::fs::create_dir_all(&output_dir).map_err(|source| PipelineError::CreateOutputDir {
            path: output_dir.clone(),
            source,
        })?;
        let output_path = output_dir.join(&filename);

        let video_cfg = VideoConfig {
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
            bitrate: settings.bitrate,
            codec: settings.codec,
            preset: settings.preset,
            h265_profile: settings.h265_profile,
            h265_level: settings.h265_level,
            vp8_speed: settings.vp8_speed,
            vp9_speed: settings.vp9_speed,
        };
        let audio_cfg = if settings.include_audio {
            Some(AudioConfig {
                sample_rate: self.audio_sample_rate.load(Ordering::Relaxed) as u32,
                channels: self.audio_channels.load(Ordering::Relaxed) as u32,
                bitrate: settings.audio_bitrate,
                codec: Some(settings.audio_codec),
            })
        } else {
            None
        };

        let metadata = RecordingMetadata::new_shell(
            filename.clone(),
            output_path.to_string_lossy().into_owned(),
            settings.container.extension().to_string(),
            settings.codec.as_str().to_string(),
            if settings.include_audio {
                settings.audio_codec.as_str().to_string()
            } else {
                String::new()
            },
            settings.width,
            settings.height,
            settings.fps,
        );

        self.shared.synchronizer.clear();
        self.shared.synchronizer.set_max_video_buffer_size(10);
        self.shared.synchronizer.set_max_audio_buffer_size(20);
        self.shared.synchronizer.set_max_buffer_time_us(5_000_000);
        self.shared.synchronizer.set_sync_tolerance_us(50_000);

        let mut encoder = Encoder::init(video_cfg.clone(), audio_cfg.clone())?;

        let muxer_result = (|| -> Result<Muxer, PipelineError> {
            let video_ctx = encoder.video_context().expect("encoder just initialized video");
            let audio_ctx = encoder.audio_context();
            Muxer::init(
                Sink::File(output_path.clone()),
                settings.container,
                &video_cfg,
                video_ctx,
                audio_cfg.as_ref(),
                audio_ctx,
            )
        })();

        let muxer = match muxer_result {
            Ok(m) => m,
            Err(e) => {
                encoder.cleanup();
                return Err(e);
            }
        };

        *self.shared.current_filename.lock().unwrap() = Some(filename.clone());
        self.shared.current_duration_us.store(0, Ordering::Relaxed);
        self.shared.current_file_size.store(0, Ordering::Relaxed);
        self.shared.start_ts_us.store(self.now_us(), Ordering::Relaxed);

        self.stop_request.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);
        self.recording.store(true, Ordering::Release);

        let shared = self.shared.clone();
        let running = self.running.clone();
        let stop_request = self.stop_request.clone();
        let include_audio = settings.include_audio;
        let fps = settings.fps;
        let sample_rate = audio_cfg.as_ref().map(|c| c.sample_rate).unwrap_or(0);
        let channels = audio_cfg.as_ref().map(|c| c.channels).unwrap_or(0);

        let handle = std::thread::spawn(move || {
            encoding_thread(
                shared,
                running,
                stop_request,
                encoder,
                muxer,
                include_audio,
                fps,
                sample_rate,
                channels,
            );
        });
        *self.thread.lock().unwrap() = Some(handle);

        self.registry.lock().unwrap().push(metadata)?;
        // The just-pushed shell entry is refined with final size/duration/
        // thumbnail at `stop()` — see `finalize_current_recording`.

        Ok(())
    }

    /// Stops the encoding thread, flushes and finalizes the muxer, updates
    /// the registry entry with the final file size and duration, and kicks
    /// off thumbnail extraction.
    pub fn stop(&self) -> Result<(), PipelineError> {
        if !self.is_recording() {
            return Err(PipelineError::NotRecording);
        }

        self.stop_request.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.recording.store(false, Ordering::Release);

        let filename = self.shared.current_filename.lock().unwrap().clone();
        let Some(filename) = filename else {
            return Ok(());
        };

        let mut registry = self.registry.lock().unwrap();
        let entry = registry
            .list()
            .iter()
            .find(|r| r.filename == filename)
            .cloned();
        if let Some(mut entry) = entry {
            if let Ok(meta) = std::fs::metadata(&entry.filepath) {
                entry.file_size = meta.len();
            }
            entry.duration = self.current_duration_us() as u64;

            let thumb_path = PathBuf::from(&entry.filepath).with_extension("jpg");
            match thumbnail::extract_thumbnail(&entry.filepath, &thumb_path, 320) {
                Ok(()) => entry.thumbnail_path = Some(thumb_path.to_string_lossy().into_owned()),
                Err(e) => log::warn!("stop: thumbnail extraction failed for {filename}: {e}"),
            }

            if let Some(slot) = registry.get_mut(&entry.id) {
                *slot = entry;
            }
            let _ = registry.save();
        }

        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn encoding_thread(
    shared: Arc<RecorderShared>,
    running: Arc<AtomicBool>,
    stop_request: Arc<AtomicBool>,
    mut encoder: Encoder,
    mut muxer: Muxer,
    include_audio: bool,
    fps: u32,
    sample_rate: u32,
    channels: u32,
) {
    std::thread::sleep(Duration::from_millis(100));

    let mut cleanup_counter: u64 = 0;
    let mut iteration: u64 = 0;
    let mut logged_first_frame = false;

    while running.load(Ordering::Acquire) && !stop_request.load(Ordering::Acquire) {
        iteration += 1;
        cleanup_counter += 1;
        if cleanup_counter >= CLEANUP_INTERVAL {
            shared.synchronizer.cleanup_old_data();
            cleanup_counter = 0;
        }

        let video_size = shared.synchronizer.video_buffer_size();
        let audio_size = shared.synchronizer.audio_buffer_size();
        let has_backlog = video_size > BACKLOG_VIDEO_THRESHOLD || audio_size > BACKLOG_AUDIO_THRESHOLD;

        if iteration == 1 || iteration % STATUS_LOG_INTERVAL == 0 {
            log::debug!("encoding_thread: video_buf={video_size} audio_buf={audio_size} backlog={has_backlog}");
        }

        let mut zone = shared.synchronizer.compute_sync_zone();
        if !zone.is_valid() {
            let audio_unavailable = !include_audio || sample_rate == 0 || channels == 0;
            if audio_unavailable {
                if video_size == 0 {
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
                zone = retrocap_core::SyncZone {
                    start_us: 0,
                    end_us: 1,
                    video_start_idx: 0,
                    video_end_idx: video_size.min(2),
                    audio_start_idx: 0,
                    audio_end_idx: 1,
                };
            } else {
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
        }

        let mut processed_any = false;

        let video_frames = shared.synchronizer.get_video_frames(&zone);
        let max_video = if has_backlog { 5 } else { 2 };
        let mut packets = Vec::new();
        for frame in video_frames.iter().take(max_video) {
            if frame.processed {
                continue;
            }
            if stop_request.load(Ordering::Acquire) {
                break;
            }
            if encoder.encode_video(&frame.buffer, frame.width, frame.height, frame.capture_timestamp_us, &mut packets) {
                for packet in packets.drain(..) {
                    if !muxer.mux_packet(&packet) {
                        log::error!("encoding_thread: failed to mux video packet");
                    }
                }
                shared
                    .synchronizer
                    .mark_video_processed_by_timestamp(frame.capture_timestamp_us);
                processed_any = true;
                if !logged_first_frame {
                    log::info!("encoding_thread: first video frame encoded and muxed");
                    logged_first_frame = true;
                }
            } else {
                packets.clear();
            }
        }

        if include_audio && sample_rate > 0 && channels > 0 && zone.audio_end_idx > zone.audio_start_idx {
            let audio_chunks = shared.synchronizer.get_audio_chunks(&zone);
            let max_audio = if has_backlog { 8 } else { 3 };
            for chunk in audio_chunks.iter().take(max_audio) {
                if chunk.processed {
                    continue;
                }
                if stop_request.load(Ordering::Acquire) {
                    break;
                }
                if encoder.encode_audio(&chunk.samples, chunk.capture_timestamp_us, &mut packets) {
                    for packet in packets.drain(..) {
                        if !muxer.mux_packet(&packet) {
                            log::error!("encoding_thread: failed to mux audio packet");
                        }
                    }
                    shared
                        .synchronizer
                        .mark_audio_processed_by_timestamp(chunk.capture_timestamp_us);
                    processed_any = true;
                } else {
                    packets.clear();
                }
            }
        }

        let elapsed_us = shared.synchronizer.latest_video_timestamp()
            - shared.start_ts_us.load(Ordering::Relaxed);
        shared.current_duration_us.store(elapsed_us.max(0), Ordering::Relaxed);

        if processed_any {
            if has_backlog {
                std::thread::sleep(Duration::from_micros(100));
            } else {
                std::thread::sleep(Duration::from_micros(500_000 / fps.max(1) as u64));
            }
        } else {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    // Drain whatever remains, in case of a large backlog at stop time.
    let mut packets = Vec::new();
    encoder.flush(&mut packets);
    for packet in packets {
        let _ = muxer.mux_packet(&packet);
    }
    if let Err(e) = muxer.finalize() {
        log::error!("encoding_thread: muxer finalize failed: {e}");
    }
    encoder.cleanup();
    shared.synchronizer.clear();
}

fn generate_filename(template: &str, container: Container) -> String {
    let base = Local::now().format(template).to_string();
    format!("{base}.{}", container.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrocap_core::Container;

    #[test]
    fn generate_filename_appends_container_extension() {
        let name = generate_filename("rec_%Y", Container::Mp4);
        assert!(name.ends_with(".mp4"));
    }
}

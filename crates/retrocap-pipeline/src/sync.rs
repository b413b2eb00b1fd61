use std::collections::VecDeque;
use std::sync::Mutex;

use retrocap_core::{AudioChunk, SyncZone, VideoFrame};

use crate::log_throttle::LogThrottle;

const MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

/// Configurable caps for `Synchronizer`, with the ranges and defaults from
/// spec §4.1.
#[derive(Clone, Copy, Debug)]
pub struct SynchronizerConfig {
    pub max_video_buffer_size: usize,
    pub max_audio_buffer_size: usize,
    pub max_buffer_time_us: i64,
    pub sync_tolerance_us: i64,
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            max_video_buffer_size: 10,
            max_audio_buffer_size: 20,
            max_buffer_time_us: 5_000_000,
            sync_tolerance_us: 50_000,
        }
    }
}

impl SynchronizerConfig {
    pub fn clamped(mut self) -> Self {
        self.max_video_buffer_size = self.max_video_buffer_size.clamp(1, 50);
        self.max_audio_buffer_size = self.max_audio_buffer_size.clamp(5, 100);
        self.max_buffer_time_us = self.max_buffer_time_us.clamp(1_000_000, 30_000_000);
        self
    }
}

struct VideoState {
    buf: VecDeque<VideoFrame>,
    latest_ts: i64,
}

struct AudioState {
    buf: VecDeque<AudioChunk>,
    latest_ts: i64,
}

/// Dual bounded ring buffers for video frames and audio chunks, plus the
/// sync-zone computation that finds their temporal overlap (C1).
pub struct Synchronizer {
    config: Mutex<SynchronizerConfig>,
    video: Mutex<VideoState>,
    audio: Mutex<AudioState>,
    bad_input_log: LogThrottle,
}

impl Synchronizer {
    pub fn new(config: SynchronizerConfig) -> Self {
        Self {
            config: Mutex::new(config.clamped()),
            video: Mutex::new(VideoState {
                buf: VecDeque::new(),
                latest_ts: 0,
            }),
            audio: Mutex::new(AudioState {
                buf: VecDeque::new(),
                latest_ts: 0,
            }),
            bad_input_log: LogThrottle::new(3),
        }
    }

    pub fn set_max_video_buffer_size(&self, v: usize) {
        self.config.lock().unwrap().max_video_buffer_size = v.clamp(1, 50);
    }

    pub fn set_max_audio_buffer_size(&self, v: usize) {
        self.config.lock().unwrap().max_audio_buffer_size = v.clamp(5, 100);
    }

    pub fn set_max_buffer_time_us(&self, v: i64) {
        self.config.lock().unwrap().max_buffer_time_us = v.clamp(1_000_000, 30_000_000);
    }

    pub fn set_sync_tolerance_us(&self, v: i64) {
        self.config.lock().unwrap().sync_tolerance_us = v.max(0);
    }

    /// Copies `data` into the buffer. Rejects zero dimensions, a size
    /// mismatch against `width*height*3`, or an unreasonably large frame.
    /// When full, drops the oldest entry regardless of processed state
    /// before inserting the new one.
    pub fn push_video(&self, data: &[u8], width: u32, height: u32, ts_us: i64) -> bool {
        if width == 0 || height == 0 {
            if self.bad_input_log.should_log() {
                log::warn!("push_video: rejecting zero dimension {width}x{height}");
            }
            return false;
        }
        let expected = VideoFrame::expected_len(width, height);
        if expected == 0 || expected > MAX_FRAME_BYTES || data.len() != expected {
            if self.bad_input_log.should_log() {
                log::warn!(
                    "push_video: rejecting frame of {} bytes (expected {expected})",
                    data.len()
                );
            }
            return false;
        }

        let max_size = self.config.lock().unwrap().max_video_buffer_size;
        let mut video = self.video.lock().unwrap();
        while video.buf.len() >= max_size {
            video.buf.pop_front();
        }
        video.buf.push_back(VideoFrame {
            buffer: data.into(),
            width,
            height,
            capture_timestamp_us: ts_us,
            processed: false,
        });
        video.latest_ts = video.latest_ts.max(ts_us);
        true
    }

    /// Copies `samples` into the buffer, same full-buffer eviction policy as
    /// `push_video`.
    pub fn push_audio(
        &self,
        samples: &[i16],
        ts_us: i64,
        sample_rate: u32,
        channels: u32,
    ) -> bool {
        if samples.is_empty() || sample_rate == 0 || channels == 0 {
            if self.bad_input_log.should_log() {
                log::warn!("push_audio: rejecting empty chunk or zero format fields");
            }
            return false;
        }

        let duration_us = AudioChunk::duration_us(samples.len(), sample_rate, channels);
        if duration_us <= 0 {
            if self.bad_input_log.should_log() {
                log::warn!("push_audio: rejecting chunk with non-positive duration");
            }
            return false;
        }

        let max_size = self.config.lock().unwrap().max_audio_buffer_size;
        let mut audio = self.audio.lock().unwrap();
        while audio.buf.len() >= max_size {
            audio.buf.pop_front();
        }
        audio.buf.push_back(AudioChunk {
            samples: samples.into(),
            sample_count: samples.len(),
            capture_timestamp_us: ts_us,
            duration_us,
            processed: false,
        });
        audio.latest_ts = audio.latest_ts.max(ts_us);
        true
    }

    /// Locks video then audio, in that order — the synchronizer's only rule
    /// about holding two of its locks at once (spec §5).
    pub fn compute_sync_zone(&self) -> SyncZone {
        let tolerance = self.config.lock().unwrap().sync_tolerance_us;

        let video = self.video.lock().unwrap();
        let audio = self.audio.lock().unwrap();

        let (Some(v_first), Some(v_last)) = (video.buf.front(), video.buf.back()) else {
            return SyncZone::invalid();
        };
        let (Some(a_first), Some(a_last)) = (audio.buf.front(), audio.buf.back()) else {
            return SyncZone::invalid();
        };

        let v_start = v_first.capture_timestamp_us;
        let v_end = v_last.capture_timestamp_us;
        let a_start = a_first.capture_timestamp_us;
        let a_end = a_last.capture_timestamp_us;

        let mut zone_start = v_start.max(a_start);
        let mut zone_end = v_end.min(a_end);

        if zone_end - zone_start <= 0 {
            let gap = if v_start > a_end {
                v_start - a_end
            } else {
                a_start - v_end
            };
            if gap >= 0 && gap <= tolerance {
                zone_start = v_start.min(a_start);
                zone_end = v_end.max(a_end);
            } else {
                return SyncZone::invalid();
            }
        }

        let (video_start_idx, video_end_idx) = scan_range(video.buf.iter(), zone_start, zone_end);
        let (audio_start_idx, audio_end_idx) = scan_range(audio.buf.iter(), zone_start, zone_end);

        SyncZone {
            start_us: zone_start,
            end_us: zone_end,
            video_start_idx,
            video_end_idx,
            audio_start_idx,
            audio_end_idx,
        }
    }

    /// Returns a copy of `[zone.video_start_idx, zone.video_end_idx)`,
    /// sorted ascending by capture timestamp — required because producers
    /// may deliver frames out of order under thread scheduling.
    pub fn get_video_frames(&self, zone: &SyncZone) -> Vec<VideoFrame> {
        let video = self.video.lock().unwrap();
        let mut frames: Vec<VideoFrame> = video
            .buf
            .iter()
            .skip(zone.video_start_idx)
            .take(zone.video_end_idx.saturating_sub(zone.video_start_idx))
            .cloned()
            .collect();
        frames.sort_by_key(|f| f.capture_timestamp_us);
        frames
    }

    pub fn get_audio_chunks(&self, zone: &SyncZone) -> Vec<AudioChunk> {
        let audio = self.audio.lock().unwrap();
        let mut chunks: Vec<AudioChunk> = audio
            .buf
            .iter()
            .skip(zone.audio_start_idx)
            .take(zone.audio_end_idx.saturating_sub(zone.audio_start_idx))
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.capture_timestamp_us);
        chunks
    }

    pub fn mark_video_processed_by_timestamp(&self, ts_us: i64) {
        let mut video = self.video.lock().unwrap();
        if let Some(frame) = video
            .buf
            .iter_mut()
            .find(|f| f.capture_timestamp_us == ts_us)
        {
            frame.processed = true;
        }
    }

    pub fn mark_audio_processed_by_timestamp(&self, ts_us: i64) {
        let mut audio = self.audio.lock().unwrap();
        if let Some(chunk) = audio
            .buf
            .iter_mut()
            .find(|c| c.capture_timestamp_us == ts_us)
        {
            chunk.processed = true;
        }
    }

    /// Evicts only entries that are both older than `latest_ts -
    /// max_buffer_time_us` and processed, peeling from the front and
    /// stopping at the first entry that fails either condition. Never drops
    /// unprocessed data.
    pub fn cleanup_old_data(&self) {
        let max_buffer_time_us = self.config.lock().unwrap().max_buffer_time_us;

        {
            let mut video = self.video.lock().unwrap();
            let oldest_allowed = video.latest_ts - max_buffer_time_us;
            while let Some(front) = video.buf.front() {
                if front.capture_timestamp_us < oldest_allowed && front.processed {
                    video.buf.pop_front();
                } else {
                    break;
                }
            }
        }
        {
            let mut audio = self.audio.lock().unwrap();
            let oldest_allowed = audio.latest_ts - max_buffer_time_us;
            while let Some(front) = audio.buf.front() {
                if front.capture_timestamp_us < oldest_allowed && front.processed {
                    audio.buf.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    pub fn clear(&self) {
        let mut video = self.video.lock().unwrap();
        video.buf.clear();
        video.latest_ts = 0;
        let mut audio = self.audio.lock().unwrap();
        audio.buf.clear();
        audio.latest_ts = 0;
    }

    pub fn video_buffer_size(&self) -> usize {
        self.video.lock().unwrap().buf.len()
    }

    pub fn audio_buffer_size(&self) -> usize {
        self.audio.lock().unwrap().buf.len()
    }

    pub fn latest_video_timestamp(&self) -> i64 {
        self.video.lock().unwrap().latest_ts
    }

    pub fn latest_audio_timestamp(&self) -> i64 {
        self.audio.lock().unwrap().latest_ts
    }
}

/// Linear scan matching spec §4.1's index rule: `start_idx` is the first
/// index whose timestamp falls at or after `zone_start`; `end_idx` is one
/// past the last index whose timestamp falls at or before `zone_end`.
fn scan_range<'a, T: 'a>(
    items: impl Iterator<Item = &'a T>,
    zone_start: i64,
    zone_end: i64,
) -> (usize, usize)
where
    T: TimestampedForScan,
{
    let mut start_idx = 0;
    let mut start_set = false;
    let mut end_idx = 0;
    for (i, item) in items.enumerate() {
        let ts = item.capture_timestamp_us();
        if !start_set && ts >= zone_start {
            start_idx = i;
            start_set = true;
        }
        if ts <= zone_end {
            end_idx = i + 1;
        }
    }
    (start_idx, end_idx)
}

trait TimestampedForScan {
    fn capture_timestamp_us(&self) -> i64;
}

impl TimestampedForScan for VideoFrame {
    fn capture_timestamp_us(&self) -> i64 {
        self.capture_timestamp_us
    }
}

impl TimestampedForScan for AudioChunk {
    fn capture_timestamp_us(&self) -> i64 {
        self.capture_timestamp_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_bytes(w: u32, h: u32) -> Vec<u8> {
        vec![0u8; VideoFrame::expected_len(w, h)]
    }

    #[test]
    fn rejects_zero_dimensions() {
        let sync = Synchronizer::new(SynchronizerConfig::default());
        assert!(!sync.push_video(&video_bytes(1, 1), 0, 1, 0));
    }

    #[test]
    fn rejects_mismatched_buffer_size() {
        let sync = Synchronizer::new(SynchronizerConfig::default());
        assert!(!sync.push_video(&[0u8; 4], 4, 4, 0));
    }

    #[test]
    fn overflow_drops_oldest_unprocessed() {
        let mut cfg = SynchronizerConfig::default();
        cfg.max_video_buffer_size = 3;
        let sync = Synchronizer::new(cfg);
        for ts in 0..5 {
            assert!(sync.push_video(&video_bytes(2, 2), 2, 2, ts));
        }
        assert_eq!(sync.video_buffer_size(), 3);

        for ts in 0..5 {
            assert!(sync.push_audio(&[0i16; 4], ts * 1000, 44_100, 2));
        }
        let zone = sync.compute_sync_zone();
        assert!(zone.is_valid());
        let remaining: Vec<i64> = sync
            .get_video_frames(&zone)
            .iter()
            .map(|f| f.capture_timestamp_us)
            .collect();
        assert_eq!(remaining, vec![2, 3, 4]);
    }

    #[test]
    fn get_video_frames_sorts_out_of_order_pushes() {
        let sync = Synchronizer::new(SynchronizerConfig::default());
        for ts in [300, 100, 200] {
            assert!(sync.push_video(&video_bytes(2, 2), 2, 2, ts));
        }
        for ts in [300_000, 100_000, 200_000] {
            assert!(sync.push_audio(&[0i16; 4], ts, 44_100, 2));
        }

        let zone = sync.compute_sync_zone();
        assert!(zone.is_valid());
        let frames = sync.get_video_frames(&zone);
        let timestamps: Vec<i64> = frames.iter().map(|f| f.capture_timestamp_us).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
    }

    #[test]
    fn cleanup_only_evicts_processed_and_old_entries() {
        let mut cfg = SynchronizerConfig::default();
        cfg.max_buffer_time_us = 1_000_000;
        let sync = Synchronizer::new(cfg);
        assert!(sync.push_video(&video_bytes(2, 2), 2, 2, 0));
        assert!(sync.push_video(&video_bytes(2, 2), 2, 2, 5_000_000));
        sync.mark_video_processed_by_timestamp(0);
        sync.cleanup_old_data();
        assert_eq!(sync.video_buffer_size(), 1);
    }

    #[test]
    fn cleanup_never_evicts_unprocessed_entries() {
        let mut cfg = SynchronizerConfig::default();
        cfg.max_buffer_time_us = 1_000_000;
        let sync = Synchronizer::new(cfg);
        assert!(sync.push_video(&video_bytes(2, 2), 2, 2, 0));
        assert!(sync.push_video(&video_bytes(2, 2), 2, 2, 5_000_000));
        sync.cleanup_old_data();
        assert_eq!(sync.video_buffer_size(), 2);
    }
}

//! Real-time capture-to-container pipeline built on `ffmpeg-the-third`.
//!
//! Four collaborating pieces, one per module: [`sync`] bounds and aligns raw
//! video/audio input, [`encoder`] turns aligned input into compressed
//! packets, [`muxer`] writes those packets into a container, and
//! [`recorder`] drives the three of them from a background thread and
//! exposes the producer/control surface an embedding application uses.

pub mod encoder;
pub mod error;
pub mod log_throttle;
pub mod muxer;
pub mod recorder;
pub mod sync;
pub mod thumbnail;

pub use error::PipelineError;
pub use recorder::Recorder;
pub use sync::{Synchronizer, SynchronizerConfig};

#[cfg(test)]
mod tests {
    use super::*;
    use retrocap_core::RecordingSettings;

    /// Smoke-checks the producer API against a `Recorder` that never starts
    /// recording — these calls must degrade to `false`/no-ops rather than
    /// panicking, since an embedding application may call them before the
    /// first `start()`.
    #[test]
    fn producer_calls_are_noops_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path().join("recordings.json")).unwrap();

        assert!(!recorder.is_recording());
        assert!(!recorder.push_frame(&[0u8; 12], 2, 2));
        assert!(!recorder.push_audio(&[0i16; 4], true));
        assert_eq!(recorder.current_duration_us(), 0);
        assert_eq!(recorder.current_file_size(), 0);
        assert!(recorder.current_filename().is_none());
        assert!(recorder.list_recordings().is_empty());
    }

    #[test]
    fn stop_without_start_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path().join("recordings.json")).unwrap();
        assert!(matches!(recorder.stop(), Err(PipelineError::NotRecording)));
    }

    #[test]
    fn unknown_recording_operations_surface_core_error() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path().join("recordings.json")).unwrap();
        assert!(recorder.delete_recording("missing").is_err());
        assert!(recorder.rename_recording("missing", "x").is_err());
        assert!(recorder.recording_path("missing").is_none());
    }

    #[allow(dead_code)]
    fn default_settings_compiles() -> RecordingSettings {
        RecordingSettings::default()
    }
}

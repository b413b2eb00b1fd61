use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One completed recording, persisted in the registry's JSON file.
///
/// Field names are camelCase on the wire (spec §6's metadata JSON schema)
/// while staying snake_case in Rust, via serde's per-field `rename`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub filename: String,
    pub filepath: String,
    pub container: String,
    #[serde(rename = "videoCodec")]
    pub video_codec: String,
    #[serde(rename = "audioCodec")]
    pub audio_codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    #[serde(rename = "fileSize")]
    pub file_size: u64,
    /// Microseconds.
    pub duration: u64,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "thumbnailPath", skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct RegistryFile {
    recordings: Vec<RecordingMetadata>,
}

impl RecordingMetadata {
    /// `id = hash(filename + "_" + unix_epoch_seconds)`, `created_at` in UTC
    /// ISO-8601 — reproduced verbatim from the original source's
    /// `RecordingManager::startRecording` rather than switching to a UUID,
    /// even though the teacher's stack has one available.
    pub fn new_shell(
        filename: String,
        filepath: String,
        container: String,
        video_codec: String,
        audio_codec: String,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Self {
        let epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let id = derive_id(&filename, epoch_secs);
        let created_at = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        Self {
            id,
            filename,
            filepath,
            container,
            video_codec,
            audio_codec,
            width,
            height,
            fps,
            file_size: 0,
            duration: 0,
            created_at,
            thumbnail_path: None,
        }
    }
}

fn derive_id(filename: &str, epoch_secs: u64) -> String {
    let mut hasher = DefaultHasher::new();
    format!("{filename}_{epoch_secs}").hash(&mut hasher);
    hasher.finish().to_string()
}

/// The on-disk list of completed recordings (C5).
///
/// All mutations are expected to be serialized by the caller holding a
/// single lock around the registry (`retrocap_pipeline::Recorder` does
/// this); this type itself does no internal locking.
pub struct MetadataRegistry {
    path: PathBuf,
    recordings: Vec<RecordingMetadata>,
}

impl MetadataRegistry {
    /// Loads from `path`, starting empty if the file does not exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                recordings: Vec::new(),
            });
        }

        let contents = std::fs::read_to_string(&path).map_err(|source| Error::MetadataRead {
            path: path.clone(),
            source,
        })?;
        let file: RegistryFile =
            serde_json::from_str(&contents).map_err(|source| Error::MetadataParse {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            recordings: file.recordings,
        })
    }

    pub fn save(&self) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| Error::MetadataWrite {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }

        let file = RegistryFile {
            recordings: self.recordings.clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|source| Error::MetadataParse {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, json).map_err(|source| Error::MetadataWrite {
            path: self.path.clone(),
            source,
        })
    }

    pub fn push(&mut self, entry: RecordingMetadata) -> Result<(), Error> {
        self.recordings.push(entry);
        self.save()
    }

    pub fn list(&self) -> &[RecordingMetadata] {
        &self.recordings
    }

    /// Removes the file and the registry entry. A missing file is logged and
    /// treated as a warning, not a failure — the registry row still goes
    /// away (spec §4.5).
    pub fn delete(&mut self, id: &str) -> Result<(), Error> {
        let idx = self
            .recordings
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| Error::UnknownRecording(id.to_string()))?;
        let filepath = self.recordings[idx].filepath.clone();

        if Path::new(&filepath).exists() {
            if let Err(e) = std::fs::remove_file(&filepath) {
                log::warn!("failed to delete recording file {filepath}: {e}");
            }
        }

        self.recordings.remove(idx);
        self.save()
    }

    /// Renames the on-disk file, preserving the original extension if
    /// `new_name` doesn't specify one, and updates the registry row.
    pub fn rename(&mut self, id: &str, new_name: &str) -> Result<(), Error> {
        let idx = self
            .recordings
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| Error::UnknownRecording(id.to_string()))?;

        let old_path = PathBuf::from(&self.recordings[idx].filepath);
        let parent = old_path.parent().unwrap_or_else(|| Path::new("."));

        let new_path_candidate = Path::new(new_name);
        let new_filename = if new_path_candidate.extension().is_some() {
            new_name.to_string()
        } else {
            match old_path.extension().and_then(|e| e.to_str()) {
                Some(ext) => format!("{new_name}.{ext}"),
                None => new_name.to_string(),
            }
        };
        let new_path = parent.join(&new_filename);

        std::fs::rename(&old_path, &new_path).map_err(|source| Error::MetadataWrite {
            path: new_path.clone(),
            source,
        })?;

        self.recordings[idx].filename = new_filename;
        self.recordings[idx].filepath = new_path.to_string_lossy().into_owned();
        self.save()
    }

    pub fn recording_path(&self, id: &str) -> Option<String> {
        self.recordings
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.filepath.clone())
    }

    pub fn get(&self, id: &str) -> Option<&RecordingMetadata> {
        self.recordings.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut RecordingMetadata> {
        self.recordings.iter_mut().find(|r| r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_id_is_deterministic_for_same_inputs() {
        assert_eq!(derive_id("rec_2024.mp4", 1_700_000_000), derive_id("rec_2024.mp4", 1_700_000_000));
        assert_ne!(derive_id("rec_2024.mp4", 1_700_000_000), derive_id("rec_2024.mp4", 1_700_000_001));
    }

    #[test]
    fn load_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recordings.json");
        let reg = MetadataRegistry::load(&path).unwrap();
        assert!(reg.list().is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recordings.json");
        let mut reg = MetadataRegistry::load(&path).unwrap();
        let entry = RecordingMetadata::new_shell(
            "rec_2024.mp4".into(),
            dir.path().join("rec_2024.mp4").to_string_lossy().into_owned(),
            "mp4".into(),
            "h264".into(),
            "aac".into(),
            1280,
            720,
            60,
        );
        reg.push(entry).unwrap();

        let reloaded = MetadataRegistry::load(&path).unwrap();
        assert_eq!(reloaded.list().len(), 1);
        assert_eq!(reloaded.list()[0].filename, "rec_2024.mp4");
    }

    #[test]
    fn rename_preserves_extension_when_new_name_has_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recordings.json");
        let file_path = dir.path().join("rec_2024.mp4");
        std::fs::write(&file_path, b"fake mp4 data").unwrap();

        let mut reg = MetadataRegistry::load(&path).unwrap();
        let entry = RecordingMetadata::new_shell(
            "rec_2024.mp4".into(),
            file_path.to_string_lossy().into_owned(),
            "mp4".into(),
            "h264".into(),
            "aac".into(),
            1280,
            720,
            60,
        );
        let id = entry.id.clone();
        reg.push(entry).unwrap();

        reg.rename(&id, "newname").unwrap();
        assert_eq!(reg.get(&id).unwrap().filename, "newname.mp4");
        assert!(dir.path().join("newname.mp4").exists());
    }

    #[test]
    fn delete_removes_entry_even_if_file_already_gone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recordings.json");
        let mut reg = MetadataRegistry::load(&path).unwrap();
        let entry = RecordingMetadata::new_shell(
            "rec_2024.mp4".into(),
            dir.path().join("rec_2024.mp4").to_string_lossy().into_owned(),
            "mp4".into(),
            "h264".into(),
            "aac".into(),
            1280,
            720,
            60,
        );
        let id = entry.id.clone();
        reg.push(entry).unwrap();

        reg.delete(&id).unwrap();
        assert!(reg.get(&id).is_none());
    }
}

// Persistence of synthesized frame sequences, keyed by session identity

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::ReplayError;
use crate::config::SynthesisParams;
use crate::frames::FrameSequence;
use crate::telemetry::{Driver, SessionKey};

/// Bumped whenever the layout of [`CacheEntry`] or the synthesis semantics
/// change. Entries written with another version are treated as misses.
pub const FRAME_FORMAT_VERSION: u32 = 2;

/// Frame sequence and roster reconstructed from the cache
#[derive(Clone, Debug, PartialEq)]
pub struct CachedSession {
    pub roster: Vec<Driver>,
    pub frames: FrameSequence,
}

/// Interface of the frame cache. `load` is a pure lookup, every failure comes
/// back as `CacheMiss`. Entries are tagged with the synthesis settings they
/// were built with, and only returned for the same settings.
pub trait FrameCache {
    fn load(
        &self,
        key: &SessionKey,
        params: &SynthesisParams,
    ) -> Result<CachedSession, ReplayError>;

    /// Persist the frames, replacing any previous entry for `key`. A failed
    /// store never leaves an entry `load` would accept.
    fn store(
        &mut self,
        key: &SessionKey,
        params: &SynthesisParams,
        roster: &[Driver],
        frames: &FrameSequence,
    ) -> Result<(), ReplayError>;

    /// Drop the entry for `key`, if any
    fn invalidate(&mut self, key: &SessionKey) -> Result<(), ReplayError>;
}

/// On-disk layout of one cached session
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub session_key: SessionKey,
    pub format_version: u32,
    pub params: SynthesisParams,
    pub frame_count: usize,
    pub driver_roster: Vec<Driver>,
    pub frames: FrameSequence,
}

impl CacheEntry {
    fn check(&self, key: &SessionKey, params: &SynthesisParams) -> Result<(), String> {
        if self.format_version != FRAME_FORMAT_VERSION {
            return Err(format!(
                "format version {} does not match {}",
                self.format_version, FRAME_FORMAT_VERSION
            ));
        }
        if self.session_key != *key {
            return Err(format!(
                "entry belongs to {} instead of {}",
                self.session_key, key
            ));
        }
        if self.params != *params {
            return Err(format!(
                "entry was built with {:?}, requested {:?}",
                self.params, params
            ));
        }
        if self.frame_count != self.frames.len() || self.frames.is_empty() {
            return Err(format!(
                "frame count {} does not match {} stored frames",
                self.frame_count,
                self.frames.len()
            ));
        }
        if self.params.dt != self.frames.dt || !self.frames.is_contiguous() {
            return Err("frame timestamps are not contiguous".to_string());
        }
        Ok(())
    }
}

/// One JSON file per session inside a cache directory
pub struct FileFrameCache {
    cache_path: PathBuf,
}

impl FileFrameCache {
    pub fn new(cache_path: PathBuf) -> Result<Self, ReplayError> {
        if !cache_path.exists() {
            fs::create_dir_all(&cache_path).map_err(|e| ReplayError::CacheWriteFailure {
                reason: format!("Failed to create cache directory {:?}: {}", cache_path, e),
            })?;
        }
        Ok(Self { cache_path })
    }

    /// Cache in the default application data directory
    pub fn new_default() -> Result<Self, ReplayError> {
        Self::new(Self::default_cache_path()?)
    }

    pub fn default_cache_path() -> Result<PathBuf, ReplayError> {
        let app_data_dir = dirs::data_dir().ok_or(ReplayError::NoConfigDir)?;
        Ok(app_data_dir.join("f1-replay").join("frame_cache"))
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// File holding the entry for `key`
    pub fn file_path_for_session(&self, key: &SessionKey) -> PathBuf {
        self.cache_path.join(format!(
            "{}_r{:02}_{}.json",
            key.year,
            key.round,
            key.kind.code().to_lowercase()
        ))
    }

    fn read_entry(&self, file_path: &Path) -> Result<CacheEntry, String> {
        let content =
            fs::read_to_string(file_path).map_err(|e| format!("Failed to read file: {}", e))?;
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse JSON: {}", e))
    }

    fn write_atomically(&self, file_path: &Path, content: &[u8]) -> Result<(), ReplayError> {
        let temp_path = file_path.with_extension("json.tmp");

        let written = fs::File::create(&temp_path).and_then(|mut temp_file| {
            temp_file.write_all(content)?;
            temp_file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(ReplayError::CacheWriteFailure {
                reason: format!("Failed to write temporary file {:?}: {}", temp_path, e),
            });
        }

        fs::rename(&temp_path, file_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            ReplayError::CacheWriteFailure {
                reason: format!("Failed to move temporary file to final location: {}", e),
            }
        })
    }
}

impl FrameCache for FileFrameCache {
    fn load(
        &self,
        key: &SessionKey,
        params: &SynthesisParams,
    ) -> Result<CachedSession, ReplayError> {
        let file_path = self.file_path_for_session(key);
        if !file_path.exists() {
            debug!("No cached frames for {} at {:?}", key, file_path);
            return Err(ReplayError::CacheMiss {
                reason: format!("no entry for {}", key),
            });
        }

        let entry = self
            .read_entry(&file_path)
            .and_then(|entry| entry.check(key, params).map(|_| entry))
            .map_err(|reason| {
                debug!("Ignoring cached frames for {}: {}", key, reason);
                ReplayError::CacheMiss { reason }
            })?;

        info!("Loaded {} cached frames for {}", entry.frame_count, key);
        Ok(CachedSession {
            roster: entry.driver_roster,
            frames: entry.frames,
        })
    }

    fn store(
        &mut self,
        key: &SessionKey,
        params: &SynthesisParams,
        roster: &[Driver],
        frames: &FrameSequence,
    ) -> Result<(), ReplayError> {
        let entry = CacheEntry {
            session_key: *key,
            format_version: FRAME_FORMAT_VERSION,
            params: *params,
            frame_count: frames.len(),
            driver_roster: roster.to_vec(),
            frames: frames.clone(),
        };
        let content = serde_json::to_vec(&entry).map_err(|e| ReplayError::CacheWriteFailure {
            reason: format!("Failed to serialize frames: {}", e),
        })?;

        let file_path = self.file_path_for_session(key);
        self.write_atomically(&file_path, &content)?;
        info!(
            "Cached {} frames for {} ({} bytes)",
            entry.frame_count,
            key,
            content.len()
        );
        Ok(())
    }

    fn invalidate(&mut self, key: &SessionKey) -> Result<(), ReplayError> {
        let file_path = self.file_path_for_session(key);
        match fs::remove_file(&file_path) {
            Ok(()) => {
                info!("Invalidated cached frames for {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to remove cache entry {:?}: {}", file_path, e);
                Err(ReplayError::CacheWriteFailure {
                    reason: format!("Failed to remove {:?}: {}", file_path, e),
                })
            }
        }
    }
}

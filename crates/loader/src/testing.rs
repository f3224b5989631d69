use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use common::{BeatmapDescriptor, BuiltInDetails, Difficulty, DifficultyEntry, DifficultySet, MetadataRecord};
use metadata::{LoadError, RawLoader};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub fn custom_level(index: usize) -> BeatmapDescriptor {
    BeatmapDescriptor::custom(
        format!("custom_level_{:040X}", index),
        format!("Song {}", index),
        PathBuf::from(format!("CustomLevels/{} (Song {})", index, index)),
    )
}

pub fn built_in_level(name: &str) -> BeatmapDescriptor {
    BeatmapDescriptor::built_in(
        name,
        name,
        BuiltInDetails {
            bpm: 166.0,
            duration_secs: 200.0,
            difficulty_sets: vec![DifficultySet {
                characteristic: "Standard".to_string(),
                difficulties: vec![entry(Difficulty::Normal, 250)],
            }],
        },
    )
}

fn entry(difficulty: Difficulty, notes: u32) -> DifficultyEntry {
    DifficultyEntry {
        difficulty,
        note_jump_speed: 12.0,
        notes,
        bombs: 0,
        obstacles: 3,
        score_multiplier: None,
    }
}

/// Raw loader double with per-level latency and failure scripts.
pub struct ScriptedLoader {
    latency: Duration,
    latencies: Mutex<HashMap<String, Duration>>,
    failures: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            latencies: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn delay(&self, level_id: &str, latency: Duration) {
        self.latencies.lock().insert(level_id.to_string(), latency);
    }

    pub fn fail(&self, level_id: &str) {
        self.failures.lock().insert(level_id.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn record_for(&self, descriptor: &BeatmapDescriptor) -> MetadataRecord {
        MetadataRecord {
            level_id: descriptor.level_id.clone(),
            song_name: descriptor.song_name.clone(),
            song_sub_name: String::new(),
            song_author_name: "Artist".to_string(),
            level_author_name: "Mapper".to_string(),
            bpm: 120.0,
            duration_secs: 180.0,
            difficulty_sets: vec![DifficultySet {
                characteristic: "Standard".to_string(),
                difficulties: vec![entry(Difficulty::Expert, 600)],
            }],
        }
    }
}

impl RawLoader for ScriptedLoader {
    async fn load(
        &self,
        descriptor: &BeatmapDescriptor,
        cancel: &CancellationToken,
    ) -> Result<MetadataRecord, LoadError> {
        self.calls.lock().push(descriptor.level_id.clone());
        let latency = self
            .latencies
            .lock()
            .get(&descriptor.level_id)
            .copied()
            .unwrap_or(self.latency);

        if latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = cancel.cancelled() => return Err(LoadError::Canceled),
                _ = tokio::time::sleep(latency) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(LoadError::Canceled);
        }
        if self.failures.lock().contains(&descriptor.level_id) {
            return Err(LoadError::Parse(format!(
                "invalid info.dat for {}",
                descriptor.song_name
            )));
        }
        Ok(self.record_for(descriptor))
    }
}

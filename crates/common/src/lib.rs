use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// Length of the content fingerprint that identifies a community level.
/// Anything past it is a folder-name suffix from the on-disk layout.
pub const LEVEL_ID_PREFIX_LEN: usize = 53;

/// Truncates a level ID to its canonical fingerprint prefix.
pub fn normalize_level_id(level_id: &str) -> &str {
    match level_id.char_indices().nth(LEVEL_ID_PREFIX_LEN) {
        Some((end, _)) => &level_id[..end],
        None => level_id,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
    Expert,
    ExpertPlus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DifficultyEntry {
    pub difficulty: Difficulty,
    pub note_jump_speed: f32,
    pub notes: u32,
    pub bombs: u32,
    pub obstacles: u32,
    #[serde(default)]
    pub score_multiplier: Option<f32>,
}

impl DifficultyEntry {
    pub fn notes_per_second(&self, duration_secs: f32) -> f32 {
        if duration_secs <= 0.0 {
            0.0
        } else {
            self.notes as f32 / duration_secs
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DifficultySet {
    pub characteristic: String,
    #[serde(default)]
    pub difficulties: Vec<DifficultyEntry>,
}

/// Parsed details for one beatmap. Never edited after construction; the
/// cache replaces whole records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub level_id: String,
    pub song_name: String,
    #[serde(default)]
    pub song_sub_name: String,
    #[serde(default)]
    pub song_author_name: String,
    #[serde(default)]
    pub level_author_name: String,
    pub bpm: f32,
    pub duration_secs: f32,
    #[serde(default)]
    pub difficulty_sets: Vec<DifficultySet>,
}

impl MetadataRecord {
    pub fn normalized_id(&self) -> &str {
        normalize_level_id(&self.level_id)
    }

    /// Builds the record for a built-in level straight from its descriptor.
    /// Returns `None` for community levels, which must be parsed.
    pub fn from_built_in(descriptor: &BeatmapDescriptor) -> Option<Self> {
        let details = match &descriptor.kind {
            LevelKind::BuiltIn(details) => details,
            LevelKind::Custom { .. } => return None,
        };
        Some(Self {
            level_id: descriptor.level_id.clone(),
            song_name: descriptor.song_name.clone(),
            song_sub_name: descriptor.song_sub_name.clone(),
            song_author_name: descriptor.song_author_name.clone(),
            level_author_name: descriptor.level_author_name.clone(),
            bpm: details.bpm,
            duration_secs: details.duration_secs,
            difficulty_sets: details.difficulty_sets.clone(),
        })
    }

    pub fn characteristic(&self, name: &str) -> Option<&DifficultySet> {
        self.difficulty_sets
            .iter()
            .find(|set| set.characteristic.eq_ignore_ascii_case(name))
    }

    pub fn difficulty_count(&self) -> usize {
        self.difficulty_sets
            .iter()
            .map(|set| set.difficulties.len())
            .sum()
    }
}

impl PartialEq for MetadataRecord {
    fn eq(&self, other: &Self) -> bool {
        self.normalized_id() == other.normalized_id()
    }
}

impl Eq for MetadataRecord {}

impl Hash for MetadataRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized_id().hash(state);
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuiltInDetails {
    pub bpm: f32,
    pub duration_secs: f32,
    #[serde(default)]
    pub difficulty_sets: Vec<DifficultySet>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelKind {
    BuiltIn(BuiltInDetails),
    Custom { folder: PathBuf },
}

/// Lightweight reference to a level before its details are loaded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeatmapDescriptor {
    pub level_id: String,
    pub song_name: String,
    #[serde(default)]
    pub song_sub_name: String,
    #[serde(default)]
    pub song_author_name: String,
    #[serde(default)]
    pub level_author_name: String,
    pub kind: LevelKind,
}

impl BeatmapDescriptor {
    pub fn custom(level_id: impl Into<String>, song_name: impl Into<String>, folder: PathBuf) -> Self {
        Self {
            level_id: level_id.into(),
            song_name: song_name.into(),
            song_sub_name: String::new(),
            song_author_name: String::new(),
            level_author_name: String::new(),
            kind: LevelKind::Custom { folder },
        }
    }

    pub fn built_in(
        level_id: impl Into<String>,
        song_name: impl Into<String>,
        details: BuiltInDetails,
    ) -> Self {
        Self {
            level_id: level_id.into(),
            song_name: song_name.into(),
            song_sub_name: String::new(),
            song_author_name: String::new(),
            level_author_name: String::new(),
            kind: LevelKind::BuiltIn(details),
        }
    }

    pub fn normalized_id(&self) -> &str {
        normalize_level_id(&self.level_id)
    }

    pub fn is_custom(&self) -> bool {
        matches!(self.kind, LevelKind::Custom { .. })
    }
}

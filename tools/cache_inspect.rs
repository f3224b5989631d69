use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use loader::{config_path_from_env, load_config, CacheStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let config = load_config(&config_path)?;
    info!("Using loader config {:?}", config_path);

    let cache_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| config.cache_file(&config_path));

    let cache = CacheStore::new();
    cache.load_from_file(&cache_path).await;
    let records = cache.snapshot();

    let mut characteristics: BTreeMap<String, usize> = BTreeMap::new();
    let mut min_bpm = f32::MAX;
    let mut max_bpm = 0.0f32;
    let mut densest: Option<(f32, String)> = None;
    for record in &records {
        min_bpm = min_bpm.min(record.bpm);
        max_bpm = max_bpm.max(record.bpm);
        for set in &record.difficulty_sets {
            *characteristics.entry(set.characteristic.clone()).or_default() += 1;
            for entry in &set.difficulties {
                let nps = entry.notes_per_second(record.duration_secs);
                if densest.as_ref().map(|(best, _)| nps > *best).unwrap_or(true) {
                    densest = Some((nps, format!("{} [{:?}]", record.song_name, entry.difficulty)));
                }
            }
        }
    }

    println!("Cache file: {}", cache_path.display());
    println!("Levels: {}", records.len());
    if records.is_empty() {
        return Ok(());
    }
    println!("BPM range: {:.1} - {:.1}", min_bpm, max_bpm);
    for (name, count) in &characteristics {
        println!("  {}: {}", name, count);
    }
    if let Some((nps, label)) = densest {
        println!("Densest difficulty: {} ({:.2} notes/s)", label, nps);
    }

    Ok(())
}

//! Bootstrapping the scenario and image catalogs.
//!
//! Both seeders only insert rows that do not exist yet, so they can run on
//! every start-up without resetting counters or enabled flags.

use std::path::Path;

use log::{debug, info};
use regex::Regex;

use crate::configuration::ScenarioConfig;
use crate::error_handling::types::CatalogError;
use crate::storage::types::ImageCategory;
use crate::storage::DatabaseStorage;

const IMAGE_FILE_PATTERN: &str = r"(?i)\.(jpg|jpeg|png)$";

/// Inserts the configured scenarios that storage does not know yet.
///
/// Returns how many were added.
pub async fn seed_scenarios(
    storage: &DatabaseStorage,
    scenarios: &[ScenarioConfig],
) -> Result<usize, CatalogError> {
    let mut added = 0;
    for config in scenarios {
        if storage.insert_scenario_if_absent(&config.to_scenario()).await? {
            debug!("Scenario {} added", config.id);
            added += 1;
        }
    }
    info!("Scenario catalog seeded: {} new of {}", added, scenarios.len());
    Ok(added)
}

/// Registers every image file below `root`, one sub-directory per category.
///
/// The file name becomes the image id. All category folders must exist before
/// anything is inserted. Returns how many images were added.
pub async fn seed_images_from_folders(
    storage: &DatabaseStorage,
    root: &Path,
) -> Result<usize, CatalogError> {
    info!("Seeding images from {}", root.display());
    let pattern = Regex::new(IMAGE_FILE_PATTERN).map_err(|e| {
        CatalogError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    })?;

    for category in ImageCategory::ALL {
        let dir = root.join(category.as_str());
        if !dir.is_dir() {
            return Err(CatalogError::MissingCategoryFolder(
                dir.display().to_string(),
            ));
        }
    }

    let mut found: Vec<(String, ImageCategory)> = Vec::new();
    for category in ImageCategory::ALL {
        for entry in std::fs::read_dir(root.join(category.as_str()))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if pattern.is_match(&name) {
                found.push((name, category));
            }
        }
    }
    info!("Found {} image files", found.len());

    let mut added = 0;
    for (image_id, category) in &found {
        if storage.insert_image_if_absent(image_id, *category).await? {
            added += 1;
        }
    }
    info!("Image catalog seeded: {} new", added);
    Ok(added)
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::storage::types::Scenario;
use crate::storage::DatabaseStorage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_bind_address() -> String {
    String::from("127.0.0.1")
}

fn default_port() -> u16 {
    3001
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from(DatabaseStorage::DEFAULT_DB_FILE)
}

fn default_max_connections() -> u32 {
    5
}

/// Session sizing.
///
/// Every allowed count must split evenly over the image categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    #[serde(default = "default_allowed_image_counts")]
    pub allowed_image_counts: Vec<usize>,
    #[serde(default = "default_image_count")]
    pub default_image_count: usize,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            allowed_image_counts: default_allowed_image_counts(),
            default_image_count: default_image_count(),
        }
    }
}

impl StudyConfig {
    /// Maps a raw `n` query value to a session size, falling back to the
    /// default for anything missing, malformed or not allowed.
    pub fn resolve_image_count(&self, requested: Option<&str>) -> usize {
        requested
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|n| self.allowed_image_counts.contains(n))
            .unwrap_or(self.default_image_count)
    }
}

fn default_allowed_image_counts() -> Vec<usize> {
    vec![8, 16, 24]
}

fn default_image_count() -> usize {
    8
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Expected `x-admin-token` header; admin routes are open when unset.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub short_label: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ScenarioConfig {
    fn new(id: &str, title: &str, short_label: &str, description: &str) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            short_label: Some(short_label.into()),
            enabled: true,
        }
    }

    pub fn to_scenario(&self) -> Scenario {
        Scenario {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            short_label: self.short_label.clone(),
            enabled: self.enabled,
        }
    }
}

/// The study contexts used when the configuration lists none.
pub fn default_scenarios() -> Vec<ScenarioConfig> {
    vec![
        ScenarioConfig::new(
            "ar_assistant",
            "AR furniture visualization app",
            "the AR furniture app",
            "Imagine using an app like IKEA Place or Amazon's AR View that lets you visualize \
             how furniture would look in your room by scanning your space with your phone camera.",
        ),
        ScenarioConfig::new(
            "furniture_scanner",
            "Home improvement & shopping app",
            "the home improvement app",
            "Imagine using an app like IKEA, OBI, Home Depot, or Houzz that scans your room \
             photos to suggest products, measure spaces, or provide renovation ideas.",
        ),
        ScenarioConfig::new(
            "smart_camera",
            "Smart home security camera",
            "the smart home camera",
            "Imagine this image was captured by a smart home security camera like Ring, Nest, \
             or Arlo that records inside your home and uses AI to detect people or activity.",
        ),
        ScenarioConfig::new(
            "social_media_ai",
            "Social media & photo storage",
            "social media",
            "Imagine uploading this to Instagram, Facebook, or Google Photos where AI \
             automatically analyzes it to tag people, identify objects, suggest memories, and \
             organize your content.",
        ),
    ]
}

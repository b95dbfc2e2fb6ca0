use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::session_management::SessionStatus;

/// Current time at the precision timestamps are persisted with.
pub fn storage_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed partition of the image pool used to stratify sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ImageCategory {
    #[serde(rename = "Education_knowledge")]
    EducationKnowledge,
    #[serde(rename = "Health_medical")]
    HealthMedical,
    #[serde(rename = "Household_children")]
    HouseholdChildren,
    #[serde(rename = "Intimate_private_space")]
    IntimatePrivateSpace,
    #[serde(rename = "Lifestyle_habits")]
    LifestyleHabits,
    #[serde(rename = "Religion_culture")]
    ReligionCulture,
    #[serde(rename = "SES_living_standard")]
    SesLivingStandard,
    #[serde(rename = "Work_from_home")]
    WorkFromHome,
}

impl ImageCategory {
    pub const ALL: [ImageCategory; 8] = [
        ImageCategory::EducationKnowledge,
        ImageCategory::HealthMedical,
        ImageCategory::HouseholdChildren,
        ImageCategory::IntimatePrivateSpace,
        ImageCategory::LifestyleHabits,
        ImageCategory::ReligionCulture,
        ImageCategory::SesLivingStandard,
        ImageCategory::WorkFromHome,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageCategory::EducationKnowledge => "Education_knowledge",
            ImageCategory::HealthMedical => "Health_medical",
            ImageCategory::HouseholdChildren => "Household_children",
            ImageCategory::IntimatePrivateSpace => "Intimate_private_space",
            ImageCategory::LifestyleHabits => "Lifestyle_habits",
            ImageCategory::ReligionCulture => "Religion_culture",
            ImageCategory::SesLivingStandard => "SES_living_standard",
            ImageCategory::WorkFromHome => "Work_from_home",
        }
    }
}

impl fmt::Display for ImageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown image category: {}", s))
    }
}

/// A study condition as stored in the `scenarios` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    pub description: String,
    pub short_label: Option<String>,
    pub enabled: bool,
}

/// Enabled scenario annotated with how many sessions completed under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioLoad {
    pub scenario: Scenario,
    pub completed_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub image_id: String,
    pub category: ImageCategory,
    pub assigned_count: u64,
    pub completed_count: u64,
    pub last_assigned_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

/// How often an image has been shown under each statement across all sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementTally {
    pub statement1: u64,
    pub statement2: u64,
}

impl StatementTally {
    /// Signed skew towards statement 1.
    pub fn imbalance(&self) -> i64 {
        self.statement1 as i64 - self.statement2 as i64
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub scenario_id: Option<String>,
}

/// Per-scenario session totals for the admin overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioOverview {
    pub id: String,
    pub title: String,
    pub description: String,
    pub enabled: bool,
    pub completed: u64,
    pub in_progress: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub category: String,
    pub enabled_images: u64,
    pub assigned_sum: u64,
    pub completed_sum: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub completed_sessions: u64,
    pub avg_completion_minutes: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_string_roundtrip() {
        for category in ImageCategory::ALL {
            assert_eq!(category.as_str().parse::<ImageCategory>(), Ok(category));
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.as_str()));
        }
        assert!("Sports".parse::<ImageCategory>().is_err());
    }

    #[test]
    fn test_tally_imbalance() {
        let tally = StatementTally {
            statement1: 2,
            statement2: 5,
        };
        assert_eq!(tally.imbalance(), -3);
    }
}

//! Session management core module.
//!
//! This module provides the core types and submodules for managing study sessions:
//! the session status and progress stage, the persisted session records, and the
//! lifecycle manager that starts, updates and finalizes sessions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Submodule for session data structures and draft merging.
pub mod session;
/// Submodule for the session lifecycle manager.
pub mod session_manager;

/// Represents the current status of a session.
///
/// Variants:
/// - `InProgress`: The session has been started and accepts progress updates.
/// - `Completed`: The session has been finalized; terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(SessionStatus::InProgress),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

/// UI progress marker carried through unchanged by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Welcome,
    AnnotateStarted,
    Annotate,
    AnnotateDone,
    ObfuscationStarted,
    ObfuscationDone,
    DemographicsDone,
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Welcome => "welcome",
            Stage::AnnotateStarted => "annotate_started",
            Stage::Annotate => "annotate",
            Stage::AnnotateDone => "annotate_done",
            Stage::ObfuscationStarted => "obfuscation_started",
            Stage::ObfuscationDone => "obfuscation_done",
            Stage::DemographicsDone => "demographics_done",
            Stage::Completed => "completed",
        }
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "welcome" => Ok(Stage::Welcome),
            "annotate_started" => Ok(Stage::AnnotateStarted),
            "annotate" => Ok(Stage::Annotate),
            "annotate_done" => Ok(Stage::AnnotateDone),
            "obfuscation_started" => Ok(Stage::ObfuscationStarted),
            "obfuscation_done" => Ok(Stage::ObfuscationDone),
            "demographics_done" => Ok(Stage::DemographicsDone),
            "completed" => Ok(Stage::Completed),
            other => Err(format!("unknown stage: {}", other)),
        }
    }
}

/// The two question framings an image can be presented under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Statement {
    One,
    Two,
}

impl Statement {
    pub fn other(self) -> Statement {
        match self {
            Statement::One => Statement::Two,
            Statement::Two => Statement::One,
        }
    }

    /// +1 for statement 1, -1 for statement 2, in units of tally imbalance.
    pub fn skew(self) -> i64 {
        match self {
            Statement::One => 1,
            Statement::Two => -1,
        }
    }
}

impl From<Statement> for u8 {
    fn from(statement: Statement) -> u8 {
        match statement {
            Statement::One => 1,
            Statement::Two => 2,
        }
    }
}

impl TryFrom<u8> for Statement {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Statement::One),
            2 => Ok(Statement::Two),
            other => Err(format!("statement must be 1 or 2, got {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!("in_progress".parse(), Ok(SessionStatus::InProgress));
        assert_eq!("completed".parse(), Ok(SessionStatus::Completed));
        assert!("expired".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_stage_serde_names() {
        let stage: Stage = serde_json::from_str("\"obfuscation_started\"").unwrap();
        assert_eq!(stage, Stage::ObfuscationStarted);
        assert_eq!(stage.as_str().parse(), Ok(stage));
    }

    #[test]
    fn test_statement_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Statement::Two).unwrap(), "2");
        assert_eq!(serde_json::from_str::<Statement>("1").unwrap(), Statement::One);
        assert!(serde_json::from_str::<Statement>("3").is_err());
        assert_eq!(Statement::One.other(), Statement::Two);
    }
}

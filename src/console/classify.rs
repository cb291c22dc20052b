//! Keyword classification of server console output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display category of a piece of console output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputCategory {
    Error,
    Warning,
    Info,
    PlayerJoin,
    PlayerLeave,
    #[default]
    Normal,
}

impl OutputCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::PlayerJoin => "player_join",
            Self::PlayerLeave => "player_leave",
            Self::Normal => "normal",
        }
    }
}

/// Keyword table, checked in order. First match wins.
const RULES: &[(OutputCategory, &[&str])] = &[
    (OutputCategory::Error, &["ERROR", "Exception", "Error"]),
    (OutputCategory::Warning, &["WARNING", "Warning"]),
    (OutputCategory::Info, &["INFO", "Info"]),
    (
        OutputCategory::PlayerJoin,
        &["Player connected:", "joined the game"],
    ),
    (
        OutputCategory::PlayerLeave,
        &["Player disconnected:", "left the game"],
    ),
];

/// Classify a chunk of output text.
///
/// Matching is case-sensitive substring search. Chunks are not line-aligned,
/// so a keyword split across two reads is not recognized.
#[must_use]
pub fn classify(text: &str) -> OutputCategory {
    RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map_or(OutputCategory::Normal, |(category, _)| *category)
}

/// Which stream of the child a chunk was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSource {
    Stdout,
    Stderr,
}

/// Raw text produced by one read of the child's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub text: String,
    pub received_at: DateTime<Utc>,
    pub source: OutputSource,
}

impl OutputChunk {
    #[must_use]
    pub fn new(text: impl Into<String>, source: OutputSource) -> Self {
        Self {
            text: text.into(),
            received_at: Utc::now(),
            source,
        }
    }
}

/// Where a displayed line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineOrigin {
    /// Read from the child's stdout.
    Stdout,
    /// Read from the child's stderr.
    Stderr,
    /// Local echo of a submitted command. Never written to the child's output.
    Echo,
    /// Lifecycle notice or error raised by the supervisor itself.
    Supervisor,
}

impl From<OutputSource> for LineOrigin {
    fn from(source: OutputSource) -> Self {
        match source {
            OutputSource::Stdout => Self::Stdout,
            OutputSource::Stderr => Self::Stderr,
        }
    }
}

/// Output text tagged with its display category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedLine {
    pub text: String,
    pub category: OutputCategory,
    pub origin: LineOrigin,
    pub received_at: DateTime<Utc>,
}

impl ClassifiedLine {
    /// Classify a chunk read from the child.
    #[must_use]
    pub fn from_chunk(chunk: OutputChunk) -> Self {
        Self {
            category: classify(&chunk.text),
            origin: chunk.source.into(),
            received_at: chunk.received_at,
            text: chunk.text,
        }
    }

    /// A line raised by the supervisor with an explicit category.
    #[must_use]
    pub fn notice(text: impl Into<String>, category: OutputCategory) -> Self {
        Self {
            text: text.into(),
            category,
            origin: LineOrigin::Supervisor,
            received_at: Utc::now(),
        }
    }

    /// Local echo of a command sent to the child.
    #[must_use]
    pub fn echo(command: &str) -> Self {
        Self {
            text: format!("> {command}"),
            category: OutputCategory::Info,
            origin: LineOrigin::Echo,
            received_at: Utc::now(),
        }
    }
}

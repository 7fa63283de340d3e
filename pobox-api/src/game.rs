use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The single game lifecycle value fanned out to every session.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    Start,
    Pause,
    End,
}

impl GameState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::End => "end",
        }
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameState {
    type Err = UnknownGameState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "pause" => Ok(Self::Pause),
            "end" => Ok(Self::End),
            other => Err(UnknownGameState(other.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown game state '{0}'")]
pub struct UnknownGameState(String);

/// Current game status plus provenance, broadcast as a `game_status` frame.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatus {
    pub status: GameState,
    pub last_updated: DateTime<Utc>,
    pub updated_by: String,
}

impl GameStatus {
    /// The status a fresh process starts with, attributed to the system.
    pub fn initial() -> Self {
        Self {
            status: GameState::Start,
            last_updated: Utc::now(),
            updated_by: "system".to_owned(),
        }
    }

    pub fn update(&mut self, status: GameState, updated_by: &str) {
        self.status = status;
        self.last_updated = Utc::now();
        self.updated_by = updated_by.to_owned();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wire_strings_are_lowercase() {
        assert_eq!(serde_json::to_string(&GameState::Pause).unwrap(), "\"pause\"");
        assert_eq!(
            serde_json::from_str::<GameState>("\"end\"").unwrap(),
            GameState::End,
        );
    }

    #[test]
    fn from_str_rejects_unknown() {
        assert!("game_over".parse::<GameState>().is_err());
    }
}

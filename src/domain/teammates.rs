//! Teammate lookup types: reference lists and player profiles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::RegistryError;

/// Small lookup tables served through the reference-list cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceCategory {
    Games,
    Genres,
    Languages,
    Apps,
}

impl ReferenceCategory {
    pub const ALL: [ReferenceCategory; 4] = [Self::Games, Self::Genres, Self::Languages, Self::Apps];

    /// Category name; doubles as cache key prefix and table name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Games => "games",
            Self::Genres => "genres",
            Self::Languages => "languages",
            Self::Apps => "apps",
        }
    }
}

impl fmt::Display for ReferenceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceCategory {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| RegistryError::InvalidIdentifier {
                field: "category",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceItem {
    pub id: i64,
    pub name: String,
}

/// Player row to insert or update (keyed by username)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewPlayer {
    pub username: String,
    pub age: u32,
    pub description: String,
    pub game_id: Option<i64>,
    pub genre_id: Option<i64>,
    pub language_id: Option<i64>,
    pub app_id: Option<i64>,
}

/// Player as shown in search results, with reference names resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub username: String,
    pub age: u32,
    pub description: String,
    pub game: String,
    pub genre: String,
    pub app: String,
    pub language: String,
}

/// Teammate search criteria; `None` means "any"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeammateFilter {
    pub age_min: u32,
    pub age_max: u32,
    pub game_id: Option<i64>,
    pub genre_id: Option<i64>,
    pub language_id: Option<i64>,
}

impl Default for TeammateFilter {
    fn default() -> Self {
        Self {
            age_min: 0,
            age_max: 150,
            game_id: None,
            genre_id: None,
            language_id: None,
        }
    }
}

impl TeammateFilter {
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.age_min > self.age_max {
            return Err(RegistryError::InvalidIdentifier {
                field: "age range",
                value: format!("{}..{}", self.age_min, self.age_max),
            });
        }
        Ok(())
    }
}

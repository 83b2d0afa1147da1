// ============================================================================
// Entity Record
// ============================================================================
//
// An entity is persisted as a field map under `entity:<id>`:
//
//   title  -> string
//   artist -> string
//   price  -> floating point
//   likes  -> non-negative integer
//
// The id is part of the key, not of the field map.
//
// ============================================================================

use super::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raw field map as returned by HGETALL.
pub type FieldMap = HashMap<String, String>;

pub const FIELD_TITLE: &str = "title";
pub const FIELD_ARTIST: &str = "artist";
pub const FIELD_PRICE: &str = "price";
pub const FIELD_LIKES: &str = "likes";

/// A catalog item with its popularity counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub price: f64,
    pub likes: u64,
}

impl Entity {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        price: f64,
        likes: u64,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            price,
            likes,
        }
    }

    /// Decode a stored field map.
    ///
    /// An empty map means the record does not exist and yields `NotFound`;
    /// a missing or malformed field yields `DecodeError`. Unknown fields are
    /// ignored.
    pub fn decode(id: &str, fields: &FieldMap) -> Result<Self> {
        if fields.is_empty() {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let title = required(id, fields, FIELD_TITLE)?.to_string();
        let artist = required(id, fields, FIELD_ARTIST)?.to_string();

        let raw_price = required(id, fields, FIELD_PRICE)?;
        let price: f64 = raw_price.trim().parse().map_err(|_| {
            StoreError::DecodeError(format!(
                "entity '{}': field '{}' is not a number: '{}'",
                id, FIELD_PRICE, raw_price
            ))
        })?;
        if !price.is_finite() {
            return Err(StoreError::DecodeError(format!(
                "entity '{}': field '{}' is not finite",
                id, FIELD_PRICE
            )));
        }

        let raw_likes = required(id, fields, FIELD_LIKES)?;
        let likes: u64 = raw_likes.trim().parse().map_err(|_| {
            StoreError::DecodeError(format!(
                "entity '{}': field '{}' is not a non-negative integer: '{}'",
                id, FIELD_LIKES, raw_likes
            ))
        })?;

        Ok(Self {
            id: id.to_string(),
            title,
            artist,
            price,
            likes,
        })
    }

    /// Encode into the stored field map (the id is not included).
    pub fn encode(&self) -> FieldMap {
        let mut fields = FieldMap::with_capacity(4);
        fields.insert(FIELD_TITLE.to_string(), self.title.clone());
        fields.insert(FIELD_ARTIST.to_string(), self.artist.clone());
        fields.insert(FIELD_PRICE.to_string(), self.price.to_string());
        fields.insert(FIELD_LIKES.to_string(), self.likes.to_string());
        fields
    }
}

fn required<'a>(id: &str, fields: &'a FieldMap, name: &str) -> Result<&'a str> {
    fields.get(name).map(String::as_str).ok_or_else(|| {
        StoreError::DecodeError(format!("entity '{}': missing field '{}'", id, name))
    })
}

/// An entity together with the leaderboard score read in the same snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntity {
    pub entity: Entity,
    pub score: f64,
}

impl RankedEntity {
    /// `true` when the stored counter agrees with the leaderboard score.
    pub fn is_consistent(&self) -> bool {
        self.entity.likes as f64 == self.score
    }
}

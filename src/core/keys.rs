/// Default prefix of entity records (`entity:<id>`).
pub const DEFAULT_ENTITY_PREFIX: &str = "entity";

/// Default key of the shared leaderboard.
pub const DEFAULT_LEADERBOARD_KEY: &str = "popularity";

/// Key shapes used against the backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    pub entity_prefix: String,
    pub leaderboard: String,
}

impl KeyLayout {
    pub fn new(entity_prefix: &str, leaderboard: &str) -> Self {
        Self {
            entity_prefix: entity_prefix.to_string(),
            leaderboard: leaderboard.to_string(),
        }
    }

    pub fn entity_key(&self, id: &str) -> String {
        format!("{}:{}", self.entity_prefix, id)
    }

    pub fn leaderboard_key(&self) -> &str {
        &self.leaderboard
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.entity_prefix.is_empty() {
            return Err("entity prefix cannot be empty".to_string());
        }
        if self.leaderboard.is_empty() {
            return Err("leaderboard key cannot be empty".to_string());
        }
        if self.leaderboard.starts_with(&format!("{}:", self.entity_prefix)) {
            return Err("leaderboard key cannot live inside the entity keyspace".to_string());
        }
        Ok(())
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new(DEFAULT_ENTITY_PREFIX, DEFAULT_LEADERBOARD_KEY)
    }
}

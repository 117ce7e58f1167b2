//! Ordered turn history: projection, filtering, trimming and persistence.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::KestrelError;
use crate::types::{SerializableTurn, Turn, TurnRole};

/// Ordered sequence of turns for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Turns appended after the first `len` turns.
    pub fn since(&self, len: usize) -> &[Turn] {
        &self.turns[len.min(self.turns.len())..]
    }

    /// Drop every turn after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.turns.truncate(len);
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Serializable projection: role + text only, tool turns dropped.
    pub fn export(&self) -> Vec<SerializableTurn> {
        export_turns(&self.turns)
    }

    /// Rebuild a history from its serializable projection.
    pub fn import(records: Vec<SerializableTurn>) -> Self {
        Self {
            turns: records
                .into_iter()
                .filter_map(SerializableTurn::into_turn)
                .collect(),
        }
    }

    /// Keep text turns, and tool turns whose tool is still known.
    pub fn retain_known_tools(&mut self, is_known: impl Fn(&str) -> bool) {
        self.turns
            .retain(|turn| turn.tool_name().map_or(true, |name| is_known(name)));
    }

    /// Keep only the suffix starting at the `max_user_turns`-th most recent
    /// user turn. Zero leaves the history unchanged.
    pub fn trim_to_user_turns(&mut self, max_user_turns: usize) {
        let trimmed = trim_history(&self.turns, max_user_turns);
        if trimmed.len() != self.turns.len() {
            self.turns = trimmed;
        }
    }

    /// Human-readable dump, one turn per line.
    pub fn render(&self) -> String {
        render_turns(&self.turns)
    }

    pub fn to_json(&self) -> Result<String, KestrelError> {
        Ok(serde_json::to_string_pretty(&self.export())?)
    }

    pub fn from_json(raw: &str) -> Result<Self, KestrelError> {
        let records: Vec<SerializableTurn> = serde_json::from_str(raw)?;
        Ok(Self::import(records))
    }

    /// Persist the serializable projection to `path`.
    pub async fn save(&self, path: &Path) -> Result<(), KestrelError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_json()?).await?;
        Ok(())
    }

    /// Load a previously saved projection.
    pub async fn load(path: &Path) -> Result<Self, KestrelError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json(&raw)
    }
}

impl From<Vec<Turn>> for History {
    fn from(turns: Vec<Turn>) -> Self {
        Self::from_turns(turns)
    }
}

/// Serializable projection of a slice of turns.
pub fn export_turns(turns: &[Turn]) -> Vec<SerializableTurn> {
    turns.iter().filter_map(SerializableTurn::from_turn).collect()
}

/// Trim to the last `max_user_turns` user turns and everything after the
/// earliest kept one.
pub fn trim_history(turns: &[Turn], max_user_turns: usize) -> Vec<Turn> {
    if max_user_turns == 0 {
        return turns.to_vec();
    }
    let mut seen = 0;
    for (i, turn) in turns.iter().enumerate().rev() {
        if turn.role() == TurnRole::User {
            seen += 1;
            if seen == max_user_turns {
                return turns[i..].to_vec();
            }
        }
    }
    turns.to_vec()
}

pub fn render_turns(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

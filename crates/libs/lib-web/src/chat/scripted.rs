//! # Scripted Replies
//!
//! Static `(persona, content_key) → reply` table used when `REPLY_MODE=scripted`.
//! Lookups ignore case and surrounding whitespace on both keys.
//!
//! The built-in table can be replaced by a JSON file of the shape
//! `{ "elephant": { "hello": "..." } }` named by `SCRIPTED_REPLIES_PATH`.

use lib_core::{AppError, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

const BUILTIN: &[(&str, &[(&str, &str)])] = &[
    (
        "elephant",
        &[
            ("hello", "The elephant raises its trunk and lets out a friendly trumpet!"),
            ("food", "The elephant enjoys munching on leaves and branches."),
            (
                "fun_fact",
                "Elephants can communicate over long distances using low-frequency sounds!",
            ),
        ],
    ),
    (
        "lizard",
        &[
            ("hello", "The lizard flicks its tongue and curiously tilts its head."),
            ("food", "This lizard loves to eat insects and small bugs."),
            (
                "fun_fact",
                "Some lizards can detach their tails to escape from predators!",
            ),
        ],
    ),
];

/// Canned persona replies keyed by persona, then content key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScriptedReplies {
    table: HashMap<String, HashMap<String, String>>,
}

fn normalize(key: &str) -> String {
    key.trim().to_lowercase()
}

impl ScriptedReplies {
    /// The built-in elephant and lizard table.
    pub fn builtin() -> Self {
        let table = BUILTIN
            .iter()
            .map(|(persona, replies)| {
                let replies = replies
                    .iter()
                    .map(|(key, reply)| (normalize(key), reply.to_string()))
                    .collect();
                (normalize(persona), replies)
            })
            .collect();

        Self { table }
    }

    /// Parse a `{persona: {key: reply}}` JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: HashMap<String, HashMap<String, String>> = serde_json::from_str(json)
            .map_err(|e| AppError::Config(format!("Invalid scripted replies: {}", e)))?;

        let table = raw
            .into_iter()
            .map(|(persona, replies)| {
                let replies = replies
                    .into_iter()
                    .map(|(key, reply)| (normalize(&key), reply))
                    .collect();
                (normalize(&persona), replies)
            })
            .collect();

        Ok(Self { table })
    }

    /// Load the table from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Cannot read scripted replies '{}': {}", path.display(), e))
        })?;

        let replies = Self::from_json_str(&json)?;
        info!(
            "[SCRIPTED] Loaded {} personas from {}",
            replies.persona_count(),
            path.display()
        );
        Ok(replies)
    }

    /// The file at `path` when given, otherwise the built-in table.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::builtin()),
        }
    }

    pub fn lookup(&self, persona: &str, key: &str) -> Option<&str> {
        self.table
            .get(&normalize(persona))?
            .get(&normalize(key))
            .map(String::as_str)
    }

    pub fn persona_count(&self) -> usize {
        self.table.len()
    }
}

// Copyright 2025 Fernando Borretti
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs::read_to_string;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Fallible;
use crate::error::fail;

/// Everything the synchronizer needs to know, built once and passed down by
/// reference.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the vocabulary service, without the `/vocabulary` suffix.
    pub api_base_url: String,
    /// Timeout for each request to the vocabulary service.
    pub request_timeout_secs: u64,
    /// Path to the local collection database.
    pub collection_path: String,
    /// The note model new notes are created with.
    pub default_model_name: String,
    pub fields: FieldMapping,
    pub import: ImportConfig,
}

/// Which note field receives which part of a card.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldMapping {
    pub front: String,
    pub back: String,
    pub description: String,
}

/// Deck names used when importing from a file.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    /// Receives front-to-back cards.
    pub forward_deck: String,
    /// Receives back-to-front cards.
    pub reverse_deck: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:9001".to_string(),
            request_timeout_secs: 30,
            collection_path: "collection.sqlite3".to_string(),
            default_model_name: "Basic".to_string(),
            fields: FieldMapping::default(),
            import: ImportConfig::default(),
        }
    }
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            front: "Front".to_string(),
            back: "Back".to_string(),
            description: "Description".to_string(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            forward_deck: "Language A->B".to_string(),
            reverse_deck: "Language B->A".to_string(),
        }
    }
}

impl Config {
    /// Load a TOML configuration file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Fallible<Self> {
        if !path.exists() {
            return fail(format!("config file {} does not exist.", path.display()));
        }
        let content = read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Fallible<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Fallible<()> {
        if self.api_base_url.trim().is_empty() {
            return fail("api_base_url must not be empty.");
        }
        if self.request_timeout_secs == 0 {
            return fail("request_timeout_secs must be positive.");
        }
        if self.default_model_name.trim().is_empty() {
            return fail("default_model_name must not be empty.");
        }
        let names = self.fields.names();
        for name in names {
            if name.trim().is_empty() {
                return fail("field names must not be empty.");
            }
        }
        if names[0] == names[1] || names[0] == names[2] || names[1] == names[2] {
            return fail("front, back and description must map to distinct fields.");
        }
        Ok(())
    }

    /// The flashcards endpoint of the vocabulary service.
    pub fn flashcards_endpoint(&self) -> String {
        format!(
            "{}/vocabulary/flashcards",
            self.api_base_url.trim_end_matches('/')
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl FieldMapping {
    /// The mapped field names, in front/back/description order.
    pub fn names(&self) -> [&str; 3] {
        [&self.front, &self.back, &self.description]
    }
}

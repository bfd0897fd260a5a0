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

use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;

use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::Fallible;
use crate::types::outcome::CardOutcome;
use crate::types::remote_id::RemoteId;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Failure talking to the vocabulary service.
#[derive(Clone, PartialEq, Debug)]
pub enum RemoteError {
    /// The service could not be reached, or the request timed out.
    Transport(String),
    /// The service answered with an error status or a body we cannot read.
    Protocol(String),
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            RemoteError::Transport(msg) => write!(f, "transport error: {msg}"),
            RemoteError::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl Error for RemoteError {}

impl From<reqwest::Error> for RemoteError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() || value.is_status() {
            RemoteError::Protocol(value.to_string())
        } else {
            RemoteError::Transport(value.to_string())
        }
    }
}

/// The remote side of a cycle.
pub trait RemoteCatalog {
    /// Fetch the raw payloads of every card the service marks as pending.
    fn fetch_pending(&self) -> Result<Vec<Value>, RemoteError>;

    /// Tell the service which cards were applied locally, so it clears their
    /// pending flag. Outcomes that were not applied are ignored.
    fn acknowledge(&self, outcomes: &[CardOutcome]) -> Result<(), RemoteError>;
}

/// A card as it travels over the wire.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCard {
    pub deck: String,
    pub front: String,
    pub back: String,
    pub updated: bool,
    pub id: RemoteId,
    pub anki_id: Option<String>,
    pub description: String,
}

/// The acknowledgement body: every applied card, marked as synced and
/// carrying its local GUID.
pub fn acknowledgement_payload(outcomes: &[CardOutcome]) -> Vec<WireCard> {
    outcomes
        .iter()
        .filter(|outcome| outcome.is_applied())
        .filter_map(|outcome| {
            let record = outcome.record.as_ref()?;
            let guid = outcome.local_guid.as_ref()?;
            Some(WireCard {
                deck: record.deck_name.clone(),
                front: record.front.clone(),
                back: record.back.clone(),
                updated: false,
                id: record.remote_id.clone(),
                anki_id: Some(guid.clone()),
                description: record.description.clone(),
            })
        })
        .collect()
}

/// [`RemoteCatalog`] over the service's JSON HTTP API.
pub struct HttpCatalog {
    client: Client,
    endpoint: String,
}

impl HttpCatalog {
    pub fn new(config: &Config) -> Fallible<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            endpoint: config.flashcards_endpoint(),
        })
    }
}

impl RemoteCatalog for HttpCatalog {
    fn fetch_pending(&self) -> Result<Vec<Value>, RemoteError> {
        let url = format!("{}?updated=true", self.endpoint);
        log::debug!("GET {url}");
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()?;
        let status = response.status();
        log::debug!("GET {url} returned {status}");
        if !status.is_success() {
            return Err(RemoteError::Protocol(format!("GET {url} returned {status}")));
        }
        let body = response.text()?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| RemoteError::Protocol(format!("undecodable response body: {e}")))?;
        match value {
            Value::Array(cards) => Ok(cards),
            _ => Err(RemoteError::Protocol(
                "expected a JSON array of cards".to_string(),
            )),
        }
    }

    fn acknowledge(&self, outcomes: &[CardOutcome]) -> Result<(), RemoteError> {
        let payload = acknowledgement_payload(outcomes);
        if payload.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_string(&payload)
            .map_err(|e| RemoteError::Protocol(format!("cannot encode acknowledgement: {e}")))?;
        log::debug!("PUT {} ({} cards)", self.endpoint, payload.len());
        let response = self
            .client
            .put(&self.endpoint)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body)
            .send()?;
        let status = response.status();
        log::debug!("PUT {} returned {status}", self.endpoint);
        if !status.is_success() {
            return Err(RemoteError::Protocol(format!(
                "PUT {} returned {status}",
                self.endpoint
            )));
        }
        Ok(())
    }
}

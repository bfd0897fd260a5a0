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

use std::fmt::Display;
use std::fmt::Formatter;

use serde::Serialize;

use crate::types::card_record::CardRecord;
use crate::types::remote_id::RemoteId;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Created,
    Updated,
    Skipped,
    Failed,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::Created => "created",
            CardStatus::Updated => "updated",
            CardStatus::Skipped => "skipped",
            CardStatus::Failed => "failed",
        }
    }
}

impl Display for CardStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happened to one remote card during a cycle.
#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardOutcome {
    /// Absent only when the payload was too malformed to carry an ID.
    pub remote_id: Option<RemoteId>,
    pub status: CardStatus,
    /// Why the card was skipped or failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The local GUID, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_guid: Option<String>,
    /// The validated record, kept so acknowledgements can echo it back.
    #[serde(skip)]
    pub record: Option<CardRecord>,
}

impl CardOutcome {
    pub fn created(record: CardRecord, local_guid: String) -> Self {
        Self::applied(record, local_guid, CardStatus::Created)
    }

    pub fn updated(record: CardRecord, local_guid: String) -> Self {
        Self::applied(record, local_guid, CardStatus::Updated)
    }

    fn applied(record: CardRecord, local_guid: String, status: CardStatus) -> Self {
        Self {
            remote_id: Some(record.remote_id.clone()),
            status,
            reason: None,
            local_guid: Some(local_guid),
            record: Some(record),
        }
    }

    pub fn skipped(record: CardRecord, reason: impl Into<String>) -> Self {
        Self {
            remote_id: Some(record.remote_id.clone()),
            status: CardStatus::Skipped,
            reason: Some(reason.into()),
            local_guid: None,
            record: Some(record),
        }
    }

    pub fn failed(remote_id: Option<RemoteId>, reason: impl Into<String>) -> Self {
        Self {
            remote_id,
            status: CardStatus::Failed,
            reason: Some(reason.into()),
            local_guid: None,
            record: None,
        }
    }

    /// Whether the card was written to the local collection. Only these
    /// outcomes are acknowledged to the service.
    pub fn is_applied(&self) -> bool {
        matches!(self.status, CardStatus::Created | CardStatus::Updated)
    }
}

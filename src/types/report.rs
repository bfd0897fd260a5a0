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

use serde::Serialize;

use crate::types::outcome::CardOutcome;
use crate::types::outcome::CardStatus;
use crate::types::timestamp::Timestamp;

/// The result of one synchronization cycle. Owned by whoever ran the cycle.
#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// One outcome per fetched card, in fetch order.
    pub outcomes: Vec<CardOutcome>,
    pub counts: StatusCounts,
    pub started_at: Timestamp,
    pub ended_at: Timestamp,
    pub acknowledgement: AckStatus,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize)]
pub struct StatusCounts {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Whether the service was told about the applied cards.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum AckStatus {
    /// The given number of cards were acknowledged.
    Completed { count: usize },
    /// No card was applied, so there was nothing to acknowledge.
    NotNeeded,
    /// The acknowledgement request failed. Local changes stand; the service
    /// will offer the cards again next cycle.
    Failed { reason: String },
}

impl StatusCounts {
    pub fn tally(outcomes: &[CardOutcome]) -> Self {
        let mut counts = Self::default();
        for outcome in outcomes {
            counts.record(outcome.status);
        }
        counts
    }

    pub fn record(&mut self, status: CardStatus) {
        match status {
            CardStatus::Created => self.created += 1,
            CardStatus::Updated => self.updated += 1,
            CardStatus::Skipped => self.skipped += 1,
            CardStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped + self.failed
    }
}

impl SyncReport {
    pub fn new(
        outcomes: Vec<CardOutcome>,
        started_at: Timestamp,
        ended_at: Timestamp,
        acknowledgement: AckStatus,
    ) -> Self {
        let counts = StatusCounts::tally(&outcomes);
        Self {
            outcomes,
            counts,
            started_at,
            ended_at,
            acknowledgement,
        }
    }

    /// True if the acknowledgement request was attempted and failed.
    pub fn ack_failed(&self) -> bool {
        matches!(self.acknowledgement, AckStatus::Failed { .. })
    }

    pub fn summary(&self) -> String {
        format!(
            "{} created, {} updated, {} skipped, {} failed",
            self.counts.created, self.counts.updated, self.counts.skipped, self.counts.failed
        )
    }
}

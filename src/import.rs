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

//! Import cards from a newline-delimited JSON file into a pair of decks:
//! one drilled front to back, the other back to front.

use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fs::read_to_string;
use std::path::Path;

use serde::Deserialize;

use crate::collection::DeckHandle;
use crate::collection::LocalCollection;
use crate::collection::StoreError;
use crate::config::ImportConfig;
use crate::error::Fallible;
use crate::error::fail;
use crate::types::card_record::CardRecord;
use crate::types::card_record::MalformedCard;
use crate::types::card_record::Problem;
use crate::types::identity::derive_guid_from_parts;
use crate::types::outcome::CardOutcome;
use crate::types::remote_id::RemoteId;
use crate::types::report::StatusCounts;

/// One line of an import file. Other keys on the line are ignored.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct ImportCard {
    pub front: String,
    pub back: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct ImportError {
    /// 1-based.
    pub line: usize,
    pub message: String,
}

impl Display for ImportError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "import file line {}: {}", self.line, self.message)
    }
}

impl Error for ImportError {}

pub fn parse_file(path: &Path) -> Fallible<Vec<ImportCard>> {
    if !path.exists() {
        return fail(format!("import file {} does not exist.", path.display()));
    }
    let content = read_to_string(path)?;
    Ok(parse_lines(&content)?)
}

/// Parse the contents of an import file. Blank lines are skipped.
pub fn parse_lines(content: &str) -> Result<Vec<ImportCard>, ImportError> {
    let mut cards = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let card: ImportCard = serde_json::from_str(line).map_err(|e| ImportError {
            line: index + 1,
            message: e.to_string(),
        })?;
        cards.push(card);
    }
    Ok(cards)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct ImportSummary {
    pub forward: StatusCounts,
    pub reverse: StatusCounts,
    /// For each card, the forward outcome then the reverse one.
    pub outcomes: Vec<CardOutcome>,
}

pub struct Importer<'a, L: LocalCollection + ?Sized> {
    local: &'a mut L,
    decks: &'a ImportConfig,
}

impl<'a, L: LocalCollection + ?Sized> Importer<'a, L> {
    pub fn new(local: &'a mut L, decks: &'a ImportConfig) -> Self {
        Self { local, decks }
    }

    /// Import the cards in the enabled directions. Importing the same file
    /// twice updates the notes the first import created. Fails only if a
    /// deck cannot be resolved.
    pub fn import(
        &mut self,
        cards: &[ImportCard],
        forward: bool,
        reverse: bool,
    ) -> Result<ImportSummary, StoreError> {
        let mut targets: Vec<(Direction, DeckHandle)> = Vec::new();
        if forward {
            let deck = self.local.ensure_deck(&self.decks.forward_deck)?;
            targets.push((Direction::Forward, deck));
        }
        if reverse {
            let deck = self.local.ensure_deck(&self.decks.reverse_deck)?;
            targets.push((Direction::Reverse, deck));
        }
        let mut summary = ImportSummary::default();
        for card in cards {
            for (direction, deck) in &targets {
                let outcome = self.import_card(card, *direction, deck);
                match direction {
                    Direction::Forward => summary.forward.record(outcome.status),
                    Direction::Reverse => summary.reverse.record(outcome.status),
                }
                summary.outcomes.push(outcome);
            }
        }
        log::info!(
            "Imported {} card(s): {} forward, {} reverse.",
            cards.len(),
            summary.forward.created + summary.forward.updated,
            summary.reverse.created + summary.reverse.updated
        );
        Ok(summary)
    }

    fn import_card(&mut self, card: &ImportCard, direction: Direction, deck: &DeckHandle) -> CardOutcome {
        let guid = derive_guid_from_parts(&["import", direction.as_str(), &card.front, &card.back]);
        let remote_id = RemoteId::Text(format!("import:{guid}"));
        for (field, value) in [("front", &card.front), ("back", &card.back)] {
            if value.trim().is_empty() {
                let error = MalformedCard {
                    field,
                    problem: Problem::Blank,
                };
                log::warn!("Skipping imported card: {error}");
                return CardOutcome::failed(Some(remote_id), error.to_string());
            }
        }
        let (front, back) = match direction {
            Direction::Forward => (&card.front, &card.back),
            Direction::Reverse => (&card.back, &card.front),
        };
        let record = CardRecord {
            deck_name: deck.name.clone(),
            front: front.clone(),
            back: back.clone(),
            description: card.description.clone().unwrap_or_default(),
            remote_id,
            local_guid: Some(guid),
            pending: true,
        };
        match self.local.upsert(deck, &record) {
            Ok((note, true)) => CardOutcome::created(record, note.guid),
            Ok((note, false)) => CardOutcome::updated(record, note.guid),
            Err(e) => {
                log::error!("Failed to import card '{}': {e}", card.front);
                CardOutcome::failed(Some(record.remote_id), e.to_string())
            }
        }
    }
}

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

use std::collections::HashMap;

use serde_json::Value;

use crate::collection::DeckHandle;
use crate::collection::LocalCollection;
use crate::collection::StoreError;
use crate::remote::RemoteCatalog;
use crate::remote::RemoteError;
use crate::types::card_record::CardRecord;
use crate::types::outcome::CardOutcome;
use crate::types::remote_id::RemoteId;
use crate::types::report::AckStatus;
use crate::types::report::SyncReport;
use crate::types::timestamp::Timestamp;

/// Runs fetch → reconcile → acknowledge cycles between a remote catalog and
/// a local collection. Keeps no state between cycles: the service's pending
/// flag is the only record of what still needs doing.
pub struct Synchronizer<'a, R: RemoteCatalog + ?Sized, L: LocalCollection + ?Sized> {
    remote: &'a R,
    local: &'a mut L,
}

impl<'a, R: RemoteCatalog + ?Sized, L: LocalCollection + ?Sized> Synchronizer<'a, R, L> {
    pub fn new(remote: &'a R, local: &'a mut L) -> Self {
        Self { remote, local }
    }

    /// Run one cycle. Fails only if the pending cards cannot be fetched, in
    /// which case nothing has been touched. Per-card failures and a failed
    /// acknowledgement are reported in the returned [`SyncReport`].
    pub fn run_cycle(&mut self) -> Result<SyncReport, RemoteError> {
        let started_at = Timestamp::now();
        log::info!("Fetching pending cards...");
        let payloads = match self.remote.fetch_pending() {
            Ok(payloads) => payloads,
            Err(e) => {
                log::error!("Failed to fetch pending cards: {e}");
                return Err(e);
            }
        };
        log::info!("{} pending card(s).", payloads.len());

        // Decks resolved so far in this cycle.
        let mut decks: HashMap<String, DeckHandle> = HashMap::new();
        let outcomes: Vec<CardOutcome> = payloads
            .iter()
            .map(|payload| self.reconcile(payload, &mut decks))
            .collect();

        let applied: Vec<CardOutcome> = outcomes
            .iter()
            .filter(|outcome| outcome.is_applied())
            .cloned()
            .collect();
        let acknowledgement = if applied.is_empty() {
            AckStatus::NotNeeded
        } else {
            match self.remote.acknowledge(&applied) {
                Ok(()) => {
                    log::info!("Acknowledged {} card(s).", applied.len());
                    AckStatus::Completed {
                        count: applied.len(),
                    }
                }
                Err(e) => {
                    log::error!("Failed to acknowledge synced cards: {e}");
                    AckStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        };

        let report = SyncReport::new(outcomes, started_at, Timestamp::now(), acknowledgement);
        log::info!("Synchronization finished: {}.", report.summary());
        Ok(report)
    }

    fn reconcile(&mut self, payload: &Value, decks: &mut HashMap<String, DeckHandle>) -> CardOutcome {
        let record = match CardRecord::from_value(payload) {
            Ok(record) => record,
            Err(e) => {
                let remote_id = payload.get("id").and_then(RemoteId::from_value);
                log::warn!("Rejecting card {}: {e}", describe(remote_id.as_ref()));
                return CardOutcome::failed(remote_id, e.to_string());
            }
        };
        if !record.pending {
            log::debug!("Card {} is not pending", record.remote_id);
            return CardOutcome::skipped(record, "not pending");
        }
        let deck = match self.deck(&record.deck_name, decks) {
            Ok(deck) => deck,
            Err(e) => {
                log::error!("Failed to process card {}: {e}", record.remote_id);
                return CardOutcome::failed(Some(record.remote_id), e.to_string());
            }
        };
        match self.local.upsert(&deck, &record) {
            Ok((note, true)) => CardOutcome::created(record, note.guid),
            Ok((note, false)) => CardOutcome::updated(record, note.guid),
            Err(e) => {
                log::error!("Failed to process card {}: {e}", record.remote_id);
                CardOutcome::failed(Some(record.remote_id), e.to_string())
            }
        }
    }

    fn deck(
        &mut self,
        name: &str,
        decks: &mut HashMap<String, DeckHandle>,
    ) -> Result<DeckHandle, StoreError> {
        if let Some(deck) = decks.get(name) {
            return Ok(deck.clone());
        }
        let deck = self.local.ensure_deck(name)?;
        decks.insert(name.to_string(), deck.clone());
        Ok(deck)
    }
}

fn describe(remote_id: Option<&RemoteId>) -> String {
    match remote_id {
        Some(id) => id.to_string(),
        None => "without id".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::collection::NoteHandle;
    use crate::collection::SqliteCollection;
    use crate::config::Config;
    use crate::error::Fallible;
    use crate::helper::MemoryCatalog;
    use crate::helper::wire_card;
    use crate::types::identity::IdentityKey;
    use crate::types::outcome::CardStatus;

    fn house() -> Value {
        json!({
            "deck": "German",
            "front": "das Haus",
            "back": "house",
            "updated": true,
            "id": 123,
            "ankiId": null,
            "description": "Basic building"
        })
    }

    fn collection() -> Fallible<SqliteCollection> {
        SqliteCollection::open_in_memory(&Config::default())
    }

    fn statuses(report: &SyncReport) -> Vec<CardStatus> {
        report.outcomes.iter().map(|o| o.status).collect()
    }

    /// Wraps a collection, counting deck lookups and failing upserts of
    /// chosen cards.
    struct Instrumented {
        inner: SqliteCollection,
        ensure_calls: HashMap<String, usize>,
        reject: Vec<RemoteId>,
    }

    impl Instrumented {
        fn new(inner: SqliteCollection) -> Self {
            Self {
                inner,
                ensure_calls: HashMap::new(),
                reject: Vec::new(),
            }
        }
    }

    impl LocalCollection for Instrumented {
        fn ensure_deck(&mut self, name: &str) -> Result<DeckHandle, StoreError> {
            *self.ensure_calls.entry(name.to_string()).or_default() += 1;
            self.inner.ensure_deck(name)
        }

        fn find_by_identity(&self, key: &IdentityKey) -> Result<Option<NoteHandle>, StoreError> {
            self.inner.find_by_identity(key)
        }

        fn upsert(
            &mut self,
            deck: &DeckHandle,
            record: &CardRecord,
        ) -> Result<(NoteHandle, bool), StoreError> {
            if self.reject.contains(&record.remote_id) {
                return Err(StoreError("note rejected".to_string()));
            }
            self.inner.upsert(deck, record)
        }
    }

    #[test]
    fn test_first_sync_creates_deck_and_card() -> Fallible<()> {
        let remote = MemoryCatalog::new(vec![house()]);
        let mut local = collection()?;
        let report = Synchronizer::new(&remote, &mut local).run_cycle()?;

        assert_eq!(statuses(&report), vec![CardStatus::Created]);
        assert_eq!(report.counts.created, 1);
        assert_eq!(report.counts.updated, 0);
        assert_eq!(report.counts.failed, 0);
        assert_eq!(report.acknowledgement, AckStatus::Completed { count: 1 });
        assert!(report.started_at <= report.ended_at);

        assert_eq!(local.deck_count()?, 1);
        assert_eq!(local.note_count()?, 1);
        let note = local
            .find_by_identity(&IdentityKey::remote(&RemoteId::Int(123)))?
            .ok_or_else(|| crate::error::ErrorReport::new("note not found"))?;
        let fields = local.note_fields(&note)?;
        assert_eq!(fields.get("Front").map(String::as_str), Some("das Haus"));
        assert_eq!(fields.get("Back").map(String::as_str), Some("house"));
        assert_eq!(local.note_deck(&note)?, Some("German".to_string()));

        let acknowledged = remote.acknowledged();
        assert_eq!(acknowledged.len(), 1);
        assert_eq!(acknowledged[0], report.outcomes);
        Ok(())
    }

    #[test]
    fn test_second_sync_updates_in_place() -> Fallible<()> {
        let remote = MemoryCatalog::new(vec![house()]);
        let mut local = collection()?;
        let first = Synchronizer::new(&remote, &mut local).run_cycle()?;
        let guid = first.outcomes[0].local_guid.clone();

        // The service now echoes the local GUID back.
        assert_eq!(remote.cards()[0]["ankiId"], json!(guid));
        remote.touch(123);

        let note = local
            .find_by_identity(&IdentityKey::remote(&RemoteId::Int(123)))?
            .ok_or_else(|| crate::error::ErrorReport::new("note not found"))?;
        assert_eq!(Some(note.guid.clone()), guid);
        let before = local.note_fields(&note)?;
        let second = Synchronizer::new(&remote, &mut local).run_cycle()?;
        assert_eq!(statuses(&second), vec![CardStatus::Updated]);
        assert_eq!(second.counts.created, 0);
        assert_eq!(second.outcomes[0].local_guid, guid);
        assert_eq!(local.note_count()?, 1);
        assert_eq!(local.deck_count()?, 1);
        assert_eq!(local.note_fields(&note)?, before);
        Ok(())
    }

    #[test]
    fn test_failed_acknowledgement_is_reported_and_safe_to_retry() -> Fallible<()> {
        let remote = MemoryCatalog::new(vec![house()]);
        remote.fail_acknowledgements(Some(RemoteError::Transport("timed out".to_string())));
        let mut local = collection()?;
        let first = Synchronizer::new(&remote, &mut local).run_cycle()?;
        assert!(first.ack_failed());
        assert_eq!(statuses(&first), vec![CardStatus::Created]);
        assert_eq!(local.note_count()?, 1);

        // The card is offered again, still without a GUID.
        remote.fail_acknowledgements(None);
        assert_eq!(remote.cards()[0]["ankiId"], Value::Null);
        let second = Synchronizer::new(&remote, &mut local).run_cycle()?;
        assert_eq!(statuses(&second), vec![CardStatus::Updated]);
        assert_eq!(second.acknowledgement, AckStatus::Completed { count: 1 });
        assert_eq!(local.note_count()?, 1);
        Ok(())
    }

    #[test]
    fn test_fetch_failure_aborts_cycle() -> Fallible<()> {
        let remote =
            MemoryCatalog::failing_fetch(RemoteError::Transport("connection refused".to_string()));
        let mut local = collection()?;
        let result = Synchronizer::new(&remote, &mut local).run_cycle();
        assert_eq!(
            result,
            Err(RemoteError::Transport("connection refused".to_string()))
        );
        assert_eq!(local.deck_count()?, 0);
        assert_eq!(local.note_count()?, 0);
        assert!(remote.acknowledged().is_empty());
        Ok(())
    }

    #[test]
    fn test_malformed_card_is_isolated() -> Fallible<()> {
        let remote = MemoryCatalog::new(vec![
            wire_card(1, "German", "der Hund", "dog"),
            wire_card(2, "German", "", "cat"),
            wire_card(3, "German", "die Maus", "mouse"),
        ]);
        let mut local = collection()?;
        let report = Synchronizer::new(&remote, &mut local).run_cycle()?;
        assert_eq!(
            statuses(&report),
            vec![CardStatus::Created, CardStatus::Failed, CardStatus::Created]
        );
        let failed = &report.outcomes[1];
        assert_eq!(failed.remote_id, Some(RemoteId::Int(2)));
        assert!(
            failed
                .reason
                .as_deref()
                .is_some_and(|r| r.starts_with("malformed"))
        );
        assert_eq!(local.note_count()?, 2);

        let acknowledged = remote.acknowledged();
        assert_eq!(acknowledged.len(), 1);
        let ids: Vec<Option<RemoteId>> =
            acknowledged[0].iter().map(|o| o.remote_id.clone()).collect();
        assert_eq!(ids, vec![Some(RemoteId::Int(1)), Some(RemoteId::Int(3))]);
        Ok(())
    }

    #[test]
    fn test_store_failure_is_isolated() -> Fallible<()> {
        let remote = MemoryCatalog::new(vec![
            wire_card(1, "German", "der Hund", "dog"),
            wire_card(2, "German", "die Katze", "cat"),
        ]);
        let mut local = Instrumented::new(collection()?);
        local.reject.push(RemoteId::Int(1));
        let report = Synchronizer::new(&remote, &mut local).run_cycle()?;
        assert_eq!(
            statuses(&report),
            vec![CardStatus::Failed, CardStatus::Created]
        );
        assert_eq!(
            report.outcomes[0].reason.as_deref(),
            Some("local store error: note rejected")
        );
        assert_eq!(remote.acknowledged()[0].len(), 1);
        // The rejected card stays pending on the service.
        assert_eq!(remote.cards()[0]["updated"], json!(true));
        assert_eq!(remote.cards()[1]["updated"], json!(false));
        Ok(())
    }

    #[test]
    fn test_closed_store_fails_every_card() -> Fallible<()> {
        let remote = MemoryCatalog::new(vec![house(), wire_card(4, "German", "a", "b")]);
        let mut local = collection()?;
        local.close();
        let report = Synchronizer::new(&remote, &mut local).run_cycle()?;
        assert_eq!(report.counts.failed, 2);
        assert_eq!(report.acknowledgement, AckStatus::NotNeeded);
        assert!(remote.acknowledged().is_empty());
        Ok(())
    }

    #[test]
    fn test_each_deck_is_resolved_once_per_cycle() -> Fallible<()> {
        let remote = MemoryCatalog::new(vec![
            wire_card(1, "Spanish", "el perro", "dog"),
            wire_card(2, "Spanish", "el gato", "cat"),
            wire_card(3, "French", "le chien", "dog"),
        ]);
        let mut local = Instrumented::new(collection()?);
        let report = Synchronizer::new(&remote, &mut local).run_cycle()?;
        assert_eq!(report.counts.created, 3);
        assert_eq!(local.ensure_calls.get("Spanish"), Some(&1));
        assert_eq!(local.ensure_calls.get("French"), Some(&1));
        assert_eq!(local.inner.deck_count()?, 2);
        Ok(())
    }

    #[test]
    fn test_same_card_twice_in_one_batch() -> Fallible<()> {
        let remote = MemoryCatalog::new(vec![
            wire_card(1, "German", "das Haus", "house"),
            wire_card(1, "German", "das Haus", "home"),
        ]);
        let mut local = collection()?;
        let report = Synchronizer::new(&remote, &mut local).run_cycle()?;
        assert_eq!(
            statuses(&report),
            vec![CardStatus::Created, CardStatus::Updated]
        );
        assert_eq!(local.note_count()?, 1);
        let note = local
            .find_by_identity(&IdentityKey::remote(&RemoteId::Int(1)))?
            .ok_or_else(|| crate::error::ErrorReport::new("note not found"))?;
        let fields = local.note_fields(&note)?;
        assert_eq!(fields.get("Back").map(String::as_str), Some("home"));
        Ok(())
    }

    #[test]
    fn test_cards_not_pending_are_skipped() -> Fallible<()> {
        let mut stale = wire_card(5, "German", "alt", "old");
        stale["updated"] = json!(false);
        let remote = MemoryCatalog::new(vec![stale, house()]).unfiltered();
        let mut local = collection()?;
        let report = Synchronizer::new(&remote, &mut local).run_cycle()?;
        assert_eq!(
            statuses(&report),
            vec![CardStatus::Skipped, CardStatus::Created]
        );
        assert_eq!(report.outcomes[0].reason.as_deref(), Some("not pending"));
        assert_eq!(remote.acknowledged()[0].len(), 1);
        assert_eq!(local.note_count()?, 1);
        Ok(())
    }

    #[test]
    fn test_string_ids_are_kept_verbatim() -> Fallible<()> {
        let mut padded = wire_card(0, "German", "das Haus", "house");
        padded["id"] = json!(" 42 ");
        let mut plain = wire_card(0, "German", "der Hund", "dog");
        plain["id"] = json!("42");
        let remote = MemoryCatalog::new(vec![padded, plain]);
        let mut local = collection()?;
        let report = Synchronizer::new(&remote, &mut local).run_cycle()?;
        assert_eq!(
            statuses(&report),
            vec![CardStatus::Created, CardStatus::Created]
        );
        assert_eq!(
            report.outcomes[0].remote_id,
            Some(RemoteId::Text(" 42 ".to_string()))
        );
        assert_eq!(local.note_count()?, 2);

        // The acknowledgement echoes the ID the service sent, so it clears.
        assert!(remote.cards().iter().all(|card| card["updated"] == json!(false)));
        let second = Synchronizer::new(&remote, &mut local).run_cycle()?;
        assert!(second.outcomes.is_empty());
        Ok(())
    }

    #[test]
    fn test_nothing_pending() -> Fallible<()> {
        let remote = MemoryCatalog::new(vec![]);
        let mut local = collection()?;
        let report = Synchronizer::new(&remote, &mut local).run_cycle()?;
        assert!(report.outcomes.is_empty());
        assert_eq!(report.acknowledgement, AckStatus::NotNeeded);
        assert!(remote.acknowledged().is_empty());
        Ok(())
    }
}

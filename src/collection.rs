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

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;

use crate::config::Config;
use crate::config::FieldMapping;
use crate::db::Database;
use crate::db::DeckId;
use crate::db::InsertNote;
use crate::db::NoteId;
use crate::db::NoteRow;
use crate::db::insert_note;
use crate::db::set_field;
use crate::db::update_note;
use crate::error::ErrorReport;
use crate::error::Fallible;
use crate::types::card_record::CardRecord;
use crate::types::identity::IdentityKey;
use crate::types::identity::derive_guid;
use crate::types::identity::remote_key;
use crate::types::timestamp::Timestamp;

/// The local store rejected an operation, or is not available.
#[derive(Clone, PartialEq, Debug)]
pub struct StoreError(pub String);

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "local store error: {}", self.0)
    }
}

impl Error for StoreError {}

impl From<ErrorReport> for StoreError {
    fn from(value: ErrorReport) -> Self {
        StoreError(value.message().to_string())
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DeckHandle {
    pub id: DeckId,
    pub name: String,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NoteHandle {
    pub id: NoteId,
    pub guid: String,
}

/// The operations the synchronizer needs from a local flashcard store.
pub trait LocalCollection {
    /// Return the deck with the given name, creating it if needed.
    fn ensure_deck(&mut self, name: &str) -> Result<DeckHandle, StoreError>;

    /// Find the note stamped with the given identity.
    fn find_by_identity(&self, key: &IdentityKey) -> Result<Option<NoteHandle>, StoreError>;

    /// Create or update the note for a card. Returns the note and whether it
    /// was created. Either fully applied or not applied at all.
    fn upsert(
        &mut self,
        deck: &DeckHandle,
        record: &CardRecord,
    ) -> Result<(NoteHandle, bool), StoreError>;

    /// Find the note a card maps to: by its local GUID when it has one,
    /// falling back to the key derived from its remote ID.
    fn resolve(&self, record: &CardRecord) -> Result<Option<NoteHandle>, StoreError> {
        let key = record.identity();
        if let Some(note) = self.find_by_identity(&key)? {
            return Ok(Some(note));
        }
        match key {
            IdentityKey::Guid(_) => self.find_by_identity(&IdentityKey::remote(&record.remote_id)),
            IdentityKey::Remote(_) => Ok(None),
        }
    }
}

/// A [`LocalCollection`] backed by a SQLite database.
pub struct SqliteCollection {
    /// `None` once the collection has been closed.
    db: Option<Database>,
    fields: FieldMapping,
    model_name: String,
}

impl SqliteCollection {
    pub fn open(path: &str, config: &Config) -> Fallible<Self> {
        log::debug!("Opening collection: {path}");
        Self::with_database(Database::new(path)?, config)
    }

    pub fn open_in_memory(config: &Config) -> Fallible<Self> {
        Self::with_database(Database::in_memory()?, config)
    }

    /// Wrap a database, creating the configured note model if it does not
    /// exist yet. An existing model is left as it is.
    fn with_database(db: Database, config: &Config) -> Fallible<Self> {
        let collection = Self {
            db: Some(db),
            fields: config.fields.clone(),
            model_name: config.default_model_name.clone(),
        };
        collection.ensure_model(&config.default_model_name, &config.fields.names())?;
        Ok(collection)
    }

    /// Create a note model with the given fields unless one with that name
    /// already exists.
    pub fn ensure_model(&self, name: &str, fields: &[&str]) -> Result<(), StoreError> {
        let db = self.db()?;
        if db.find_model(name)?.is_none() {
            log::info!("Creating note model '{name}'");
            db.insert_model(name, fields)?;
        }
        Ok(())
    }

    /// Close the underlying database. Every later operation fails.
    pub fn close(&mut self) {
        self.db = None;
    }

    pub fn note_count(&self) -> Result<usize, StoreError> {
        Ok(self.db()?.note_count()?)
    }

    pub fn deck_count(&self) -> Result<usize, StoreError> {
        Ok(self.db()?.deck_count()?)
    }

    pub fn deck_name(&self, deck_id: DeckId) -> Result<Option<String>, StoreError> {
        Ok(self.db()?.deck_name(deck_id)?)
    }

    /// The note's fields, keyed by field name.
    pub fn note_fields(&self, note: &NoteHandle) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self.db()?.note_fields(note.id)?)
    }

    /// The note's deck.
    pub fn note_deck(&self, note: &NoteHandle) -> Result<Option<String>, StoreError> {
        let db = self.db()?;
        match db.find_note_by_guid(&note.guid)? {
            Some(row) => Ok(db.deck_name(row.deck_id)?),
            None => Ok(None),
        }
    }

    fn db(&self) -> Result<&Database, StoreError> {
        self.db
            .as_ref()
            .ok_or_else(|| StoreError("collection is closed".to_string()))
    }

    fn db_mut(&mut self) -> Result<&mut Database, StoreError> {
        self.db
            .as_mut()
            .ok_or_else(|| StoreError("collection is closed".to_string()))
    }

    fn find_row(&self, key: &IdentityKey) -> Result<Option<NoteRow>, StoreError> {
        let db = self.db()?;
        let row = match key {
            IdentityKey::Guid(guid) => db.find_note_by_guid(guid)?,
            IdentityKey::Remote(key) => db.find_note_by_remote_key(key)?,
        };
        Ok(row)
    }

    fn create(&mut self, deck: &DeckHandle, record: &CardRecord) -> Result<NoteHandle, StoreError> {
        let model_name = self.model_name.clone();
        let guid = record
            .local_guid
            .clone()
            .unwrap_or_else(|| derive_guid(&record.remote_id));
        let remote_key = remote_key(&record.remote_id);
        let fields = self.fields.clone();
        let db = self.db_mut()?;
        let model = db
            .find_model(&model_name)?
            .ok_or_else(|| StoreError(format!("model '{model_name}' not found")))?;
        check_fields(&format!("model '{model_name}'"), &model.fields, &fields)?;

        let tx = db.transaction()?;
        let note_id = insert_note(
            &tx,
            &InsertNote {
                guid: &guid,
                remote_key: &remote_key,
                deck_id: deck.id,
                model_id: model.model_id,
                created_at: Timestamp::now(),
            },
        )?;
        for (name, value) in mapped_values(&fields, record) {
            set_field(&tx, note_id, name, value)?;
        }
        tx.commit().map_err(ErrorReport::from)?;
        log::info!(
            "Created note {guid} for card {} in deck '{}'",
            record.remote_id,
            deck.name
        );
        Ok(NoteHandle { id: note_id, guid })
    }

    fn update(
        &mut self,
        row: NoteRow,
        deck: &DeckHandle,
        record: &CardRecord,
    ) -> Result<NoteHandle, StoreError> {
        let handle = NoteHandle {
            id: row.note_id,
            guid: row.guid.clone(),
        };
        let remote_key = remote_key(&record.remote_id);
        let current = self.db()?.note_fields(row.note_id)?;
        let unchanged = row.deck_id == deck.id
            && row.remote_key.is_some()
            && mapped_values(&self.fields, record)
                .iter()
                .all(|(name, value)| current.get(*name).map(String::as_str) == Some(*value));
        if unchanged {
            log::debug!("Note {} is up to date", row.guid);
            return Ok(handle);
        }

        let model_fields = self.db()?.model_fields(row.model_id)?;
        check_fields(
            &format!("model of note {}", row.guid),
            &model_fields,
            &self.fields,
        )?;
        let fields = self.fields.clone();
        let db = self.db_mut()?;
        let tx = db.transaction()?;
        update_note(&tx, row.note_id, deck.id, &remote_key, Timestamp::now())?;
        for (name, value) in mapped_values(&fields, record) {
            set_field(&tx, row.note_id, name, value)?;
        }
        tx.commit().map_err(ErrorReport::from)?;
        log::info!("Updated note {} for card {}", row.guid, record.remote_id);
        Ok(handle)
    }
}

impl LocalCollection for SqliteCollection {
    fn ensure_deck(&mut self, name: &str) -> Result<DeckHandle, StoreError> {
        let db = self.db()?;
        match db.find_deck(name)? {
            Some(id) => {
                let name = db.deck_name(id)?.unwrap_or_else(|| name.to_string());
                Ok(DeckHandle { id, name })
            }
            None => {
                let id = db.insert_deck(name)?;
                log::info!("Created deck '{name}'");
                Ok(DeckHandle {
                    id,
                    name: name.to_string(),
                })
            }
        }
    }

    fn find_by_identity(&self, key: &IdentityKey) -> Result<Option<NoteHandle>, StoreError> {
        Ok(self.find_row(key)?.map(|row| NoteHandle {
            id: row.note_id,
            guid: row.guid,
        }))
    }

    fn upsert(
        &mut self,
        deck: &DeckHandle,
        record: &CardRecord,
    ) -> Result<(NoteHandle, bool), StoreError> {
        let existing = match self.resolve(record)? {
            Some(note) => self.find_row(&IdentityKey::guid(note.guid))?,
            None => None,
        };
        match existing {
            Some(row) => Ok((self.update(row, deck, record)?, false)),
            None => Ok((self.create(deck, record)?, true)),
        }
    }
}

/// The mapped field values of a card, in front/back/description order.
fn mapped_values<'a>(fields: &'a FieldMapping, record: &'a CardRecord) -> [(&'a str, &'a str); 3] {
    [
        (fields.front.as_str(), record.front.as_str()),
        (fields.back.as_str(), record.back.as_str()),
        (fields.description.as_str(), record.description.as_str()),
    ]
}

/// Check that a model has every field the mapping writes to.
fn check_fields(
    model: &str,
    model_fields: &[String],
    mapping: &FieldMapping,
) -> Result<(), StoreError> {
    for name in mapping.names() {
        if !model_fields.iter().any(|f| f == name) {
            return Err(StoreError(format!("{model} has no field '{name}'")));
        }
    }
    Ok(())
}

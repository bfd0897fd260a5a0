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

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::config::DbConfig;

use crate::error::ErrorReport;
use crate::error::Fallible;
use crate::types::timestamp::Timestamp;

pub type DeckId = i64;
pub type ModelId = i64;
pub type NoteId = i64;

/// Thin wrapper around the collection's SQLite connection. Knows the schema,
/// nothing about remote cards.
pub struct Database {
    conn: Connection,
}

pub struct ModelRow {
    pub model_id: ModelId,
    pub fields: Vec<String>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct NoteRow {
    pub note_id: NoteId,
    pub guid: String,
    pub remote_key: Option<String>,
    pub deck_id: DeckId,
    pub model_id: ModelId,
}

pub struct InsertNote<'a> {
    pub guid: &'a str,
    pub remote_key: &'a str,
    pub deck_id: DeckId,
    pub model_id: ModelId,
    pub created_at: Timestamp,
}

impl Database {
    pub fn new(database_path: &str) -> Fallible<Self> {
        Self::init(Connection::open(database_path)?)
    }

    pub fn in_memory() -> Fallible<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Fallible<Self> {
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, true)?;
        {
            let tx = conn.transaction()?;
            if !probe_schema_exists(&tx)? {
                tx.execute_batch(include_str!("schema.sql"))?;
                tx.commit()?;
            }
        }
        Ok(Self { conn })
    }

    pub fn transaction(&mut self) -> Fallible<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    pub fn find_deck(&self, name: &str) -> Fallible<Option<DeckId>> {
        let sql = "select deck_id from decks where name = ?;";
        let deck_id = self
            .conn
            .query_row(sql, [name], |row| row.get(0))
            .optional()?;
        Ok(deck_id)
    }

    pub fn insert_deck(&self, name: &str) -> Fallible<DeckId> {
        log::debug!("Inserting deck: {name}");
        let sql = "insert into decks (name) values (?) returning deck_id;";
        let deck_id: DeckId = self.conn.query_row(sql, [name], |row| row.get(0))?;
        Ok(deck_id)
    }

    pub fn deck_name(&self, deck_id: DeckId) -> Fallible<Option<String>> {
        let sql = "select name from decks where deck_id = ?;";
        let name = self
            .conn
            .query_row(sql, [deck_id], |row| row.get(0))
            .optional()?;
        Ok(name)
    }

    pub fn deck_count(&self) -> Fallible<usize> {
        count(&self.conn, "select count(*) from decks;")
    }

    pub fn note_count(&self) -> Fallible<usize> {
        count(&self.conn, "select count(*) from notes;")
    }

    pub fn find_model(&self, name: &str) -> Fallible<Option<ModelRow>> {
        let sql = "select model_id, fields from models where name = ?;";
        let row: Option<(ModelId, String)> = self
            .conn
            .query_row(sql, [name], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        match row {
            Some((model_id, fields)) => Ok(Some(ModelRow {
                model_id,
                fields: decode_fields(&fields)?,
            })),
            None => Ok(None),
        }
    }

    pub fn model_fields(&self, model_id: ModelId) -> Fallible<Vec<String>> {
        let sql = "select fields from models where model_id = ?;";
        let fields: String = self.conn.query_row(sql, [model_id], |row| row.get(0))?;
        decode_fields(&fields)
    }

    pub fn insert_model(&self, name: &str, fields: &[&str]) -> Fallible<ModelId> {
        log::debug!("Inserting model: {name}");
        let fields = serde_json::to_string(fields)?;
        let sql = "insert into models (name, fields) values (?, ?) returning model_id;";
        let model_id: ModelId = self
            .conn
            .query_row(sql, (name, fields), |row| row.get(0))?;
        Ok(model_id)
    }

    pub fn find_note_by_guid(&self, guid: &str) -> Fallible<Option<NoteRow>> {
        find_note(&self.conn, "guid", guid)
    }

    pub fn find_note_by_remote_key(&self, remote_key: &str) -> Fallible<Option<NoteRow>> {
        find_note(&self.conn, "remote_key", remote_key)
    }

    pub fn note_fields(&self, note_id: NoteId) -> Fallible<BTreeMap<String, String>> {
        let mut fields = BTreeMap::new();
        let mut stmt = self
            .conn
            .prepare("select name, value from note_fields where note_id = ?;")?;
        let mut rows = stmt.query([note_id])?;
        while let Some(row) = rows.next()? {
            fields.insert(row.get(0)?, row.get(1)?);
        }
        Ok(fields)
    }
}

pub fn insert_note(tx: &Transaction, note: &InsertNote) -> Fallible<NoteId> {
    let sql = "insert into notes (guid, remote_key, deck_id, model_id, created_at, modified_at) values (?, ?, ?, ?, ?, ?) returning note_id;";
    let note_id: NoteId = tx.query_row(
        sql,
        (
            note.guid,
            note.remote_key,
            note.deck_id,
            note.model_id,
            note.created_at,
            note.created_at,
        ),
        |row| row.get(0),
    )?;
    Ok(note_id)
}

/// Move a note to a deck and stamp its remote key if it has none yet.
pub fn update_note(
    tx: &Transaction,
    note_id: NoteId,
    deck_id: DeckId,
    remote_key: &str,
    modified_at: Timestamp,
) -> Fallible<()> {
    let sql = "update notes set deck_id = ?, remote_key = coalesce(remote_key, ?), modified_at = ? where note_id = ?;";
    let changed = tx.execute(sql, (deck_id, remote_key, modified_at, note_id))?;
    if changed != 1 {
        return Err(ErrorReport::new(&format!("note {note_id} does not exist")));
    }
    Ok(())
}

pub fn set_field(tx: &Transaction, note_id: NoteId, name: &str, value: &str) -> Fallible<()> {
    let sql = "insert into note_fields (note_id, name, value) values (?, ?, ?) on conflict (note_id, name) do update set value = excluded.value;";
    tx.execute(sql, (note_id, name, value))?;
    Ok(())
}

fn find_note(conn: &Connection, column: &str, key: &str) -> Fallible<Option<NoteRow>> {
    let sql = format!(
        "select note_id, guid, remote_key, deck_id, model_id from notes where {column} = ?;"
    );
    let note = conn
        .query_row(&sql, [key], |row| {
            Ok(NoteRow {
                note_id: row.get(0)?,
                guid: row.get(1)?,
                remote_key: row.get(2)?,
                deck_id: row.get(3)?,
                model_id: row.get(4)?,
            })
        })
        .optional()?;
    Ok(note)
}

fn decode_fields(fields: &str) -> Fallible<Vec<String>> {
    serde_json::from_str(fields)
        .map_err(|_| ErrorReport::new("invalid field list in models table"))
}

fn count(conn: &Connection, sql: &str) -> Fallible<usize> {
    let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(count as usize)
}

fn probe_schema_exists(tx: &Transaction) -> Fallible<bool> {
    let sql = "select count(*) from sqlite_master where type='table' AND name=?;";
    let count: i64 = tx.query_row(sql, ["notes"], |row| row.get(0))?;
    Ok(count > 0)
}

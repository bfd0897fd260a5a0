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

use serde_json::Map;
use serde_json::Value;

use crate::types::identity::IdentityKey;
use crate::types::remote_id::RemoteId;

/// One flashcard as the vocabulary service knows it. Built fresh every
/// cycle from the service's response and discarded afterwards.
#[derive(Clone, PartialEq, Debug)]
pub struct CardRecord {
    /// The name of the deck the card belongs to. Never blank.
    pub deck_name: String,
    pub front: String,
    pub back: String,
    pub description: String,
    /// The service's stable identifier for the card.
    pub remote_id: RemoteId,
    /// The local GUID, once the card has been materialized locally.
    pub local_guid: Option<String>,
    /// True while the service considers the card changed and unsynced.
    pub pending: bool,
}

/// A payload that cannot be turned into a [`CardRecord`].
#[derive(Clone, PartialEq, Debug)]
pub struct MalformedCard {
    /// The offending wire field.
    pub field: &'static str,
    pub problem: Problem,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Problem {
    Missing,
    Blank,
    WrongType { expected: &'static str },
}

impl Display for MalformedCard {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.problem {
            Problem::Missing => write!(f, "malformed card: missing field `{}`", self.field),
            Problem::Blank => write!(f, "malformed card: field `{}` is blank", self.field),
            Problem::WrongType { expected } => write!(
                f,
                "malformed card: field `{}` is not {expected}",
                self.field
            ),
        }
    }
}

impl Error for MalformedCard {}

impl CardRecord {
    /// Validate a decoded payload of the form
    /// `{"deck", "front", "back", "updated", "id", "ankiId", "description"}`.
    ///
    /// `deck`, `front`, `back` and `id` are required. Blank strings count as
    /// missing for `deck`, `front` and `back`. A missing or null
    /// `description` becomes the empty string, and a missing `updated` is
    /// taken to mean the card is pending.
    pub fn from_value(value: &Value) -> Result<Self, MalformedCard> {
        let object = value.as_object().ok_or(MalformedCard {
            field: "card",
            problem: Problem::WrongType {
                expected: "an object",
            },
        })?;
        let deck_name = required_text(object, "deck")?;
        let front = required_text(object, "front")?;
        let back = required_text(object, "back")?;
        let remote_id = match object.get("id") {
            None | Some(Value::Null) => {
                return Err(MalformedCard {
                    field: "id",
                    problem: Problem::Missing,
                });
            }
            Some(v) => RemoteId::from_value(v).ok_or(MalformedCard {
                field: "id",
                problem: Problem::WrongType {
                    expected: "an integer or a non-blank string",
                },
            })?,
        };
        let local_guid = optional_text(object, "ankiId")?.filter(|guid| !guid.trim().is_empty());
        let description = optional_text(object, "description")?.unwrap_or_default();
        let pending = match object.get("updated") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                return Err(MalformedCard {
                    field: "updated",
                    problem: Problem::WrongType {
                        expected: "a boolean",
                    },
                });
            }
        };
        Ok(Self {
            deck_name,
            front,
            back,
            description,
            remote_id,
            local_guid,
            pending,
        })
    }

    /// The key to look this card up by: the local GUID when the service
    /// knows it, otherwise one derived from the remote ID.
    pub fn identity(&self) -> IdentityKey {
        match &self.local_guid {
            Some(guid) => IdentityKey::guid(guid.clone()),
            None => IdentityKey::remote(&self.remote_id),
        }
    }
}

fn required_text(object: &Map<String, Value>, field: &'static str) -> Result<String, MalformedCard> {
    match optional_text(object, field)? {
        None => Err(MalformedCard {
            field,
            problem: Problem::Missing,
        }),
        Some(s) if s.trim().is_empty() => Err(MalformedCard {
            field,
            problem: Problem::Blank,
        }),
        Some(s) => Ok(s),
    }
}

fn optional_text(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, MalformedCard> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(MalformedCard {
            field,
            problem: Problem::WrongType {
                expected: "a string",
            },
        }),
    }
}

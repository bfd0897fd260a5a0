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

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// The vocabulary service's identifier for a card. The service hands out
/// integers, but the wire format tolerates strings, so both are accepted.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteId {
    Int(i64),
    Text(String),
}

impl RemoteId {
    /// Interpret a JSON value as a remote ID. Returns `None` for anything
    /// that is not an integer or a non-blank string. Strings are kept
    /// verbatim, since the service matches acknowledgements on them.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RemoteId::Int),
            Value::String(s) => {
                if s.trim().is_empty() {
                    None
                } else {
                    Some(RemoteId::Text(s.clone()))
                }
            }
            _ => None,
        }
    }

    /// The canonical text form, used to build identity keys. An integer and
    /// its decimal string refer to the same card.
    pub fn canonical(&self) -> String {
        match self {
            RemoteId::Int(n) => n.to_string(),
            RemoteId::Text(s) => s.clone(),
        }
    }
}

impl Display for RemoteId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

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

use crate::types::remote_id::RemoteId;

/// Length of a derived GUID, in hex characters.
const GUID_LENGTH: usize = 20;

/// The key used to match a remote card to an existing local note.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum IdentityKey {
    /// The local GUID the remote side echoes back once a card exists locally.
    Guid(String),
    /// A key derived from the remote ID.
    Remote(String),
}

impl IdentityKey {
    pub fn guid(guid: impl Into<String>) -> Self {
        IdentityKey::Guid(guid.into())
    }

    pub fn remote(remote_id: &RemoteId) -> Self {
        IdentityKey::Remote(remote_key(remote_id))
    }
}

/// The value stored in a note's remote key column.
pub fn remote_key(remote_id: &RemoteId) -> String {
    format!("remote:{}", remote_id.canonical())
}

/// Derive a GUID from a remote ID. Deterministic, so a card whose
/// acknowledgement was lost is found again on the next cycle.
pub fn derive_guid(remote_id: &RemoteId) -> String {
    derive_guid_from_parts(&["remote", &remote_id.canonical()])
}

/// Derive a GUID by hashing the given parts. The parts are length-prefixed
/// so that `["ab", "c"]` and `["a", "bc"]` differ.
pub fn derive_guid_from_parts(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"vocsync");
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let hex = hasher.finalize().to_hex();
    hex[..GUID_LENGTH].to_string()
}

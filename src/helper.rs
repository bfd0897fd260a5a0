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

//! Fakes of the vocabulary service for tests.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use axum::Router;
use axum::extract::RawQuery;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use serde_json::Value;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

use crate::error::ErrorReport;
use crate::error::Fallible;
use crate::remote::RemoteCatalog;
use crate::remote::RemoteError;
use crate::remote::WireCard;
use crate::remote::acknowledgement_payload;
use crate::types::outcome::CardOutcome;

/// A card payload in the wire format.
pub fn wire_card(id: i64, deck: &str, front: &str, back: &str) -> Value {
    json!({
        "deck": deck,
        "front": front,
        "back": back,
        "updated": true,
        "id": id,
        "ankiId": null,
        "description": ""
    })
}

/// Clear the pending flag of every acknowledged card and record its GUID,
/// the way the service does.
fn apply_acknowledgement(cards: &mut [Value], acknowledged: &[WireCard]) {
    for ack in acknowledged {
        let id = serde_json::to_value(&ack.id).unwrap_or(Value::Null);
        for card in cards.iter_mut() {
            if card.get("id") == Some(&id) {
                card["updated"] = json!(false);
                card["ankiId"] = json!(ack.anki_id);
            }
        }
    }
}

fn is_pending(card: &Value) -> bool {
    card.get("updated") != Some(&Value::Bool(false))
}

/// In-memory [`RemoteCatalog`] that records every call.
pub struct MemoryCatalog {
    cards: RefCell<Vec<Value>>,
    acknowledged: RefCell<Vec<Vec<CardOutcome>>>,
    fetch_error: Option<RemoteError>,
    ack_error: RefCell<Option<RemoteError>>,
    filter_pending: bool,
}

impl MemoryCatalog {
    pub fn new(cards: Vec<Value>) -> Self {
        Self {
            cards: RefCell::new(cards),
            acknowledged: RefCell::new(Vec::new()),
            fetch_error: None,
            ack_error: RefCell::new(None),
            filter_pending: true,
        }
    }

    pub fn failing_fetch(error: RemoteError) -> Self {
        Self {
            fetch_error: Some(error),
            ..Self::new(Vec::new())
        }
    }

    /// Offer every card, pending or not.
    pub fn unfiltered(mut self) -> Self {
        self.filter_pending = false;
        self
    }

    pub fn fail_acknowledgements(&self, error: Option<RemoteError>) {
        *self.ack_error.borrow_mut() = error;
    }

    /// Mark a card as pending again, as if it had been edited remotely.
    pub fn touch(&self, id: i64) {
        for card in self.cards.borrow_mut().iter_mut() {
            if card.get("id") == Some(&json!(id)) {
                card["updated"] = json!(true);
            }
        }
    }

    pub fn acknowledged(&self) -> Vec<Vec<CardOutcome>> {
        self.acknowledged.borrow().clone()
    }

    pub fn cards(&self) -> Vec<Value> {
        self.cards.borrow().clone()
    }
}

impl RemoteCatalog for MemoryCatalog {
    fn fetch_pending(&self) -> Result<Vec<Value>, RemoteError> {
        if let Some(err) = &self.fetch_error {
            return Err(err.clone());
        }
        Ok(self
            .cards
            .borrow()
            .iter()
            .filter(|card| !self.filter_pending || is_pending(card))
            .cloned()
            .collect())
    }

    fn acknowledge(&self, outcomes: &[CardOutcome]) -> Result<(), RemoteError> {
        self.acknowledged.borrow_mut().push(outcomes.to_vec());
        if let Some(err) = self.ack_error.borrow().clone() {
            return Err(err);
        }
        apply_acknowledgement(
            &mut self.cards.borrow_mut(),
            &acknowledgement_payload(outcomes),
        );
        Ok(())
    }
}

struct FakeState {
    cards: Vec<Value>,
    puts: Vec<Value>,
    status: StatusCode,
    raw_body: Option<String>,
    last_query: Option<String>,
}

type Shared = Arc<Mutex<FakeState>>;

/// The vocabulary service's HTTP API, served from memory on a free port.
pub struct FakeService {
    pub base_url: String,
    state: Shared,
    /// Owned runtime, when the service was started outside of one.
    _runtime: Option<Runtime>,
}

impl FakeService {
    /// Start the service on its own runtime, for tests of blocking code.
    pub fn start(cards: Vec<Value>) -> Fallible<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        let mut service = runtime.block_on(Self::spawn(cards))?;
        service._runtime = Some(runtime);
        Ok(service)
    }

    /// Start the service on the current runtime.
    pub async fn spawn(cards: Vec<Value>) -> Fallible<Self> {
        let state: Shared = Arc::new(Mutex::new(FakeState {
            cards,
            puts: Vec::new(),
            status: StatusCode::OK,
            raw_body: None,
            last_query: None,
        }));
        let port = portpicker::pick_unused_port().ok_or_else(|| ErrorReport::new("no free port"))?;
        let bind = format!("127.0.0.1:{port}");
        let listener = TcpListener::bind(&bind).await?;
        let app = Router::new()
            .route("/vocabulary/flashcards", get(list).put(store))
            .with_state(state.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });
        Ok(Self {
            base_url: format!("http://{bind}"),
            state,
            _runtime: None,
        })
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_status(&self, status: StatusCode) {
        self.lock().status = status;
    }

    pub fn set_raw_body(&self, body: &str) {
        self.lock().raw_body = Some(body.to_string());
    }

    pub fn last_query(&self) -> Option<String> {
        self.lock().last_query.clone()
    }

    /// Every acknowledgement body received, in order.
    pub fn puts(&self) -> Vec<Value> {
        self.lock().puts.clone()
    }

    /// The cards still marked as pending.
    pub fn pending(&self) -> Vec<Value> {
        self.lock()
            .cards
            .iter()
            .filter(|card| is_pending(card))
            .cloned()
            .collect()
    }
}

async fn list(State(state): State<Shared>, RawQuery(query): RawQuery) -> (StatusCode, String) {
    let mut state = state.lock().unwrap();
    state.last_query = query.clone();
    if state.status != StatusCode::OK {
        return (state.status, "error".to_string());
    }
    if let Some(body) = &state.raw_body {
        return (StatusCode::OK, body.clone());
    }
    let only_pending = query.as_deref() == Some("updated=true");
    let cards: Vec<Value> = state
        .cards
        .iter()
        .filter(|card| !only_pending || is_pending(card))
        .cloned()
        .collect();
    (StatusCode::OK, Value::Array(cards).to_string())
}

async fn store(State(state): State<Shared>, body: String) -> (StatusCode, String) {
    let mut state = state.lock().unwrap();
    if state.status != StatusCode::OK {
        return (state.status, "error".to_string());
    }
    let cards: Vec<WireCard> = match serde_json::from_str(&body) {
        Ok(cards) => cards,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()),
    };
    state.puts.push(serde_json::from_str(&body).unwrap_or(Value::Null));
    apply_acknowledgement(&mut state.cards, &cards);
    (StatusCode::OK, "{}".to_string())
}

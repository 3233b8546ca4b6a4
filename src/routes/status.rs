use std::time::UNIX_EPOCH;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// Signer, listener mode and snapshot summary as JSON.
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.reseeder.snapshot();
    let built_at = snapshot
        .built_at
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs());
    let signer = state.reseeder.signer();

    Json(json!({
        "signer": signer.label(),
        "public_key": signer.public_hex(),
        "mode": state.mode.to_string(),
        "records": snapshot.records.len(),
        "built_at": built_at,
    }))
}

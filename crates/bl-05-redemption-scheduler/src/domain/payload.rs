//! `commit_connection` transaction payload.

use bl_04_write_marker_ledger::WriteMarker;
use serde_json::{json, Value};
use shared_types::hash_hex;

fn prev_hex(marker: &WriteMarker) -> String {
    marker
        .previous_allocation_root
        .as_ref()
        .map(hash_hex)
        .unwrap_or_default()
}

/// Payload the storage contract expects to redeem `marker`.
pub fn commit_connection_payload(marker: &WriteMarker) -> Value {
    let root = hash_hex(&marker.allocation_root);
    let prev = prev_hex(marker);
    json!({
        "allocation_root": root,
        "prev_allocation_root": prev,
        "write_marker": {
            "allocation_root": root,
            "prev_allocation_root": prev,
            "allocation_id": marker.allocation_id,
            "blobber_id": marker.blobber_id,
            "client_id": marker.client_id,
            "size": marker.size,
            "timestamp": marker.timestamp,
            "signature": hex::encode(&marker.signature),
        }
    })
}

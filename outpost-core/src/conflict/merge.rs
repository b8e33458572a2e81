// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! JSON merge for commutative operations.

use serde_json::{Map, Value};

/// Merges two JSON documents.
///
/// Objects merge key by key and recursively, arrays become the ordered union
/// (server entries first, then local entries the server lacks) and
/// conflicting scalars take the newer side. Ties go to the server.
pub fn merge_json(local: &Value, server: &Value, local_newer: bool) -> Value {
    match (local, server) {
        (Value::Object(local_map), Value::Object(server_map)) => {
            let mut merged = Map::new();
            for (key, server_value) in server_map {
                let value = match local_map.get(key) {
                    Some(local_value) => merge_json(local_value, server_value, local_newer),
                    None => server_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            for (key, local_value) in local_map {
                if !server_map.contains_key(key) {
                    merged.insert(key.clone(), local_value.clone());
                }
            }
            Value::Object(merged)
        }
        (Value::Array(local_items), Value::Array(server_items)) => {
            let mut merged = server_items.clone();
            for item in local_items {
                if !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
            Value::Array(merged)
        }
        _ if local == server => server.clone(),
        _ if local_newer => local.clone(),
        _ => server.clone(),
    }
}

/// Merges two serialized JSON payloads. Returns `None` if either side is not
/// JSON.
pub fn merge_json_bytes(local: &[u8], server: &[u8], local_newer: bool) -> Option<Vec<u8>> {
    let local: Value = serde_json::from_slice(local).ok()?;
    let server: Value = serde_json::from_slice(server).ok()?;
    serde_json::to_vec(&merge_json(&local, &server, local_newer)).ok()
}

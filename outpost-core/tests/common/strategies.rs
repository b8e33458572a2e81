// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Proptest Strategies

use proptest::prelude::*;

use outpost_core::queue::{Priority, QueueStatus};

/// Arbitrary payload bytes, including empty.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2048)
}

pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop::sample::select(Priority::ALL.to_vec())
}

pub fn status_strategy() -> impl Strategy<Value = QueueStatus> {
    prop::sample::select(QueueStatus::ALL.to_vec())
}

/// Small JSON objects with string and array fields.
pub fn json_object_strategy() -> impl Strategy<Value = serde_json::Value> {
    prop::collection::btree_map(
        "[a-z]{1,6}",
        prop_oneof![
            "[a-z0-9]{0,8}".prop_map(serde_json::Value::from),
            prop::collection::vec("[a-z]{1,4}", 0..4).prop_map(serde_json::Value::from),
        ],
        0..6,
    )
    .prop_map(|map| serde_json::Value::Object(map.into_iter().collect()))
}

// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Deserializers for fields which firmware versions disagree on.
//!
//! The same field arrives as `1700000000`, `"1700000000"`, `1.7e9` or not at all depending on
//! firmware. These map anything unusable to the type's default instead of failing the record.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub(crate) fn int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        Value::Bool(b) => b as i64,
        _ => 0,
    })
}

pub(crate) fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

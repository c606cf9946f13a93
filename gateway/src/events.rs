// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Access-log queries.

use chrono::DateTime;
use fnv::FnvHashMap;
use portaria_device::finder::{find_records, FindQuery, FindResult};
use portaria_device::rpc::Rpc;
use portaria_device::{bail_t, best_effort, format_err_t, Error, Target};

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 200;
pub const MAX_OFFSET: u32 = 5000;

/// The window queried when `from` is absent.
const DEFAULT_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Parses epoch seconds (all digits) or an RFC 3339 timestamp into epoch seconds.
pub fn parse_instant(name: &str, s: &str) -> Result<i64, Error> {
    let s = s.trim();
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse().map_err(|_| format_err_t!(
            Validation, "{} {:?} is out of range", name, s));
    }
    match DateTime::parse_from_rfc3339(s) {
        Ok(t) => Ok(t.timestamp()),
        Err(e) => bail_t!(Validation, "{} {:?} is neither epoch seconds nor ISO-8601: {}",
                          name, s, e),
    }
}

/// Interprets a numeric parameter, clamping it into `[min, max]`.
///
/// Absent, unparseable and non-finite values mean `default`.
fn clamped(raw: Option<&String>, min: u32, max: u32, default: u32) -> u32 {
    match raw.and_then(|r| r.trim().parse::<f64>().ok()) {
        Some(v) if v.is_finite() => v.trunc().max(f64::from(min)).min(f64::from(max)) as u32,
        _ => default,
    }
}

/// Builds the query from `from`, `to`, `limit` and `offset` parameters.
///
/// `to` defaults to `now`; `from` to a day before `to`.
pub fn parse_query(params: &FnvHashMap<String, String>, now: i64) -> Result<FindQuery, Error> {
    let param = |k: &str| params.get(k).filter(|v| !v.trim().is_empty());
    let to = match param("to") {
        Some(t) => parse_instant("to", t)?,
        None => now,
    };
    let from = match param("from") {
        Some(f) => parse_instant("from", f)?,
        None => to - DEFAULT_WINDOW_SECS,
    };
    if from >= to {
        bail_t!(Validation, "from ({}) must be before to ({})", from, to);
    }
    Ok(FindQuery {
        from,
        to,
        limit: clamped(param("limit"), 1, MAX_LIMIT, DEFAULT_LIMIT),
        offset: clamped(param("offset"), 0, MAX_OFFSET, 0),
    })
}

/// Logs in, runs `q`, and logs out.
pub async fn list_events(rpc: &dyn Rpc, target: &Target, q: &FindQuery)
                         -> Result<FindResult, Error> {
    let session = rpc.login(&target.ip, &target.creds, target.timeout).await?;
    let result = find_records(rpc, &target.ip, &session, q, target.timeout).await;
    best_effort("global.logout", rpc.logout(&target.ip, &session, target.timeout)).await;
    result
}

// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Paging through the terminal's access log with `RecordFinder`.
//!
//! The log is read through a cursor which lives on the terminal:
//!
//!    1. `RecordFinder.factory.create` returns an object handle.
//!    2. `RecordFinder.startFind` sets the filter and sort order on it.
//!    3. `RecordFinder.doFind` returns one page.
//!    4. `RecordFinder.stopFind` releases it.
//!
//! Once a handle exists, `stopFind` is attempted exactly once whatever happens afterward. Its
//! failure is logged and reported in [FindResult::stop_ok] but never fails the query; a cursor
//! leaked on the terminal eventually expires there.

use crate::rpc::{Call, ObjectHandle, Response, Rpc, Session};
use crate::{best_effort, lenient, Error, ErrorKind};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

const TABLE: &str = "AccessControlCardRec";

/// One access event as stored by the terminal.
///
/// Fields are decoded leniently; anything else the terminal sends is kept in `other`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventRecord {
    #[serde(default, deserialize_with = "lenient::int")]
    pub rec_no: i64,

    /// Seconds since epoch.
    #[serde(default, deserialize_with = "lenient::int")]
    pub create_time: i64,

    /// `15` is facial recognition.
    #[serde(default, deserialize_with = "lenient::int")]
    pub method: i64,

    #[serde(rename = "UserID", default, deserialize_with = "lenient::text")]
    pub user_id: String,

    #[serde(default, deserialize_with = "lenient::text")]
    pub card_name: String,

    #[serde(default, deserialize_with = "lenient::text")]
    pub card_no: String,

    /// `1` on a granted access.
    #[serde(default, deserialize_with = "lenient::int")]
    pub status: i64,

    #[serde(default, deserialize_with = "lenient::int")]
    pub error_code: i64,

    /// e.g. `Entry`, `Exit` or `Remote`.
    #[serde(rename = "Type", default, deserialize_with = "lenient::text")]
    pub kind: String,

    /// Device-local path of the photo taken, if any.
    #[serde(rename = "URL", default, deserialize_with = "lenient::text")]
    pub url: String,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// A page request over `(from, to)`, both exclusive, in seconds since epoch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FindQuery {
    pub from: i64,
    pub to: i64,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindResult {
    /// Newest first.
    pub records: Vec<EventRecord>,

    /// As reported by the terminal, else the number of records returned.
    pub found: u64,

    pub stop_ok: bool,
}

fn start_params(q: &FindQuery) -> Value {
    json!({
        "condition": {
            "CreateTime": ["<>", q.from, q.to],
            "Orders": [{"Field": "CreateTime", "Type": "Descent"}],
        },
    })
}

/// Decodes a `doFind` reply.
fn parse_page(resp: &Response) -> FindResult {
    let items = match resp.params.get("info").or_else(|| resp.params.get("records")) {
        Some(Value::Array(a)) => &a[..],
        _ => &[][..],
    };
    let mut records = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match EventRecord::deserialize(item) {
            Ok(r) => records.push(r),
            Err(e) => warn!("skipping undecodable record {}: {}", i, e),
        }
    }
    let found = resp.params.get("found")
        .and_then(|f| f.as_u64().or_else(|| f.as_str().and_then(|s| s.trim().parse().ok())))
        .unwrap_or(records.len() as u64);
    FindResult {
        records,
        found,
        stop_ok: false,
    }
}

async fn stop(rpc: &dyn Rpc, ip: &str, session: &Session, handle: &ObjectHandle,
              timeout: Duration) -> bool {
    best_effort("RecordFinder.stopFind",
                rpc.call(ip, session, Call::on("RecordFinder.stopFind", handle, Value::Null),
                         timeout)).await
}

/// Runs one complete query on an already logged-in session.
pub async fn find_records(rpc: &dyn Rpc, ip: &str, session: &Session, q: &FindQuery,
                          timeout: Duration) -> Result<FindResult, Error> {
    if q.from >= q.to {
        bail_t!(Validation, "from {} must precede to {}", q.from, q.to);
    }
    let created = rpc.call(ip, session,
                           Call::new("RecordFinder.factory.create", json!({"name": TABLE})),
                           timeout).await
        .map_err(|e| e.reclassify(ErrorKind::FactoryCreateFailed))?;
    let handle = ObjectHandle::from_result(&created.result)
        .ok_or_else(|| format_err_t!(FactoryCreateFailed, "{} returned no finder object: {}",
                                     ip, &created.result))?;
    debug!("{}: finder {} over ({}, {})", ip, &handle, q.from, q.to);

    let started = rpc.call(ip, session,
                           Call::on("RecordFinder.startFind", &handle, start_params(q)),
                           timeout).await;
    let started = match started {
        Ok(r) if r.succeeded() => Ok(()),
        Ok(r) => Err(format_err_t!(StartFindFailed, "{} refused startFind: {}", ip, &r.result)),
        Err(e) => Err(e.reclassify(ErrorKind::StartFindFailed)),
    };
    if let Err(e) = started {
        stop(rpc, ip, session, &handle, timeout).await;
        return Err(e);
    }

    let page = rpc.call(ip, session,
                        Call::on("RecordFinder.doFind", &handle,
                                 json!({"count": q.limit, "begin": q.offset})),
                        timeout).await;
    let stop_ok = stop(rpc, ip, session, &handle, timeout).await;
    let mut result = parse_page(&page?);
    result.stop_ok = stop_ok;
    debug!("{}: {} of {} records", ip, result.records.len(), result.found);
    Ok(result)
}

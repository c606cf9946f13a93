// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The dashboard's view of access events.

use chrono::{SecondsFormat, TimeZone, Utc};
use portaria_device::finder::EventRecord;
use serde::Serialize;
use url::form_urlencoded;

/// `Method` of a facial-recognition access.
const METHOD_FACE: i64 = 15;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRow {
    pub event_key: String,
    pub device_id: String,

    /// RFC 3339, UTC.
    pub occurred_at: String,
    pub action: &'static str,
    pub status: &'static str,
    pub user_label: String,
    pub user_id: Option<String>,
    pub method: i64,

    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub card_last4: Option<String>,

    /// Relative to the gateway.
    pub snapshot_url: Option<String>,
}

/// Masks all but the last four characters; anything shorter than five becomes `****`.
pub fn mask_card_number(card: &str) -> String {
    let n = card.chars().count();
    if n < 5 {
        return "****".to_owned();
    }
    let mut masked: String = std::iter::repeat('*').take(n - 4).collect();
    masked.extend(card.chars().skip(n - 4));
    masked
}

fn last4(card: &str) -> String {
    let n = card.chars().count();
    let mut out = "****".to_owned();
    out.extend(card.chars().skip(n.saturating_sub(4)));
    out
}

fn nonempty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_owned())
    }
}

fn action(r: &EventRecord) -> &'static str {
    if r.method == METHOD_FACE {
        "Reconhecimento facial"
    } else if !r.card_no.is_empty() {
        "Acesso via cartão"
    } else if r.kind == "Remote" {
        "Abertura remota"
    } else {
        "Acesso"
    }
}

fn occurred_at(epoch: i64) -> String {
    match Utc.timestamp_opt(epoch, 0).single() {
        Some(t) => t.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => "1970-01-01T00:00:00Z".to_owned(),
    }
}

/// Projects one device record. A pure function of its arguments.
pub fn map_event(device_id: &str, r: &EventRecord) -> AuditRow {
    let user_label = [&r.card_name, &r.user_id]
        .iter()
        .find(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "Desconhecido".to_owned());
    let snapshot_url = nonempty(&r.url).map(|u| {
        let enc: String = form_urlencoded::byte_serialize(u.as_bytes()).collect();
        format!("/events/{}/photo?url={}", device_id, enc)
    });
    AuditRow {
        event_key: format!("{}:{}:{}:{}:{}:{}", device_id, r.rec_no, r.create_time, r.method,
                           &r.user_id, &r.card_no),
        device_id: device_id.to_owned(),
        occurred_at: occurred_at(r.create_time),
        action: action(r),
        status: if r.status == 1 { "Success" } else { "Failed" },
        user_label,
        user_id: nonempty(&r.user_id),
        method: r.method,
        kind: nonempty(&r.kind),
        card_last4: nonempty(&r.card_no).map(|c| last4(&c)),
        snapshot_url,
    }
}

#[cfg(test)]
mod tests {
    use super::{map_event, mask_card_number};
    use portaria_device::finder::EventRecord;
    use serde_json::json;

    fn record(v: serde_json::Value) -> EventRecord {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn masking() {
        assert_eq!(mask_card_number("1234567890"), "******7890");
        assert_eq!(mask_card_number("12345"), "*2345");
        assert_eq!(mask_card_number("1234"), "****");
        assert_eq!(mask_card_number(""), "****");
    }

    #[test]
    fn facial() {
        let r = record(json!({
            "RecNo": 12, "CreateTime": 1_700_000_000, "Method": 15, "UserID": "7",
            "CardName": "Maria", "Status": 1, "Type": "Entry",
            "URL": "/mnt/appdata1/userpic/SnapShot/2023-11-14/22/13/1 a.jpg",
        }));
        let row = map_event("dev1", &r);
        assert_eq!(row.action, "Reconhecimento facial");
        assert_eq!(row.status, "Success");
        assert_eq!(row.user_label, "Maria");
        assert_eq!(row.user_id.as_deref(), Some("7"));
        assert_eq!(row.occurred_at, "2023-11-14T22:13:20Z");
        assert_eq!(row.card_last4, None);
        assert_eq!(row.event_key, "dev1:12:1700000000:15:7:");
        assert_eq!(row.snapshot_url.as_deref(), Some(
            "/events/dev1/photo?url=%2Fmnt%2Fappdata1%2Fuserpic%2FSnapShot%2F2023-11-14%2F22%2F13%2F1+a.jpg"));

        // No hidden state.
        assert_eq!(serde_json::to_vec(&row).unwrap(),
                   serde_json::to_vec(&map_event("dev1", &r)).unwrap());
    }

    #[test]
    fn card_and_remote() {
        let row = map_event("dev1", &record(json!({"Method": 0, "CardNo": "9999", "Status": 0})));
        assert_eq!(row.action, "Acesso via cartão");
        assert_eq!(row.status, "Failed");
        assert_eq!(row.card_last4.as_deref(), Some("****9999"));
        assert_eq!(row.user_label, "Desconhecido");
        assert_eq!(row.snapshot_url, None);

        let row = map_event("dev1", &record(json!({"Method": 1, "CardNo": "AB12CD34EF"})));
        assert_eq!(row.card_last4.as_deref(), Some("****34EF"));

        let row = map_event("dev1", &record(json!({"Type": "Remote", "UserID": "101"})));
        assert_eq!(row.action, "Abertura remota");
        assert_eq!(row.user_label, "101");
        assert_eq!(row.kind.as_deref(), Some("Remote"));

        let row = map_event("dev1", &record(json!({})));
        assert_eq!(row.action, "Acesso");
        assert_eq!(row.occurred_at, "1970-01-01T00:00:00Z");
        assert_eq!(row.kind, None);
    }

    #[test]
    fn wire_names() {
        let v = serde_json::to_value(&map_event("dev1", &record(json!({"CardNo": "9999"}))))
            .unwrap();
        for k in &["eventKey", "deviceId", "occurredAt", "action", "status", "userLabel", "userId",
                   "method", "type", "cardLast4", "snapshotUrl"] {
            assert!(v.get(k).is_some(), "missing {}", k);
        }
    }
}

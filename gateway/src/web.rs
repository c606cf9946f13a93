// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The HTTP API.
//!
//! JSON endpoints answer `{ok: true, ...}` or `{ok: false, error, message}`, where `error` is an
//! [ErrorKind] code. Image endpoints answer a JPEG or that same JSON failure, never a partial
//! image.

use crate::audit;
use crate::config::Protocol;
use crate::events;
use crate::resolver::{Resolver, TargetOverride};
use bytes::Bytes;
use fnv::FnvHashMap;
use hyper::header::{self, HeaderValue};
use hyper::{Body, Method, Request, Response, StatusCode};
use log::{debug, info, warn};
use percent_encoding::percent_decode_str;
use portaria_device::digest::Transport;
use portaria_device::rpc::Rpc;
use portaria_device::{bail_t, cgi, photo, Error, ErrorKind, ResultExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::borrow::Borrow;
use std::convert::Infallible;
use std::sync::Arc;
use url::form_urlencoded;

#[derive(Debug, Eq, PartialEq)]
enum Path {
    Health,              // "/health"
    DoorOpen,            // "/door/open"
    Snapshot(String),    // "/<device>/snapshot"
    StoredPhoto(String), // "/<device>/photo"
    Events(String),      // "/events/<device>"
    EventPhoto(String),  // "/events/<device>/photo"
    Audit(String),       // "/audit/access/<device>"
    NotFound,
}

impl Path {
    /// Matches percent-decoded segments, so `%2F` within a device id doesn't split it.
    fn decode(path: &str) -> Self {
        let segments = match path.strip_prefix('/') {
            None => return Path::NotFound,
            Some(p) => p.split('/'),
        };
        let mut decoded = Vec::new();
        for s in segments {
            match percent_decode_str(s).decode_utf8() {
                Ok(s) => decoded.push(s),
                Err(_) => return Path::NotFound,
            }
        }
        let parts: Vec<&str> = decoded.iter().map(|s| &**s).collect();
        match parts[..] {
            ["health"] => Path::Health,
            ["door", "open"] => Path::DoorOpen,
            ["events", id] if !id.is_empty() => Path::Events(id.to_owned()),
            ["events", id, "photo"] if !id.is_empty() => Path::EventPhoto(id.to_owned()),
            ["audit", "access", id] if !id.is_empty() => Path::Audit(id.to_owned()),
            [id, "snapshot"] if !id.is_empty() => Path::Snapshot(id.to_owned()),
            [id, "photo"] if !id.is_empty() => Path::StoredPhoto(id.to_owned()),
            _ => Path::NotFound,
        }
    }

    fn method(&self) -> Method {
        match self {
            Path::DoorOpen => Method::POST,
            _ => Method::GET,
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let (status, body) = match serde_json::to_vec(body) {
        Ok(b) => (status, b),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, json!({
            "ok": false,
            "error": ErrorKind::Internal.code(),
            "message": e.to_string(),
        }).to_string().into_bytes()),
    };
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .body(body.into())
        .expect("hardcoded head should be valid")
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation | ErrorKind::Config => StatusCode::BAD_REQUEST,
        ErrorKind::DeviceNotFound => StatusCode::NOT_FOUND,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    }
}

#[derive(Serialize)]
struct Failure<'a> {
    ok: bool,
    error: &'a str,
    message: String,
}

fn from_error(e: &Error) -> Response<Body> {
    json_response(status_for(e.kind()), &Failure {
        ok: false,
        error: e.kind().code(),
        message: e.to_string(),
    })
}

fn jpeg_response(jpeg: Bytes) -> Response<Body> {
    Response::builder()
        .header(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"))
        .header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store, must-revalidate"))
        .header(header::PRAGMA, HeaderValue::from_static("no-cache"))
        .body(jpeg.into())
        .expect("hardcoded head should be valid")
}

type Params = FnvHashMap<String, String>;

fn params(req: &Request<Body>) -> Params {
    let mut out = Params::default();
    if let Some(q) = req.uri().query() {
        for (key, value) in form_urlencoded::parse(q.as_bytes()) {
            let (key, value): (&str, &str) = (key.borrow(), value.borrow());
            out.insert(key.to_owned(), value.to_owned());
        }
    }
    out
}

/// Returns the non-blank parameter `key`.
fn param<'a>(p: &'a Params, key: &str) -> Option<&'a str> {
    p.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Parses `target`, a JSON [TargetOverride].
fn target_param(p: &Params) -> Result<Option<TargetOverride>, Error> {
    match param(p, "target") {
        None => Ok(None),
        Some(t) => Ok(Some(serde_json::from_str(t).err_kind(ErrorKind::Validation)?)),
    }
}

fn channel_param(p: &Params) -> Result<Option<u32>, Error> {
    match param(p, "channel") {
        None => Ok(None),
        Some(c) => match c.parse() {
            Ok(0) | Err(_) => bail_t!(Validation, "channel {:?} is not a positive integer", c),
            Ok(c) => Ok(Some(c)),
        },
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DoorRequest {
    #[serde(default)]
    device_id: Option<String>,

    #[serde(default)]
    channel: Option<u32>,

    #[serde(default)]
    target: Option<TargetOverride>,
}

pub struct Config {
    pub resolver: Resolver,
    pub transport: Arc<dyn Transport>,
    pub rpc: Arc<dyn Rpc>,
}

pub struct Service {
    resolver: Resolver,
    transport: Arc<dyn Transport>,
    rpc: Arc<dyn Rpc>,
}

impl Service {
    pub fn new(config: Config) -> Self {
        Service {
            resolver: config.resolver,
            transport: config.transport,
            rpc: config.rpc,
        }
    }

    async fn door_open(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
        let body = hyper::body::to_bytes(req.into_body()).await.err_kind(ErrorKind::Internal)?;
        let r: DoorRequest = if body.iter().all(u8::is_ascii_whitespace) {
            DoorRequest::default()
        } else {
            serde_json::from_slice(&body).err_kind(ErrorKind::Validation)?
        };
        let target = self.resolver.target(r.device_id.as_deref(), r.target.as_ref(), r.channel,
                                          Protocol::Cgi).await?;
        let raw = cgi::open_door(&*self.transport, &target).await?;
        Ok(json_response(StatusCode::OK, &json!({"ok": true, "raw": raw})))
    }

    async fn snapshot(&self, req: &Request<Body>, device_id: &str) -> Result<Response<Body>, Error> {
        let p = params(req);
        let explicit = target_param(&p)?;
        let channel = channel_param(&p)?;
        let target = self.resolver.target(Some(device_id), explicit.as_ref(), channel,
                                          Protocol::Cgi).await?;
        Ok(jpeg_response(photo::snapshot(&*self.transport, &target).await?))
    }

    async fn stored_photo(&self, req: &Request<Body>, device_id: &str)
                          -> Result<Response<Body>, Error> {
        let p = params(req);
        let path = match param(&p, "path") {
            None => bail_t!(Validation, "path is required"),
            Some(path) => path,
        };
        photo::validate_device_path(path)?;
        let explicit = target_param(&p)?;
        let target = self.resolver.target(Some(device_id), explicit.as_ref(), None,
                                          Protocol::Cgi).await?;
        Ok(jpeg_response(photo::fetch_by_path(&*self.transport, &target, path).await?))
    }

    async fn event_photo(&self, req: &Request<Body>, device_id: &str)
                         -> Result<Response<Body>, Error> {
        let p = params(req);
        let path = match param(&p, "url") {
            None => bail_t!(Validation, "url is required"),
            Some(path) => path,
        };
        photo::validate_device_path(path)?;
        let explicit = target_param(&p)?;
        let target = self.resolver.target(Some(device_id), explicit.as_ref(), None,
                                          Protocol::Rpc).await?;
        let jpeg = photo::fetch_via_load_file(&*self.rpc, &*self.transport, &target, path).await?;
        Ok(jpeg_response(jpeg))
    }

    /// Lists raw records. `to` defaults to now and `from` to a day before `to`; when given, each
    /// must be epoch seconds or RFC 3339.
    async fn events(&self, req: &Request<Body>, device_id: &str) -> Result<Response<Body>, Error> {
        let p = params(req);
        let q = events::parse_query(&p, chrono::Utc::now().timestamp())?;
        let explicit = target_param(&p)?;
        let target = self.resolver.target(Some(device_id), explicit.as_ref(), None,
                                          Protocol::Rpc).await?;
        let r = events::list_events(&*self.rpc, &target, &q).await?;
        Ok(json_response(StatusCode::OK, &json!({
            "ok": true,
            "deviceId": device_id,
            "from": q.from,
            "to": q.to,
            "limit": q.limit,
            "offset": q.offset,
            "found": r.found,
            "stopOk": r.stop_ok,
            "records": r.records,
        })))
    }

    /// Lists [audit::AuditRow]s, with the same range and paging parameters as `/events`.
    async fn audit(&self, req: &Request<Body>, device_id: &str) -> Result<Response<Body>, Error> {
        let p = params(req);
        let q = events::parse_query(&p, chrono::Utc::now().timestamp())?;
        let target = self.resolver.target(Some(device_id), None, None, Protocol::Rpc).await?;
        let r = events::list_events(&*self.rpc, &target, &q).await?;
        let rows: Vec<audit::AuditRow> = r.records.iter()
            .map(|e| {
                if !e.card_no.is_empty() {
                    debug!("{}: record {} card {}", device_id, e.rec_no,
                           audit::mask_card_number(&e.card_no));
                }
                audit::map_event(device_id, e)
            })
            .collect();
        Ok(json_response(StatusCode::OK, &json!({
            "ok": true,
            "deviceId": device_id,
            "total": r.found,
            "records": rows,
        })))
    }

    async fn serve_inner(&self, req: Request<Body>, p: Path) -> Result<Response<Body>, Error> {
        let expected = p.method();
        if p != Path::NotFound && *req.method() != expected {
            return Ok(json_response(StatusCode::METHOD_NOT_ALLOWED, &json!({
                "ok": false,
                "error": "METHOD_NOT_ALLOWED",
                "message": format!("{} expected", expected),
            })));
        }
        match p {
            Path::Health => Ok(json_response(StatusCode::OK, &json!({"ok": true}))),
            Path::DoorOpen => self.door_open(req).await,
            Path::Snapshot(id) => self.snapshot(&req, &id).await,
            Path::StoredPhoto(id) => self.stored_photo(&req, &id).await,
            Path::Events(id) => self.events(&req, &id).await,
            Path::EventPhoto(id) => self.event_photo(&req, &id).await,
            Path::Audit(id) => self.audit(&req, &id).await,
            Path::NotFound => Ok(json_response(StatusCode::NOT_FOUND, &json!({
                "ok": false,
                "error": "NOT_FOUND",
                "message": "path not understood",
            }))),
        }
    }

    pub async fn serve(self: Arc<Self>, req: Request<Body>)
                       -> Result<Response<Body>, Infallible> {
        let p = Path::decode(req.uri().path());

        // The query may hold credentials; log the path only.
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        debug!("request on: {} {}: {:?}", &method, &path, p);
        let resp = match self.serve_inner(req, p).await {
            Ok(r) => r,
            Err(e) => {
                warn!("{} {} failed: {}", &method, &path, e);
                from_error(&e)
            },
        };
        info!("{} {}: {}", &method, &path, resp.status().as_u16());
        Ok(resp)
    }
}

// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Utilities for automated testing involving terminals.
//!
//! The mocks record every request so tests can assert on exactly which network calls were made
//! (or that none were).

use crate::digest::{BinaryResponse, TextRequest, TextResponse, Transport};
use crate::rpc::{Call, Response, Rpc, Session};
use crate::{Credentials, Error, ErrorKind, Target};
use async_trait::async_trait;
use bytes::Bytes;
use fnv::FnvHashMap;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

pub const TEST_IP: &str = "192.168.1.108";

pub fn creds() -> Credentials {
    Credentials {
        username: "admin".to_owned(),
        password: "admin".to_owned(),
    }
}

pub fn target() -> Target {
    Target {
        ip: TEST_IP.to_owned(),
        channel: 1,
        creds: creds(),
        timeout: Duration::from_secs(15),
    }
}

/// A [Transport] serving canned responses.
#[derive(Default)]
pub struct MockTransport {
    text: Option<TextResponse>,
    binary: Option<BinaryResponse>,
    fail: Option<ErrorKind>,
    requests: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn with_text(raw: &str) -> Self {
        MockTransport {
            text: Some(TextResponse::new(StatusCode::OK, raw.to_owned())),
            ..Default::default()
        }
    }

    pub fn with_binary(body: &[u8]) -> Self {
        Self::with_response(BinaryResponse {
            status: StatusCode::OK,
            content_type: Some("image/jpeg".to_owned()),
            body: Bytes::copy_from_slice(body),
        })
    }

    pub fn with_response(r: BinaryResponse) -> Self {
        MockTransport {
            binary: Some(r),
            ..Default::default()
        }
    }

    /// Fails every request with `kind`.
    pub fn failing(kind: ErrorKind) -> Self {
        MockTransport {
            fail: Some(kind),
            ..Default::default()
        }
    }

    /// Returns `"METHOD url"` for each request so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, method: &str, url: &Url) -> Result<(), Error> {
        self.requests.lock().unwrap().push(format!("{} {}", method, url));
        match self.fail {
            Some(k) => Err(format_err_t!(Internal, "mock {} failure", k.code()).reclassify(k)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_text(&self, req: TextRequest<'_>) -> Result<TextResponse, Error> {
        self.record(req.method.as_str(), req.url)?;
        self.text.clone().ok_or_else(|| format_err_t!(Internal, "no mock text response"))
    }

    async fn fetch_binary(&self, url: &Url, _creds: &Credentials, _timeout: Duration)
                          -> Result<BinaryResponse, Error> {
        self.record("GET", url)?;
        self.binary.clone().ok_or_else(|| format_err_t!(Internal, "no mock binary response"))
    }
}

/// One recorded [Rpc] invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub params: Value,
    pub object: Option<String>,
}

enum Reply {
    Ok(Response),
    Fail(ErrorKind, String),
}

/// An [Rpc] answering each method from a script.
///
/// Methods without a scripted reply succeed with `result: true`.
#[derive(Default)]
pub struct MockRpc {
    replies: FnvHashMap<String, Reply>,
    login_failure: Option<ErrorKind>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockRpc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `method` with the given `result`.
    pub fn reply(self, method: &str, result: Value) -> Self {
        self.reply_full(method, Response {
            result,
            ..Default::default()
        })
    }

    pub fn reply_full(mut self, method: &str, resp: Response) -> Self {
        self.replies.insert(method.to_owned(), Reply::Ok(resp));
        self
    }

    pub fn fail(mut self, method: &str, kind: ErrorKind, msg: &str) -> Self {
        self.replies.insert(method.to_owned(), Reply::Fail(kind, msg.to_owned()));
        self
    }

    pub fn fail_login(mut self, kind: ErrorKind) -> Self {
        self.login_failure = Some(kind);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns the method names called so far, `global.login` included.
    pub fn methods(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.method.clone()).collect()
    }
}

#[async_trait]
impl Rpc for MockRpc {
    async fn login(&self, _ip: &str, creds: &Credentials, _timeout: Duration)
                   -> Result<Session, Error> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: "global.login".to_owned(),
            params: serde_json::json!({"userName": &creds.username}),
            object: None,
        });
        if let Some(k) = self.login_failure {
            return Err(format_err_t!(Internal, "mock login failure").reclassify(k));
        }
        Ok(Session::new("mock-session".to_owned()))
    }

    async fn call(&self, _ip: &str, _session: &Session, call: Call<'_>, _timeout: Duration)
                  -> Result<Response, Error> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: call.method.to_owned(),
            params: call.params.clone(),
            object: call.object.map(|o| o.to_string()),
        });
        match self.replies.get(call.method) {
            None => Ok(Response {
                result: Value::Bool(true),
                ..Default::default()
            }),
            Some(Reply::Ok(r)) => Ok(r.clone()),
            Some(Reply::Fail(k, msg)) => {
                Err(format_err_t!(Internal, "{}", msg).reclassify(*k))
            },
        }
    }
}

// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The `RPC2` session protocol.
//!
//! Every call is a JSON `POST` of `{method, params, id, session, object?}` to `/RPC2`. The session
//! comes from a two-step login at `/RPC2_Login`:
//!
//!    1. `global.login` with an empty password. The terminal "fails" with a challenge: a session
//!       id and `params {realm, random, encryption}`.
//!    2. `global.login` again on that session, with the password hashed per `encryption`.
//!
//! Sessions aren't renewed or cached. A call on a session the terminal has since expired fails
//! with [ErrorKind::Rpc]; logging in again is up to the caller.

use crate::digest::{transport_err, with_timeout};
use crate::{device_url, Credentials, Error, ErrorKind, ResultExt};
use async_trait::async_trait;
use log::debug;
use openssl::hash;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const LOGIN_PATH: &str = "/RPC2_Login";
const RPC_PATH: &str = "/RPC2";
const CLIENT_TYPE: &str = "Web3.0";

/// A logged-in session. Owned by the operation that created it.
#[derive(Debug)]
pub struct Session {
    token: String,
    next_id: AtomicU32,
}

impl Session {
    /// Wraps `token`; the two login requests used ids 1 and 2.
    pub fn new(token: String) -> Self {
        Session {
            token,
            next_id: AtomicU32::new(3),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// An opaque handle to a server-side object, as returned by a `factory.create` call.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectHandle(Value);

impl ObjectHandle {
    /// Interprets a `result`; `null`, `false`, `0` and `""` aren't handles.
    pub fn from_result(result: &Value) -> Option<Self> {
        if truthy(result) && !matches!(result, Value::Bool(_)) {
            Some(ObjectHandle(result.clone()))
        } else {
            None
        }
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One method invocation.
#[derive(Debug)]
pub struct Call<'a> {
    pub method: &'a str,
    pub params: Value,

    /// Scopes the call to a server-side object.
    pub object: Option<&'a ObjectHandle>,
}

impl<'a> Call<'a> {
    pub fn new(method: &'a str, params: Value) -> Self {
        Call {
            method,
            params,
            object: None,
        }
    }

    pub fn on(method: &'a str, object: &'a ObjectHandle, params: Value) -> Self {
        Call {
            method,
            params,
            object: Some(object),
        }
    }
}

#[derive(Serialize)]
struct Request<'a> {
    method: &'a str,
    params: &'a Value,
    id: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    object: Option<&'a Value>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Fault {
    #[serde(default)]
    pub code: i64,

    #[serde(default)]
    pub message: String,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}

/// The decoded reply envelope.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Response {
    #[serde(default)]
    pub id: Option<Value>,

    #[serde(default)]
    pub result: Value,

    #[serde(default)]
    pub params: Value,

    #[serde(default)]
    pub error: Option<Fault>,

    /// Usually a string; some firmware sends a number.
    #[serde(default)]
    pub session: Option<Value>,
}

impl Response {
    pub fn succeeded(&self) -> bool {
        truthy(&self.result)
    }

    fn session_token(&self) -> Option<String> {
        match self.session.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn fault(&self) -> String {
        match self.error.as_ref() {
            Some(f) => f.to_string(),
            None => format!("result {}", &self.result),
        }
    }
}

/// JavaScript-style truthiness, which is what the terminals' `result` field follows.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// A session-based RPC client.
#[async_trait]
pub trait Rpc: Send + Sync {
    async fn login(&self, ip: &str, creds: &Credentials, timeout: Duration)
                   -> Result<Session, Error>;

    /// Issues one call.
    ///
    /// Fails with [ErrorKind::Rpc] if `result` is falsy and the terminal reports an error;
    /// a falsy `result` without one is returned for the caller to interpret.
    async fn call(&self, ip: &str, session: &Session, call: Call<'_>, timeout: Duration)
                  -> Result<Response, Error>;

    async fn logout(&self, ip: &str, session: &Session, timeout: Duration) -> Result<(), Error> {
        self.call(ip, session, Call::new("global.logout", Value::Null), timeout).await?;
        Ok(())
    }
}

/// Returns an upper-case hex-encoded version of the input.
fn hex(raw: &[u8]) -> String {
    const HEX_CHARS: [u8; 16] = [b'0', b'1', b'2', b'3', b'4', b'5', b'6', b'7',
                                 b'8', b'9', b'A', b'B', b'C', b'D', b'E', b'F'];
    let mut hex = String::with_capacity(2 * raw.len());
    for b in raw {
        hex.push(char::from(HEX_CHARS[((b & 0xf0) >> 4) as usize]));
        hex.push(char::from(HEX_CHARS[( b & 0x0f      ) as usize]));
    }
    hex
}

fn md5(items: &[&[u8]]) -> Result<String, Error> {
    let mut h = hash::Hasher::new(hash::MessageDigest::md5()).err_kind(ErrorKind::Internal)?;
    for i in items {
        h.update(i).err_kind(ErrorKind::Internal)?;
    }
    Ok(hex(&h.finish().err_kind(ErrorKind::Internal)?))
}

/// The login challenge, from the `params` of the first `global.login` reply.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Challenge {
    #[serde(default)]
    pub realm: String,

    #[serde(default)]
    pub random: String,

    #[serde(default = "default_encryption")]
    pub encryption: String,
}

fn default_encryption() -> String {
    "Default".to_owned()
}

impl Challenge {
    /// Returns the password to submit in the second `global.login`.
    pub fn respond(&self, creds: &Credentials) -> Result<String, Error> {
        let user = creds.username.as_bytes();
        match self.encryption.as_str() {
            "Default" => {
                let inner = md5(&[user, b":", self.realm.as_bytes(), b":",
                                  creds.password.as_bytes()])?;
                md5(&[user, b":", self.random.as_bytes(), b":", inner.as_bytes()])
            },
            "Basic" => Ok(base64::encode(format!("{}:{}", &creds.username, &creds.password))),
            o => bail_t!(AuthFailed, "unsupported login encryption {:?}", o),
        }
    }
}

/// The [Rpc] used against real terminals.
pub struct RpcClient {
    client: Client,
}

impl RpcClient {
    pub fn new() -> Result<Self, Error> {
        let client = Client::builder()
            .build()
            .err_kind(ErrorKind::Internal)?;
        Ok(RpcClient { client })
    }

    async fn post(&self, ip: &str, path: &str, req: &Request<'_>, timeout: Duration)
                  -> Result<Response, Error> {
        let url = device_url(ip, path)?;
        with_timeout(timeout, &url, async {
            let resp = self.client.post(url.clone())
                .json(req)
                .send()
                .await
                .map_err(transport_err)?;
            let status = resp.status();

            // Content-Type is unreliable (often text/plain), so decode by hand.
            let body = resp.text().await.map_err(transport_err)?;
            debug!("{} {} (id {}): {}, {} bytes", &url, req.method, req.id, status, body.len());
            serde_json::from_str::<Response>(&body)
                .map_err(|e| format_err_t!(Transport, "{} returned {} with unparseable body {:?}: {}",
                                           &url, status, truncate(&body, 128), e))
        }).await
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        None => s,
        Some((i, _)) => &s[..i],
    }
}

#[async_trait]
impl Rpc for RpcClient {
    async fn login(&self, ip: &str, creds: &Credentials, timeout: Duration)
                   -> Result<Session, Error> {
        let connect_err = |e: Error| match e.kind() {
            ErrorKind::Transport => e.reclassify(ErrorKind::Unreachable),
            _ => e,
        };
        let params = json!({
            "userName": &creds.username,
            "password": "",
            "clientType": CLIENT_TYPE,
            "loginType": "Direct",
        });
        let first = self.post(ip, LOGIN_PATH, &Request {
            method: "global.login",
            params: &params,
            id: 1,
            session: None,
            object: None,
        }, timeout).await.map_err(connect_err)?;
        let token = first.session_token()
            .ok_or_else(|| format_err_t!(AuthFailed, "{}: login challenge has no session", ip))?;
        let challenge: Challenge = serde_json::from_value(first.params.clone())
            .map_err(|e| format_err_t!(AuthFailed, "{}: unparseable login challenge: {}", ip, e))?;
        let params = json!({
            "userName": &creds.username,
            "password": challenge.respond(creds)?,
            "clientType": CLIENT_TYPE,
            "loginType": "Direct",
            "authorityType": &challenge.encryption,
        });
        let second = self.post(ip, LOGIN_PATH, &Request {
            method: "global.login",
            params: &params,
            id: 2,
            session: Some(&token),
            object: None,
        }, timeout).await.map_err(connect_err)?;
        if !second.succeeded() {
            bail_t!(AuthFailed, "{} rejected login for user {:?}: {}",
                    ip, &creds.username, second.fault());
        }
        debug!("{}: logged in as {:?}", ip, &creds.username);
        Ok(Session::new(second.session_token().unwrap_or(token)))
    }

    async fn call(&self, ip: &str, session: &Session, call: Call<'_>, timeout: Duration)
                  -> Result<Response, Error> {
        let resp = self.post(ip, RPC_PATH, &Request {
            method: call.method,
            params: &call.params,
            id: session.next_id(),
            session: Some(session.token()),
            object: call.object.map(|o| &o.0),
        }, timeout).await?;
        if !resp.succeeded() {
            if let Some(f) = resp.error.as_ref() {
                bail_t!(Rpc, "{} on {}: {}", call.method, ip, f);
            }
        }
        Ok(resp)
    }
}

// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Clients for facial-recognition/access-control terminals.
//!
//! The terminals speak two dialects over HTTP:
//!
//!    * a CGI interface (`/cgi-bin/*.cgi`) guarded by HTTP Digest authentication, used for
//!      one-shot actions such as opening a door or grabbing a snapshot. See [cgi] and [digest].
//!    * a JSON-RPC interface (`/RPC2`) bound to a session obtained from a challenge/response
//!      login at `/RPC2_Login`. See [rpc]. The access log is paged through a server-side cursor
//!      on top of it; see [finder].
//!
//! Nothing here keeps state between operations: every call receives its [Target] and, for RPC,
//! the [rpc::Session] it should use.

#[macro_use]
mod error;

pub mod cgi;
pub mod digest;
pub mod finder;
mod lenient;
pub mod photo;
pub mod rpc;
pub mod testutil;

pub use crate::error::{Error, ErrorKind, ResultExt};

use log::warn;
use std::fmt;
use std::future::Future;
use std::time::Duration;

#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A terminal to operate on, resolved for a single request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Target {
    /// Host, optionally with `:port`.
    pub ip: String,

    /// Door or video channel, starting at 1.
    pub channel: u32,
    pub creds: Credentials,

    /// Wall-clock bound on each exchange with the terminal.
    pub timeout: Duration,
}

/// Builds an `http://` url on the terminal from a path (and optional query).
pub fn device_url(ip: &str, path_and_query: &str) -> Result<url::Url, Error> {
    if ip.is_empty() {
        bail_t!(Config, "no device address");
    }
    url::Url::parse(&format!("http://{}{}", ip, path_and_query)).err_kind(ErrorKind::Config)
}

/// Runs a cleanup step whose failure must not affect the operation it belongs to.
///
/// Failures are logged and turned into `false`.
pub async fn best_effort<T, F>(what: &str, f: F) -> bool
where
    F: Future<Output = Result<T, Error>>,
{
    match f.await {
        Ok(_) => true,
        Err(e) => {
            warn!("best-effort {} failed: {}", what, e);
            false
        }
    }
}

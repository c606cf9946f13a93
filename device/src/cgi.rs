// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! One-shot CGI actions.

use crate::digest::{BinaryResponse, TextRequest, Transport};
use crate::{device_url, Error, Target};
use log::info;
use reqwest::Method;

/// Operator identity the terminal records for remotely opened doors.
const REMOTE_USER_ID: &str = "101";

/// How a terminal answered a CGI action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CgiOutcome {
    Ok,

    /// A recognized failure; holds the trimmed body.
    Failed(String),

    /// Neither; holds the raw body.
    Unknown(String),
}

/// Classifies a CGI action's response body.
///
/// Terminals answer `OK` on success and `Error`/`Invalid ...` text on failure, often with trailing
/// `\r\n`. Anything else is not trusted as success.
pub fn classify_cgi_response(body: &str) -> CgiOutcome {
    if body.contains("OK") {
        CgiOutcome::Ok
    } else if body.contains("Error") || body.contains("Invalid") {
        CgiOutcome::Failed(body.trim().to_owned())
    } else {
        CgiOutcome::Unknown(body.to_owned())
    }
}

/// Opens the door on `target.channel`, returning the terminal's raw answer.
pub async fn open_door(transport: &dyn Transport, target: &Target) -> Result<String, Error> {
    let url = device_url(&target.ip, &format!(
        "/cgi-bin/accessControl.cgi?action=openDoor&channel={}&UserID={}&Type=Remote",
        target.channel, REMOTE_USER_ID))?;
    let resp = transport.fetch_text(TextRequest {
        url: &url,
        creds: &target.creds,
        method: Method::GET,
        body: None,
        timeout: target.timeout,
    }).await?;
    match classify_cgi_response(&resp.raw) {
        CgiOutcome::Ok => {
            info!("{}: opened door on channel {}", &target.ip, target.channel);
            Ok(resp.raw)
        },
        CgiOutcome::Failed(msg) => bail_t!(Device, "{}", msg),
        CgiOutcome::Unknown(raw) => bail_t!(UnknownResponse, "unknown response from {} ({}): {:?}",
                                            &target.ip, resp.status, raw),
    }
}

/// Grabs a still image from `target.channel`. The body is returned unvalidated.
pub async fn fetch_snapshot(transport: &dyn Transport, target: &Target)
                            -> Result<BinaryResponse, Error> {
    let url = device_url(&target.ip, &format!("/cgi-bin/snapshot.cgi?channel={}", target.channel))?;
    transport.fetch_binary(&url, &target.creds, target.timeout).await
}

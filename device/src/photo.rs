// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Retrieving JPEGs: live snapshots and photos stored on the terminal.

use crate::digest::{BinaryResponse, Transport};
use crate::rpc::{Call, Response, Rpc};
use crate::{best_effort, cgi, device_url, Error, ErrorKind, Target};
use bytes::Bytes;
use log::debug;
use pretty_hex::PrettyHex;
use serde_json::{json, Value};
use url::Url;

const JPEG_MAGIC: [u8; 2] = [0xff, 0xd8];
const SAMPLE_LEN: usize = 64;

/// Returns a printable rendition of the start of `body`, for error messages.
fn sample(body: &[u8]) -> String {
    body.iter()
        .take(SAMPLE_LEN)
        .map(|&b| if b == b' ' || b.is_ascii_graphic() { char::from(b) } else { '.' })
        .collect()
}

/// Returns the body if it starts like a JPEG.
pub fn check_jpeg(resp: BinaryResponse) -> Result<Bytes, Error> {
    if resp.body.starts_with(&JPEG_MAGIC) {
        return Ok(resp.body);
    }
    debug!("non-JPEG body ({}, {:?}):\n{:?}", resp.status, &resp.content_type,
           (&resp.body[..resp.body.len().min(SAMPLE_LEN)]).hex_dump());
    bail_t!(InvalidImage, "{} response of {} bytes starts with {:?}",
            resp.status, resp.body.len(), sample(&resp.body));
}

/// Checks `path` is an absolute path on the terminal with no `..` components.
pub fn validate_device_path(path: &str) -> Result<(), Error> {
    if !path.starts_with('/') {
        bail_t!(Validation, "device path {:?} is not absolute", path);
    }
    if path.contains("..") {
        bail_t!(Validation, "device path {:?} contains \"..\"", path);
    }
    Ok(())
}

/// Takes a live snapshot of `target.channel`.
pub async fn snapshot(transport: &dyn Transport, target: &Target) -> Result<Bytes, Error> {
    check_jpeg(cgi::fetch_snapshot(transport, target).await?)
}

/// Fetches a stored photo by its path on the terminal.
pub async fn fetch_by_path(transport: &dyn Transport, target: &Target, path: &str)
                           -> Result<Bytes, Error> {
    validate_device_path(path)?;
    let url = device_url(&target.ip, path)?;
    check_jpeg(transport.fetch_binary(&url, &target.creds, target.timeout).await?)
}

/// Where an `RPC_Loadfile` reply says the file can be downloaded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LoadFile {
    /// The `result` itself (or `params.result`) is the location.
    StringResult(String),

    UrlField(String),
    Neither,
}

impl LoadFile {
    pub fn from_response(resp: &Response) -> Self {
        let nonempty = |v: Option<&Value>| match v {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        };
        if let Some(s) = nonempty(Some(&resp.result)).or_else(|| nonempty(resp.params.get("result"))) {
            return LoadFile::StringResult(s);
        }
        match nonempty(resp.params.get("url")) {
            Some(u) => LoadFile::UrlField(u),
            None => LoadFile::Neither,
        }
    }
}

/// Turns a location from `RPC_Loadfile` into a url reachable from here.
///
/// Terminals describe themselves as `127.0.0.1` or give a bare path; both are relative to `ip`.
pub fn download_url(ip: &str, location: &str) -> Result<Url, Error> {
    if location.starts_with('/') {
        return device_url(ip, location);
    }
    let u = Url::parse(location)
        .map_err(|e| format_err_t!(LoadFileFailed, "unusable file location {:?}: {}", location, e))?;
    if u.host_str() == Some("127.0.0.1") {
        return device_url(ip, &u[url::Position::BeforePath..]);
    }
    Ok(u)
}

/// Fetches a stored photo through a `RPC_Loadfile` download location.
///
/// Logs in for the purpose and logs out before downloading: the location is fetched with Digest
/// authentication and must not depend on the RPC session.
pub async fn fetch_via_load_file(rpc: &dyn Rpc, transport: &dyn Transport, target: &Target,
                                 path: &str) -> Result<Bytes, Error> {
    validate_device_path(path)?;
    let session = rpc.login(&target.ip, &target.creds, target.timeout).await?;
    let loaded = rpc.call(&target.ip, &session,
                          Call::new("RPC_Loadfile", json!({"Name": path})), target.timeout).await;
    best_effort("global.logout", rpc.logout(&target.ip, &session, target.timeout)).await;
    let loaded = loaded.map_err(|e| e.reclassify(ErrorKind::LoadFileFailed))?;
    let location = match LoadFile::from_response(&loaded) {
        LoadFile::StringResult(s) | LoadFile::UrlField(s) => s,
        LoadFile::Neither => bail_t!(LoadFileFailed, "{} gave no location for {:?}: {}",
                                     &target.ip, path, &loaded.result),
    };
    let url = download_url(&target.ip, &location)?;
    debug!("{}: {} is at {}", &target.ip, path, &url);
    check_jpeg(transport.fetch_binary(&url, &target.creds, target.timeout).await?)
}

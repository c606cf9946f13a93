// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Device registries: where a device id's address and credentials are kept.
//!
//! The gateway only reads from them.

use async_trait::async_trait;
use fnv::FnvHashMap;
use log::{debug, warn};
use portaria_device::{Error, ErrorKind, ResultExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use url::Url;

#[derive(Clone, Default, Deserialize, Eq, PartialEq)]
pub struct DeviceRecord {
    pub ip: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub pass: Option<String>,

    #[serde(default)]
    pub channel: Option<u32>,
}

impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("ip", &self.ip)
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "<redacted>"))
            .field("channel", &self.channel)
            .finish()
    }
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// A short name for log messages.
    fn name(&self) -> &str;

    /// Returns `None` if the registry doesn't know `device_id`.
    async fn lookup(&self, device_id: &str) -> Result<Option<DeviceRecord>, Error>;
}

/// A PostgREST-style registry with `devices` and `device_secrets` tables.
pub struct RestRegistry {
    client: reqwest::Client,
    base_url: Url,
    key: Option<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct DeviceRow {
    #[serde(default)]
    ip: Option<String>,
}

#[derive(Deserialize)]
struct SecretRow {
    #[serde(default)]
    username: Option<String>,

    #[serde(default)]
    password: Option<String>,
}

impl RestRegistry {
    pub fn new(mut base_url: Url, key: Option<String>, timeout: Duration) -> Result<Self, Error> {
        if !base_url.path().ends_with('/') {
            let p = format!("{}/", base_url.path());
            base_url.set_path(&p);
        }
        let client = reqwest::Client::builder()
            .build()
            .err_kind(ErrorKind::Internal)?;
        Ok(RestRegistry {
            client,
            base_url,
            key,
            timeout,
        })
    }

    fn table_url(&self, table: &str) -> Result<Url, Error> {
        self.base_url.join(&format!("rest/v1/{}", table)).err_kind(ErrorKind::Config)
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: &[(&str, String)])
                                         -> Result<Vec<T>, Error> {
        let mut req = self.client.get(self.table_url(table)?)
            .query(query)
            .timeout(self.timeout);
        if let Some(k) = self.key.as_ref() {
            req = req.header("apikey", k).bearer_auth(k);
        }
        let resp = req.send().await.err_kind(ErrorKind::Unreachable)?;
        debug!("registry {}: {}", table, resp.status());
        Ok(resp.error_for_status()
               .err_kind(ErrorKind::Transport)?
               .json().await
               .err_kind(ErrorKind::Transport)?)
    }
}

fn nonempty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

#[async_trait]
impl Registry for RestRegistry {
    fn name(&self) -> &str {
        self.base_url.as_str()
    }

    async fn lookup(&self, device_id: &str) -> Result<Option<DeviceRecord>, Error> {
        let rows: Vec<DeviceRow> = self.select("devices", &[
            ("id", format!("eq.{}", device_id)),
            ("select", "id,ip".to_owned()),
        ]).await?;
        let ip = match rows.into_iter().find_map(|r| nonempty(r.ip)) {
            None => return Ok(None),
            Some(ip) => ip,
        };
        let secrets: Result<Vec<SecretRow>, Error> = self.select("device_secrets", &[
            ("device_id", format!("eq.{}", device_id)),
            ("select", "username,password".to_owned()),
        ]).await;
        let (user, pass) = match secrets {
            Ok(rows) => match rows.into_iter().next() {
                Some(s) => (nonempty(s.username), nonempty(s.password)),
                None => (None, None),
            },
            Err(e) => {
                warn!("device {}: no secrets from registry: {}", device_id, e);
                (None, None)
            },
        };
        Ok(Some(DeviceRecord {
            ip,
            user,
            pass,
            channel: None,
        }))
    }
}

/// A fixed device table, typically loaded from a JSON file.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    devices: FnvHashMap<String, DeviceRecord>,
}

impl StaticRegistry {
    pub fn new(devices: FnvHashMap<String, DeviceRecord>) -> Self {
        StaticRegistry { devices }
    }

    /// Parses a JSON table such as `{"dev1": {"ip": "192.168.1.108", "pass": "s3cret"}}`.
    pub fn parse(json: &[u8]) -> Result<Self, Error> {
        Ok(StaticRegistry::new(serde_json::from_slice(json).err_kind(ErrorKind::Config)?))
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let json = std::fs::read(path).err_kind(ErrorKind::Config)?;
        StaticRegistry::parse(&json)
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    fn name(&self) -> &str {
        "static"
    }

    async fn lookup(&self, device_id: &str) -> Result<Option<DeviceRecord>, Error> {
        Ok(self.devices.get(device_id).filter(|d| !d.ip.is_empty()).cloned())
    }
}

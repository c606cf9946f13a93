// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Turning a device id and request overrides into a [Target].

use crate::config::{Defaults, Protocol};
use crate::registry::Registry;
use log::{debug, warn};
use portaria_device::{bail_t, Credentials, Error, Target};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Registry entries without secrets get these.
const FALLBACK_USER: &str = "admin";
const FALLBACK_PASS: &str = "admin";

/// Where to find a device, per the registries or the static configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedDevice {
    pub ip: String,
    pub creds: Credentials,
    pub channel: Option<u32>,
}

/// The `target` a request may carry, overriding everything else field by field.
#[derive(Clone, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetOverride {
    #[serde(default)]
    pub ip: Option<String>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub pass: Option<String>,

    #[serde(default)]
    pub channel: Option<u32>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl fmt::Debug for TargetOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetOverride")
            .field("ip", &self.ip)
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "<redacted>"))
            .field("channel", &self.channel)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

pub struct Resolver {
    /// Consulted in order; the first with a usable record wins.
    registries: Vec<Arc<dyn Registry>>,
    defaults: Arc<Defaults>,
}

fn pick<'a>(candidates: &[Option<&'a String>]) -> Option<&'a str> {
    candidates.iter().filter_map(|c| *c).map(String::as_str).find(|s| !s.is_empty())
}

impl Resolver {
    pub fn new(registries: Vec<Arc<dyn Registry>>, defaults: Arc<Defaults>) -> Self {
        Resolver { registries, defaults }
    }

    /// Looks up `device_id`, falling back to the static configuration.
    ///
    /// Registry failures are logged and skipped. Returns `None` only when nothing, not even the
    /// static configuration, names an address.
    pub async fn resolve(&self, device_id: Option<&str>) -> Option<ResolvedDevice> {
        if let Some(id) = device_id {
            for r in &self.registries {
                match r.lookup(id).await {
                    Ok(Some(d)) if !d.ip.is_empty() => {
                        debug!("device {}: {} via {}", id, &d.ip, r.name());
                        return Some(ResolvedDevice {
                            ip: d.ip,
                            creds: Credentials {
                                username: d.user.unwrap_or_else(|| FALLBACK_USER.to_owned()),
                                password: d.pass.unwrap_or_else(|| FALLBACK_PASS.to_owned()),
                            },
                            channel: d.channel,
                        });
                    },
                    Ok(_) => {},
                    Err(e) => warn!("device {}: registry {} failed, trying next: {}",
                                    id, r.name(), e),
                }
            }
        }
        let ip = self.defaults.ip.as_ref()?;
        Some(ResolvedDevice {
            ip: ip.clone(),
            creds: self.defaults.creds.clone(),
            channel: Some(self.defaults.channel),
        })
    }

    /// Resolves and merges in one step.
    pub async fn target(&self, device_id: Option<&str>, explicit: Option<&TargetOverride>,
                        channel: Option<u32>, protocol: Protocol) -> Result<Target, Error> {
        let resolved = self.resolve(device_id).await;
        merge_target(device_id, explicit, resolved.as_ref(), channel, &self.defaults, protocol)
    }
}

/// Builds the [Target] for one request.
///
/// Each of address, user and password comes from `explicit`, else `resolved`, else `defaults`.
/// The channel prefers the query's `channel` over `explicit` over `resolved` over `defaults`.
pub fn merge_target(device_id: Option<&str>, explicit: Option<&TargetOverride>,
                    resolved: Option<&ResolvedDevice>, channel: Option<u32>, defaults: &Defaults,
                    protocol: Protocol) -> Result<Target, Error> {
    let explicit_ip = explicit.and_then(|e| e.ip.as_ref()).filter(|ip| !ip.is_empty());
    if resolved.is_none() && explicit_ip.is_none() {
        match device_id {
            Some(id) => bail_t!(DeviceNotFound, "no address known for device {:?}", id),
            None => bail_t!(Config, "no device given and no default address configured"),
        }
    }
    let ip = pick(&[explicit_ip, resolved.map(|r| &r.ip), defaults.ip.as_ref()]);
    let user = pick(&[explicit.and_then(|e| e.user.as_ref()),
                      resolved.map(|r| &r.creds.username),
                      Some(&defaults.creds.username)]);
    let pass = pick(&[explicit.and_then(|e| e.pass.as_ref()),
                      resolved.map(|r| &r.creds.password),
                      Some(&defaults.creds.password)]);
    let (ip, user, pass) = match (ip, user, pass) {
        (Some(i), Some(u), Some(p)) => (i, u, p),
        _ => bail_t!(Config, "device {} lacks an address or credentials",
                     device_id.unwrap_or("(default)")),
    };
    let channel = channel
        .or_else(|| explicit.and_then(|e| e.channel))
        .or_else(|| resolved.and_then(|r| r.channel))
        .unwrap_or(defaults.channel);
    if channel == 0 {
        bail_t!(Validation, "channels start at 1");
    }
    let timeout = match explicit.and_then(|e| e.timeout_ms) {
        Some(0) => bail_t!(Validation, "timeoutMs must be positive"),
        Some(ms) => Duration::from_millis(ms),
        None => defaults.timeout(protocol),
    };
    Ok(Target {
        ip: ip.to_owned(),
        channel,
        creds: Credentials {
            username: user.to_owned(),
            password: pass.to_owned(),
        },
        timeout,
    })
}

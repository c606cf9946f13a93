// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Command-line and environment configuration.

use portaria_device::{bail_t, Credentials, Error};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;
use url::Url;

#[derive(Debug, StructOpt)]
#[structopt(about = "Relays door, snapshot and access-log requests to access-control terminals")]
pub struct Opts {
    /// Address to serve HTTP on.
    #[structopt(long, env = "PORTARIA_LISTEN", default_value = "0.0.0.0:4000")]
    pub listen: SocketAddr,

    /// Terminal used when a device can't be resolved otherwise.
    #[structopt(long, env = "FACIAL_IP")]
    pub facial_ip: Option<String>,

    #[structopt(long, env = "FACIAL_USER", default_value = "admin")]
    pub facial_user: String,

    #[structopt(long, env = "FACIAL_PASS", default_value = "admin", hide_env_values = true)]
    pub facial_pass: String,

    #[structopt(long, env = "FACIAL_CHANNEL", default_value = "1")]
    pub facial_channel: u32,

    /// Bound on each CGI or Digest exchange, in milliseconds.
    #[structopt(long, env = "DEVICE_TIMEOUT_MS", default_value = "15000")]
    pub timeout_ms: u64,

    /// Bound on each RPC2 exchange, in milliseconds. Defaults to --timeout-ms.
    #[structopt(long, env = "RPC_TIMEOUT_MS")]
    pub rpc_timeout_ms: Option<u64>,

    /// Base url of a REST device registry, e.g. `https://example.supabase.co`.
    #[structopt(long, env = "REGISTRY_URL", parse(try_from_str))]
    pub registry_url: Option<Url>,

    /// API key for the registry.
    #[structopt(long, env = "REGISTRY_KEY", hide_env_values = true)]
    pub registry_key: Option<String>,

    /// JSON file mapping device ids to `{ip, user, pass, channel}`.
    #[structopt(long, env = "PORTARIA_DEVICES", parse(from_os_str))]
    pub devices: Option<PathBuf>,
}

/// Which default timeout applies to an operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    Cgi,
    Rpc,
}

/// The static gateway configuration, used for whatever a request and the registries leave unset.
#[derive(Clone, Debug, PartialEq)]
pub struct Defaults {
    pub ip: Option<String>,
    pub creds: Credentials,
    pub channel: u32,
    pub timeout: Duration,
    pub rpc_timeout: Duration,
}

impl Defaults {
    pub fn timeout(&self, p: Protocol) -> Duration {
        match p {
            Protocol::Cgi => self.timeout,
            Protocol::Rpc => self.rpc_timeout,
        }
    }
}

impl Opts {
    pub fn defaults(&self) -> Result<Defaults, Error> {
        if self.timeout_ms == 0 || self.rpc_timeout_ms == Some(0) {
            bail_t!(Config, "timeouts must be positive");
        }
        if self.facial_channel == 0 {
            bail_t!(Config, "channels start at 1");
        }
        Ok(Defaults {
            ip: self.facial_ip.clone().filter(|ip| !ip.is_empty()),
            creds: Credentials {
                username: self.facial_user.clone(),
                password: self.facial_pass.clone(),
            },
            channel: self.facial_channel,
            timeout: Duration::from_millis(self.timeout_ms),
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms.unwrap_or(self.timeout_ms)),
        })
    }
}

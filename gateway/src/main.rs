// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! HTTP gateway to condominium access-control terminals.

mod audit;
mod config;
mod events;
mod registry;
mod resolver;
mod web;

use failure::Error;
use log::{error, info};
use portaria_device::digest::DigestClient;
use portaria_device::rpc::RpcClient;
use std::sync::Arc;
use std::{fmt::Write, str::FromStr};
use structopt::StructOpt;

/// Returns a pretty-and-informative version of `e`.
pub fn prettify_failure(e: &failure::Error) -> String {
    let mut msg = e.to_string();
    for cause in e.iter_causes() {
        write!(&mut msg, "\ncaused by: {}", cause).unwrap();
    }
    if e.backtrace().is_empty() {
        write!(
            &mut msg,
            "\n\n(set environment variable RUST_BACKTRACE=1 to see backtraces)"
        )
        .unwrap();
    } else {
        write!(&mut msg, "\n\nBacktrace:\n{}", e.backtrace()).unwrap();
    }
    msg
}

fn init_logging() -> mylog::Handle {
    let h = mylog::Builder::new()
        .set_format(::std::env::var("PORTARIA_FORMAT")
                    .map_err(|_| ())
                    .and_then(|s| mylog::Format::from_str(&s))
                    .unwrap_or(mylog::Format::Google))
        .set_spec(::std::env::var("PORTARIA_LOG").as_deref().unwrap_or("info"))
        .build();
    h.clone().install().unwrap();
    h
}

#[tokio::main]
async fn main() {
    let mut h = init_logging();
    if let Err(e) = { let _a = h.async_scope(); main_inner().await } {
        error!("Fatal: {}", prettify_failure(&e));
        std::process::exit(1);
    }
    info!("Done");
}

fn registries(opts: &config::Opts, defaults: &config::Defaults)
              -> Result<Vec<Arc<dyn registry::Registry>>, Error> {
    let mut registries: Vec<Arc<dyn registry::Registry>> = Vec::new();
    if let Some(url) = opts.registry_url.as_ref() {
        info!("using device registry {}", url);
        registries.push(Arc::new(registry::RestRegistry::new(
            url.clone(), opts.registry_key.clone(), defaults.timeout)?));
    }
    if let Some(path) = opts.devices.as_ref() {
        info!("using device table {}", path.display());
        registries.push(Arc::new(registry::StaticRegistry::load(path)?));
    }
    Ok(registries)
}

async fn main_inner() -> Result<(), Error> {
    let opts = config::Opts::from_args();
    let defaults = opts.defaults()?;
    match defaults.ip.as_ref() {
        Some(ip) => info!("default terminal is {} channel {}", ip, defaults.channel),
        None => info!("no default terminal; requests must name a known device"),
    }
    let resolver = resolver::Resolver::new(registries(&opts, &defaults)?, Arc::new(defaults));
    let svc = Arc::new(web::Service::new(web::Config {
        resolver,
        transport: Arc::new(DigestClient::new()?),
        rpc: Arc::new(RpcClient::new()?),
    }));

    let make_svc = hyper::service::make_service_fn(move |_conn| {
        futures::future::ok::<_, std::convert::Infallible>(hyper::service::service_fn({
            let s = Arc::clone(&svc);
            move |req| Arc::clone(&s).serve(req)
        }))
    });
    let server = hyper::server::Server::try_bind(&opts.listen)?
        .tcp_nodelay(true)
        .serve(make_svc);
    info!("listening on {}", server.local_addr());
    server.with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("unable to wait for shutdown signal: {}", e);
            futures::future::pending::<()>().await;
        }
        info!("shutting down");
    }).await?;
    Ok(())
}

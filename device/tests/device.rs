// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Runs the real clients against a mock terminal on a local port.

use futures::future::FutureExt;
use hyper::{Body, Method, Request, Response, StatusCode};
use openssl::hash::{hash, MessageDigest};
use portaria_device::digest::{DigestClient, TextRequest, Transport};
use portaria_device::finder::{find_records, FindQuery};
use portaria_device::rpc::{Call, Rpc, RpcClient};
use portaria_device::{cgi, device_url, photo, Credentials, ErrorKind, Target};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

const USER: &str = "admin";
const PASSWORD: &str = "s3cret";
const REALM: &str = "Login to 7F0A24EPAJ00109";
const NONCE: &str = "1739884596";
const RANDOM: &str = "1313618233";
const SESSION: &str = "a9c1d85f0bb1d1c73d1e86f6a2b4f1a8";
const JPEG: &[u8] = b"\xff\xd8\xff\xe0\x00\x10JFIF\x00";

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(|| {
        let h = mylog::Builder::new()
            .set_spec(&::std::env::var("PORTARIA_LOG").unwrap_or("info".to_owned()))
            .build();
        h.install().unwrap();
    });
}

fn md5(s: &str) -> String {
    hash(MessageDigest::md5(), s.as_bytes()).unwrap()
        .iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parses the `k=v, k="v"` list of an `Authorization: Digest` header.
fn digest_params(s: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut rest = s.trim();
    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim().to_owned();
        rest = &rest[eq+1..];
        let val = if rest.starts_with('"') {
            let end = rest[1..].find('"').unwrap() + 1;
            let v = &rest[1..end];
            rest = &rest[end+1..];
            v
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let v = rest[..end].trim();
            rest = &rest[end..];
            v
        };
        out.insert(key, val.to_owned());
        rest = rest.trim_start_matches(|c: char| c == ',' || c == ' ');
    }
    out
}

/// The terminal's side of the exchanges: records RPC calls, checks credentials.
#[derive(Default)]
struct Terminal {
    calls: Mutex<Vec<(String, u64)>>,
}

impl Terminal {
    fn authorized(&self, req: &Request<Body>) -> bool {
        let h = match req.headers().get(hyper::header::AUTHORIZATION) {
            None => return false,
            Some(h) => h.to_str().unwrap(),
        };
        let p = digest_params(h.trim_start_matches("Digest "));
        if p.get("username").map(String::as_str) != Some(USER) {
            return false;
        }
        let ha1 = md5(&format!("{}:{}:{}", USER, REALM, PASSWORD));
        let ha2 = md5(&format!("{}:{}", req.method(), &p["uri"]));
        let expected = md5(&format!("{}:{}:{}:{}:{}:{}", ha1, NONCE, &p["nc"], &p["cnonce"],
                                    &p["qop"], ha2));
        p.get("response") == Some(&expected)
    }

    fn login(&self, req: &Value) -> Value {
        let password = req["params"]["password"].as_str().unwrap_or("");
        if password.is_empty() {
            return json!({
                "error": {"code": 268632079, "message": "Component error: login challenge!"},
                "id": req["id"],
                "params": {"encryption": "Default", "random": RANDOM, "realm": REALM},
                "result": false,
                "session": SESSION,
            });
        }
        let inner = md5(&format!("{}:{}:{}", USER, REALM, PASSWORD)).to_uppercase();
        let expected = md5(&format!("{}:{}:{}", USER, RANDOM, inner)).to_uppercase();
        if req["session"] != SESSION || password != expected {
            return json!({
                "error": {"code": 268632085, "message": "Component error: password not valid!"},
                "id": req["id"], "result": false, "session": SESSION,
            });
        }
        json!({"id": req["id"], "params": null, "result": true, "session": SESSION})
    }

    fn rpc(&self, req: &Value) -> Value {
        let method = req["method"].as_str().unwrap_or("").to_owned();
        self.calls.lock().unwrap().push((method.clone(), req["id"].as_u64().unwrap_or(0)));
        if req["session"] != SESSION {
            return json!({"error": {"code": 287637505, "message": "Invalid session in request data!"},
                          "id": req["id"], "result": false});
        }
        let (result, params) = match method.as_str() {
            "RecordFinder.factory.create" => (json!(34_602_560), Value::Null),
            "RecordFinder.doFind" => (json!(true), json!({
                "found": 1,
                "info": [{"RecNo": 9, "CreateTime": 1_700_001_000, "Method": 15, "UserID": "7",
                          "CardName": "Maria", "Status": 1, "Type": "Entry"}],
            })),
            "RecordFinder.startFind" | "RecordFinder.stopFind" | "global.logout" => {
                (json!(true), Value::Null)
            },
            "RPC_Loadfile" => (json!("http://127.0.0.1/RPC_Loadfile/mnt/a.jpg"), Value::Null),

            // Refused without saying why.
            "accessControl.openDoor" => (json!(false), Value::Null),
            _ => return json!({"error": {"code": 268894209, "message": "Method not found"},
                               "id": req["id"], "result": false, "session": SESSION}),
        };
        json!({"id": req["id"], "params": params, "result": result, "session": SESSION})
    }

    async fn serve(self: Arc<Self>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let path = req.uri().path().to_owned();
        let query = req.uri().query().unwrap_or("").to_owned();
        if *req.method() == Method::POST && path.starts_with("/RPC2") {
            let body = hyper::body::to_bytes(req.into_body()).await.unwrap();
            let body: Value = serde_json::from_slice(&body).unwrap();
            let reply = match path.as_str() {
                "/RPC2_Login" => self.login(&body),
                "/RPC2" => self.rpc(&body),
                _ => return Ok(status(StatusCode::NOT_FOUND)),
            };
            return Ok(Response::new(Body::from(reply.to_string())));
        }
        if !self.authorized(&req) {
            let mut r = status(StatusCode::UNAUTHORIZED);
            r.headers_mut().insert(hyper::header::WWW_AUTHENTICATE, format!(
                "Digest realm=\"{}\", qop=\"auth\", nonce=\"{}\", opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"",
                REALM, NONCE).parse().unwrap());
            return Ok(r);
        }
        if *req.method() == Method::POST {
            if path != "/cgi-bin/configManager.cgi" {
                return Ok(status(StatusCode::NOT_FOUND));
            }
            let content_type = req.headers().get(hyper::header::CONTENT_TYPE)
                .map(|v| v.to_str().unwrap().to_owned());
            let body = hyper::body::to_bytes(req.into_body()).await.unwrap();
            let body: Value = serde_json::from_slice(&body).unwrap();
            let reply = json!({"result": true, "contentType": content_type, "received": body});
            return Ok(Response::new(Body::from(reply.to_string())));
        }
        Ok(match path.as_str() {
            "/cgi-bin/snapshot.cgi" | "/RPC_Loadfile/mnt/a.jpg" => {
                if path.starts_with("/RPC_Loadfile") {
                    self.calls.lock().unwrap().push((format!("GET {}", &path), 0));
                }
                let mut r = Response::new(Body::from(JPEG));
                r.headers_mut().insert(hyper::header::CONTENT_TYPE, "image/jpeg".parse().unwrap());
                r
            },
            "/cgi-bin/accessControl.cgi" => {
                if query.contains("channel=9") {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                Response::new(Body::from("OK\r\n"))
            },
            _ => status(StatusCode::NOT_FOUND),
        })
    }
}

fn status(s: StatusCode) -> Response<Body> {
    let mut r = Response::new(Body::empty());
    *r.status_mut() = s;
    r
}

struct Server {
    terminal: Arc<Terminal>,
    ip: String,
    handle: Option<::std::thread::JoinHandle<()>>,
    shutdown_tx: Option<futures::channel::oneshot::Sender<()>>,
}

impl Server {
    fn new() -> Server {
        let terminal = Arc::new(Terminal::default());
        let (shutdown_tx, shutdown_rx) = futures::channel::oneshot::channel::<()>();
        let make_svc = hyper::service::make_service_fn({
            let t = Arc::clone(&terminal);
            move |_conn| {
                futures::future::ok::<_, Infallible>(hyper::service::service_fn({
                    let t = Arc::clone(&t);
                    move |req| Arc::clone(&t).serve(req)
                }))
            }
        });
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = ::std::thread::spawn(move || {
            let addr = ([127, 0, 0, 1], 0).into();
            let rt = tokio::runtime::Runtime::new().unwrap();
            let srv = {
                let _guard = rt.enter();
                hyper::server::Server::bind(&addr)
                    .tcp_nodelay(true)
                    .serve(make_svc)
            };
            let addr = srv.local_addr(); // resolve port 0 to a real ephemeral port number.
            tx.send(addr).unwrap();
            rt.block_on(srv.with_graceful_shutdown(shutdown_rx.map(|_| ())))
                .unwrap();
        });
        let addr = rx.recv().unwrap();
        Server {
            terminal,
            ip: format!("{}:{}", addr.ip(), addr.port()),
            handle: Some(handle),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    fn target(&self, password: &str) -> Target {
        Target {
            ip: self.ip.clone(),
            channel: 1,
            creds: Credentials {
                username: USER.to_owned(),
                password: password.to_owned(),
            },
            timeout: Duration::from_secs(5),
        }
    }

    fn rpc_calls(&self) -> Vec<(String, u64)> {
        self.terminal.calls.lock().unwrap().clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown_tx.take().unwrap().send(()).unwrap();
        self.handle.take().unwrap().join().unwrap()
    }
}

#[tokio::test]
async fn snapshot_through_digest() {
    init();
    let s = Server::new();
    let client = DigestClient::new().unwrap();
    let jpeg = photo::snapshot(&client, &s.target(PASSWORD)).await.unwrap();
    assert_eq!(&jpeg[..], JPEG);
}

#[tokio::test]
async fn snapshot_with_wrong_password() {
    init();
    let s = Server::new();
    let client = DigestClient::new().unwrap();
    let e = photo::snapshot(&client, &s.target("wrong")).await.unwrap_err();
    assert_eq!(e.kind(), ErrorKind::AuthFailed);
}

#[tokio::test]
async fn open_door() {
    init();
    let s = Server::new();
    let client = DigestClient::new().unwrap();
    assert_eq!(cgi::open_door(&client, &s.target(PASSWORD)).await.unwrap(), "OK\r\n");
}

#[tokio::test]
async fn post_through_digest() {
    init();
    let s = Server::new();
    let client = DigestClient::new().unwrap();
    let url = device_url(&s.ip, "/cgi-bin/configManager.cgi?action=setConfig").unwrap();
    let body = r#"{"name": "AccessControl", "table": [{"State": 0}]}"#;
    let target = s.target(PASSWORD);
    let resp = client.fetch_text(TextRequest {
        url: &url,
        creds: &target.creds,
        method: Method::POST,
        body: Some(body),
        timeout: target.timeout,
    }).await.unwrap();
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.data, Some(json!({
        "result": true,
        "contentType": "application/json",
        "received": {"name": "AccessControl", "table": [{"State": 0}]},
    })));

    let wrong = s.target("wrong");
    let e = client.fetch_text(TextRequest {
        url: &url,
        creds: &wrong.creds,
        method: Method::POST,
        body: Some(body),
        timeout: wrong.timeout,
    }).await.unwrap_err();
    assert_eq!(e.kind(), ErrorKind::AuthFailed);
}

#[tokio::test]
async fn slow_terminal_times_out() {
    init();
    let s = Server::new();
    let client = DigestClient::new().unwrap();
    let mut target = s.target(PASSWORD);
    target.channel = 9;
    target.timeout = Duration::from_millis(200);
    let e = cgi::open_door(&client, &target).await.unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn rpc_session_and_finder() {
    init();
    let s = Server::new();
    let rpc = RpcClient::new().unwrap();
    let target = s.target(PASSWORD);
    let session = rpc.login(&s.ip, &target.creds, target.timeout).await.unwrap();
    assert_eq!(session.token(), SESSION);
    let q = FindQuery {
        from: 1_700_000_000,
        to: 1_700_003_600,
        limit: 50,
        offset: 0,
    };
    let r = find_records(&rpc, &s.ip, &session, &q, target.timeout).await.unwrap();
    rpc.logout(&s.ip, &session, target.timeout).await.unwrap();
    assert_eq!(r.found, 1);
    assert!(r.stop_ok);
    assert_eq!(r.records[0].card_name, "Maria");
    assert_eq!(s.rpc_calls(), vec![
        ("RecordFinder.factory.create".to_owned(), 3),
        ("RecordFinder.startFind".to_owned(), 4),
        ("RecordFinder.doFind".to_owned(), 5),
        ("RecordFinder.stopFind".to_owned(), 6),
        ("global.logout".to_owned(), 7),
    ]);
}

#[tokio::test]
async fn rpc_call_outcomes() {
    init();
    let s = Server::new();
    let rpc = RpcClient::new().unwrap();
    let target = s.target(PASSWORD);
    let session = rpc.login(&s.ip, &target.creds, target.timeout).await.unwrap();

    // Falsy result with the terminal's error.
    let e = rpc.call(&s.ip, &session, Call::new("no.such", Value::Null), target.timeout)
        .await.unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Rpc);
    let msg = e.to_string();
    assert!(msg.contains("268894209"), "{}", msg);
    assert!(msg.contains("Method not found"), "{}", msg);

    // Falsy result without one is left to the caller.
    let r = rpc.call(&s.ip, &session, Call::new("accessControl.openDoor", json!({"channel": 1})),
                     target.timeout).await.unwrap();
    assert!(!r.succeeded());
    assert_eq!(r.error, None);
    assert_eq!(s.rpc_calls(), vec![
        ("no.such".to_owned(), 3),
        ("accessControl.openDoor".to_owned(), 4),
    ]);
}

#[tokio::test]
async fn rpc_login_with_wrong_password() {
    init();
    let s = Server::new();
    let rpc = RpcClient::new().unwrap();
    let target = s.target("wrong");
    let e = rpc.login(&s.ip, &target.creds, target.timeout).await.unwrap_err();
    assert_eq!(e.kind(), ErrorKind::AuthFailed);
}

#[tokio::test]
async fn load_file_rewrites_localhost() {
    init();
    let s = Server::new();
    let rpc = RpcClient::new().unwrap();
    let client = DigestClient::new().unwrap();
    let jpeg = photo::fetch_via_load_file(&rpc, &client, &s.target(PASSWORD), "/mnt/a.jpg")
        .await.unwrap();
    assert_eq!(&jpeg[..], JPEG);
    let methods: Vec<String> = s.rpc_calls().into_iter().map(|(m, _)| m).collect();

    // The download url isn't bound to the session, so it still works after logout.
    assert_eq!(methods, ["RPC_Loadfile", "global.logout", "GET /RPC_Loadfile/mnt/a.jpg"]);
}

#[tokio::test]
async fn unreachable_terminal() {
    init();
    let ip = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().to_string()
    };
    let rpc = RpcClient::new().unwrap();
    let creds = Credentials {
        username: USER.to_owned(),
        password: PASSWORD.to_owned(),
    };
    let e = rpc.login(&ip, &creds, Duration::from_secs(5)).await.unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Unreachable);
}

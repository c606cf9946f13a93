// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! HTTP exchanges guarded by Digest authentication.
//!
//! The terminals answer the first request of every exchange with `401 Unauthorized` and a
//! `WWW-Authenticate: Digest ...` challenge. [DigestClient] answers the challenge and retries once,
//! so callers never see the 401 for valid credentials. The challenge isn't cached: each exchange
//! negotiates afresh.

use crate::{Credentials, Error, ErrorKind, ResultExt};
use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use reqwest::header::{self, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use url::Url;

/// One request for [Transport::fetch_text].
#[derive(Debug)]
pub struct TextRequest<'a> {
    pub url: &'a Url,
    pub creds: &'a Credentials,
    pub method: Method,
    pub body: Option<&'a str>,
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextResponse {
    pub status: StatusCode,

    /// The body, if it parsed as JSON.
    pub data: Option<serde_json::Value>,

    pub raw: String,
}

impl TextResponse {
    pub fn new(status: StatusCode, raw: String) -> Self {
        TextResponse {
            status,
            data: serde_json::from_str(&raw).ok(),
            raw,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BinaryResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,

    /// The complete body; interpreting it is up to the caller.
    pub body: Bytes,
}

/// Authenticated HTTP access to a terminal.
///
/// Non-success statuses are returned as responses, not errors: terminals put their error messages
/// in the body. Only a rejected authentication, an unreachable device, and a timeout fail.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch_text(&self, req: TextRequest<'_>) -> Result<TextResponse, Error>;

    async fn fetch_binary(&self, url: &Url, creds: &Credentials, timeout: Duration)
                          -> Result<BinaryResponse, Error>;
}

/// The [Transport] used against real terminals.
pub struct DigestClient {
    client: Client,
}

/// Classifies a `reqwest` failure.
pub(crate) fn transport_err(e: reqwest::Error) -> Error {
    let kind = if e.is_connect() {
        ErrorKind::Unreachable
    } else {
        ErrorKind::Transport
    };
    failure::Error::from(e).context(kind).into()
}

/// Returns the request-uri of `url`, as it must appear in the `Authorization` header.
fn request_uri(url: &Url) -> &str {
    &url[url::Position::BeforePath..]
}

/// Computes the `Authorization` header answering `www_authenticate`.
fn authorization(www_authenticate: &str, method: &Method, url: &Url, creds: &Credentials,
                 body: Option<&str>) -> Result<HeaderValue, Error> {
    let value = if www_authenticate.starts_with("Basic") {
        // Some firmware falls back to Basic on its CGI interface.
        format!("Basic {}",
                base64::encode(format!("{}:{}", &creds.username, &creds.password)))
    } else if www_authenticate.starts_with("Digest ") {
        let mut challenge = digest_auth::WwwAuthenticateHeader::parse(www_authenticate)
            .map_err(|e| format_err_t!(AuthFailed, "unparseable WWW-Authenticate {:?}: {:?}",
                                       www_authenticate, e))?;
        let uri = request_uri(url);
        let ctx = if *method == Method::POST {
            digest_auth::AuthContext::new_post(&creds.username[..], &creds.password[..], uri,
                                               body.map(str::as_bytes))
        } else {
            digest_auth::AuthContext::new(&creds.username[..], &creds.password[..], uri)
        };
        challenge.respond(&ctx)
            .map_err(|e| format_err_t!(AuthFailed, "can't answer digest challenge: {:?}", e))?
            .to_string()
    } else {
        bail_t!(AuthFailed, "unsupported authentication scheme {:?}", www_authenticate);
    };
    HeaderValue::from_str(&value).err_kind(ErrorKind::Internal)
}

impl DigestClient {
    pub fn new() -> Result<Self, Error> {
        let client = Client::builder()
            .build()
            .err_kind(ErrorKind::Internal)?;
        Ok(DigestClient { client })
    }

    async fn send(&self, method: &Method, url: &Url, body: Option<&str>,
                  authorization: Option<HeaderValue>) -> Result<reqwest::Response, Error> {
        let mut req = self.client.request(method.clone(), url.clone());
        if let Some(b) = body {
            req = req.header(header::CONTENT_TYPE, "application/json").body(b.to_owned());
        }
        if let Some(a) = authorization {
            req = req.header(header::AUTHORIZATION, a);
        }
        req.send().await.map_err(transport_err)
    }

    /// Sends the request, answering one authentication challenge if there is one.
    async fn exchange(&self, method: Method, url: &Url, creds: &Credentials, body: Option<&str>)
                      -> Result<reqwest::Response, Error> {
        let resp = self.send(&method, url, body, None).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }
        let v = {
            let auth = resp.headers().get(header::WWW_AUTHENTICATE)
                .ok_or_else(|| format_err_t!(AuthFailed, "Unauthorized with no WWW-Authenticate"))?;
            let auth = auth.to_str().err_kind(ErrorKind::AuthFailed)?;
            authorization(auth, &method, url, creds, body)?
        };
        let resp = self.send(&method, url, body, Some(v)).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            bail_t!(AuthFailed, "{} rejected credentials for user {:?}",
                    url.host_str().unwrap_or(""), &creds.username);
        }
        Ok(resp)
    }
}

/// Bounds `f` by `timeout`, failing with [ErrorKind::Transport] on expiry.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, what: &Url, f: F) -> Result<T, Error>
where
    F: std::future::Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(timeout, f).await {
        Ok(r) => r,
        Err(_) => bail_t!(Transport, "{}: no complete response within {:?}", what, timeout),
    }
}

#[async_trait]
impl Transport for DigestClient {
    async fn fetch_text(&self, req: TextRequest<'_>) -> Result<TextResponse, Error> {
        let url = req.url;
        with_timeout(req.timeout, url, async {
            let resp = self.exchange(req.method.clone(), url, req.creds, req.body).await?;
            let status = resp.status();
            let raw = resp.text().await.map_err(transport_err)?;
            debug!("{} {}: {}, {} bytes", &req.method, url, status, raw.len());
            Ok(TextResponse::new(status, raw))
        }).await
    }

    async fn fetch_binary(&self, url: &Url, creds: &Credentials, timeout: Duration)
                          -> Result<BinaryResponse, Error> {
        with_timeout(timeout, url, async {
            let resp = self.exchange(Method::GET, url, creds, None).await?;
            let status = resp.status();
            let content_type = resp.headers().get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = resp.bytes().await.map_err(transport_err)?;
            debug!("GET {}: {}, {:?}, {} bytes", url, status, &content_type, body.len());
            Ok(BinaryResponse {
                status,
                content_type,
                body,
            })
        }).await
    }
}

#[cfg(test)]
mod tests {
    use super::{authorization, request_uri, TextResponse};
    use crate::{Credentials, ErrorKind};
    use reqwest::{Method, StatusCode};
    use url::Url;

    fn creds() -> Credentials {
        Credentials {
            username: "admin".to_owned(),
            password: "admin".to_owned(),
        }
    }

    #[test]
    fn request_uri_keeps_query() {
        let u = Url::parse("http://10.0.0.5/cgi-bin/snapshot.cgi?channel=1").unwrap();
        assert_eq!(request_uri(&u), "/cgi-bin/snapshot.cgi?channel=1");
    }

    #[test]
    fn answers_digest_challenge() {
        // Example taken from a live camera.
        let www = "Digest realm=\"Login to 3EPAA7EF4DC8055\", qop=\"auth\", nonce=\"1739884596\", \
                   opaque=\"ce65875b0ce375169e3eab8dfa7cd06b3f5d8d4c\"";
        let u = Url::parse("http://10.0.0.5/cgi-bin/snapshot.cgi?channel=1").unwrap();
        let v = authorization(www, &Method::GET, &u, &creds(), None).unwrap();
        let v = v.to_str().unwrap();
        assert!(v.starts_with("Digest "), "{}", v);
        assert!(v.contains("username=\"admin\""), "{}", v);
        assert!(v.contains("realm=\"Login to 3EPAA7EF4DC8055\""), "{}", v);
        assert!(v.contains("uri=\"/cgi-bin/snapshot.cgi?channel=1\""), "{}", v);
        assert!(v.contains("opaque=\"ce65875b0ce375169e3eab8dfa7cd06b3f5d8d4c\""), "{}", v);
    }

    #[test]
    fn answers_basic_challenge() {
        let u = Url::parse("http://10.0.0.5/cgi-bin/snapshot.cgi").unwrap();
        let v = authorization("Basic realm=\"x\"", &Method::GET, &u, &creds(), None).unwrap();
        assert_eq!(v.to_str().unwrap(), "Basic YWRtaW46YWRtaW4=");
    }

    #[test]
    fn rejects_unknown_scheme() {
        let u = Url::parse("http://10.0.0.5/").unwrap();
        let e = authorization("Negotiate", &Method::GET, &u, &creds(), None).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::AuthFailed);
    }

    #[test]
    fn text_response_parses_json_when_possible() {
        let r = TextResponse::new(StatusCode::OK, "{\"result\": true}".to_owned());
        assert_eq!(r.data, Some(serde_json::json!({"result": true})));
        let r = TextResponse::new(StatusCode::OK, "OK\r\n".to_owned());
        assert_eq!(r.data, None);
        assert_eq!(r.raw, "OK\r\n");
    }
}

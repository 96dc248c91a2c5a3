/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{
    fmt::Display,
    net::{Ipv4Addr, Ipv6Addr},
    sync::Arc,
};

use common::lru::LruCache;
use serde::{Serialize, Serializer};
use trust_dns_resolver::{proto::op::ResponseCode, TokioAsyncResolver};

pub mod audit;
pub mod common;
pub mod mta_sts;

pub use audit::{AuditConfig, AuditReport, Auditor, NetTransport, Transport};
pub use mta_sts::{
    Finding, KeyMatch, MailExchangeSet, MxMatch, PolicyDocument, Severity, StsRecord,
};

pub static USER_AGENT: &str = concat!("mta-sts-check/", env!("CARGO_PKG_VERSION"));

pub struct Resolver {
    pub(crate) resolver: TokioAsyncResolver,
    pub(crate) cache_txt: LruCache<String, Arc<Vec<String>>>,
    pub(crate) cache_mx: LruCache<String, Arc<Vec<MX>>>,
    pub(crate) cache_ipv4: LruCache<String, Arc<Vec<Ipv4Addr>>>,
    pub(crate) cache_ipv6: LruCache<String, Arc<Vec<Ipv6Addr>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MX {
    pub exchanges: Vec<String>,
    pub preference: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpLookupStrategy {
    Ipv4Only,
    Ipv6Only,
    #[default]
    Ipv4thenIpv6,
    Ipv6thenIpv4,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Io(String),
    Timeout,

    DnsError(String),
    DnsRecordNotFound(ResponseCode),
    InvalidRecordType,

    Smtp(String),
    MissingStartTls,
    Tls(String),

    Http(String),
    InvalidPolicy(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Timeout => write!(f, "Operation timed out."),
            Error::DnsError(e) => write!(f, "DNS resolution error: {e}"),
            Error::DnsRecordNotFound(code) => write!(f, "DNS record not found: {code}."),
            Error::InvalidRecordType => {
                write!(f, "No TXT record starting with 'v=STSv1; ' was found.")
            }
            Error::Smtp(e) => write!(f, "SMTP error: {e}"),
            Error::MissingStartTls => write!(f, "STARTTLS not advertised by host."),
            Error::Tls(e) => write!(f, "TLS handshake failed: {e}"),
            Error::Http(e) => write!(f, "{e}"),
            Error::InvalidPolicy(e) => write!(f, "Invalid policy resource: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl Serialize for Error {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<mail_send::Error> for Error {
    fn from(err: mail_send::Error) -> Self {
        match err {
            mail_send::Error::Io(err) => Error::Io(err.to_string()),
            mail_send::Error::Timeout => Error::Timeout,
            mail_send::Error::MissingStartTls => Error::MissingStartTls,
            mail_send::Error::InvalidTLSName => Error::Tls(err.to_string()),
            _ => Error::Smtp(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(if err.is_timeout() {
            "Timeout fetching policy.".to_string()
        } else if err.is_connect() {
            format!("Could not reach policy host: {err}")
        } else if let Some(status) = err.status() {
            if status == reqwest::StatusCode::NOT_FOUND {
                "Policy not found.".to_string()
            } else {
                format!("Policy host replied with status {status}.")
            }
        } else {
            format!("Failed to fetch policy: {err}")
        })
    }
}

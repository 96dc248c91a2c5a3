/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::fmt::Display;

use serde::{ser::SerializeStruct, Serialize, Serializer};

use crate::MX;

pub mod parse;
pub mod verify;

pub const STS_VERSION: &str = "STSv1";
pub const STS_RECORD_PREFIX: &str = "v=STSv1; ";

/// Discovery record published at `_mta-sts.<domain>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StsRecord {
    pub record: String,
    pub id: Option<String>,
}

/// How policy keys are looked up.
///
/// `Prefix` tests whether the raw, untrimmed line starts with the key name,
/// so `mxfoo: bar` counts as an `mx` entry and a line such as `version` with
/// no separator still satisfies `has_key("version")`. `Exact` compares the
/// trimmed text found before the first `:` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyMatch {
    #[default]
    Prefix,
    Exact,
}

/// How `mx` patterns are compared against resolved MX hosts.
///
/// `Exact` compares byte for byte: a pattern starting with `.` matches a
/// host whose text from its first `.` onwards equals the pattern, any other
/// pattern must equal the host. `Lenient` follows RFC 8461 instead: both
/// sides are compared ASCII case-insensitively and `*.example.com` is read
/// as `.example.com`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MxMatch {
    #[default]
    Exact,
    Lenient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PolicyLine {
    pub(crate) raw: String,
    pub(crate) key: Option<String>,
    pub(crate) value: String,
}

/// A parsed `mta-sts.txt` policy resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDocument {
    pub(crate) lines: Vec<PolicyLine>,
    pub(crate) key_match: KeyMatch,
    pub(crate) mx_match: MxMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Enforce,
    Report,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MxPattern {
    Equals(String),
    Suffix(String),
}

/// Resolved MX hostnames in preference order, without the root label dot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MailExchangeSet(Vec<String>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    MissingVersion,
    InvalidVersion(String),
    MissingMode,
    InvalidMode(String),
    MissingMaxAge,
    UnknownKey(String),
    UndefinedMx(String),
    NoMxPatterns,
    DuplicateMx(String),
}

impl Finding {
    pub fn severity(&self) -> Severity {
        match self {
            Finding::NoMxPatterns => Severity::Warning,
            Finding::DuplicateMx(_) => Severity::Info,
            _ => Severity::Error,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Finding::MissingVersion => "missing_version",
            Finding::InvalidVersion(_) => "invalid_version",
            Finding::MissingMode => "missing_mode",
            Finding::InvalidMode(_) => "invalid_mode",
            Finding::MissingMaxAge => "missing_max_age",
            Finding::UnknownKey(_) => "unknown_key",
            Finding::UndefinedMx(_) => "undefined_mx",
            Finding::NoMxPatterns => "no_mx_patterns",
            Finding::DuplicateMx(_) => "duplicate_mx",
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity() == Severity::Error
    }
}

impl Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Finding::MissingVersion => write!(f, "policy resource must contain a version field."),
            Finding::InvalidVersion(_) => write!(f, "version must equal '{STS_VERSION}'"),
            Finding::MissingMode => write!(f, "policy resource must contain a mode field."),
            Finding::InvalidMode(mode) => write!(
                f,
                "mode must be 'enforce', 'report' or 'none', found '{mode}'."
            ),
            Finding::MissingMaxAge => write!(f, "policy resource should have a 'max_age' field."),
            Finding::UnknownKey(key) => write!(f, "unknown field '{key}' in policy resource."),
            Finding::UndefinedMx(host) => write!(f, "undefined MX record [{host}]"),
            Finding::NoMxPatterns => write!(f, "policy resource does not list any mx entries."),
            Finding::DuplicateMx(mx) => write!(f, "mx entry '{mx}' is listed more than once."),
        }
    }
}

impl Serialize for Finding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut finding = serializer.serialize_struct("Finding", 3)?;
        finding.serialize_field("severity", &self.severity())?;
        finding.serialize_field("code", self.code())?;
        finding.serialize_field("message", &self.to_string())?;
        finding.end()
    }
}

impl Display for MxPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MxPattern::Equals(host) => f.write_str(host),
            MxPattern::Suffix(suffix) => write!(f, "*{suffix}"),
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

impl MailExchangeSet {
    pub fn new(hosts: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        MailExchangeSet(
            hosts
                .into_iter()
                .map(|host| {
                    let host = host.as_ref().trim();
                    host.strip_suffix('.').unwrap_or(host).to_string()
                })
                .collect(),
        )
    }

    pub fn hosts(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[MX]> for MailExchangeSet {
    fn from(records: &[MX]) -> Self {
        MailExchangeSet::new(records.iter().flat_map(|mx| mx.exchanges.iter()))
    }
}

#[cfg(test)]
mod test {
    use crate::MX;

    use super::MailExchangeSet;

    #[test]
    fn mx_set_normalization() {
        let set = MailExchangeSet::from(
            &[
                MX {
                    exchanges: vec![
                        "mx1.example.com.".to_string(),
                        "mx2.example.com.".to_string(),
                    ],
                    preference: 10,
                },
                MX {
                    exchanges: vec!["backup.example.net".to_string()],
                    preference: 20,
                },
            ][..],
        );

        assert_eq!(
            set.hosts(),
            ["mx1.example.com", "mx2.example.com", "backup.example.net"]
        );

        // Only a single root label dot is removed
        assert_eq!(MailExchangeSet::new(["mx.example.com.."]).hosts(), ["mx.example.com."]);
    }
}

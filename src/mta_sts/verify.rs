/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use super::{Finding, Mode, MxMatch, MxPattern, PolicyDocument, STS_VERSION};

impl PolicyDocument {
    /// Checks the policy against the MTA-STS grammar and the MX hosts the
    /// domain currently publishes. Every finding is collected, nothing
    /// stops at the first problem.
    pub fn validate<T: AsRef<str>>(&self, mx_hosts: &[T]) -> Vec<Finding> {
        let mut findings = Vec::new();

        match self.version() {
            None => findings.push(Finding::MissingVersion),
            Some(version) if version != STS_VERSION => {
                findings.push(Finding::InvalidVersion(version.to_string()))
            }
            _ => (),
        }

        match self.value_for_key("mode") {
            None => findings.push(Finding::MissingMode),
            Some(mode) if Mode::parse(mode).is_none() => {
                findings.push(Finding::InvalidMode(mode.to_string()))
            }
            _ => (),
        }

        if !self.has_key("max_age") {
            findings.push(Finding::MissingMaxAge);
        }

        for key in self.unknown_keys() {
            findings.push(Finding::UnknownKey(key.to_string()));
        }

        let patterns = self.mx();
        for host in mx_hosts {
            let host = host.as_ref();
            if host.is_empty() {
                continue;
            }
            let matched = match self.mx_match {
                MxMatch::Exact => patterns.iter().any(|pattern| pattern.matches(host)),
                MxMatch::Lenient => {
                    let host = host.to_ascii_lowercase();
                    patterns.iter().any(|pattern| pattern.matches(&host))
                }
            };
            if !matched {
                findings.push(Finding::UndefinedMx(host.to_string()));
            }
        }

        findings
    }

    /// Advisory checks on the `mx` list that go beyond the policy grammar:
    /// an enforcing or reporting policy that lists no `mx` entry, and
    /// entries listed more than once (reported once each).
    pub fn lint(&self) -> Vec<Finding> {
        let mut findings = Vec::new();
        let patterns = self.mx();

        if patterns.is_empty() && matches!(self.mode(), Some(Mode::Enforce | Mode::Report)) {
            findings.push(Finding::NoMxPatterns);
        }

        for (pos, pattern) in patterns.iter().enumerate() {
            if patterns[..pos].contains(pattern) && !patterns[pos + 1..].contains(pattern) {
                findings.push(Finding::DuplicateMx(pattern.to_string()));
            }
        }

        findings
    }
}

impl MxPattern {
    /// A suffix pattern only covers hosts one label below it: the host is
    /// cut at its first dot and the remainder must equal the pattern.
    pub fn matches(&self, host: &str) -> bool {
        match self {
            MxPattern::Equals(pattern) => pattern == host,
            MxPattern::Suffix(suffix) => host
                .find('.')
                .map_or(false, |pos| &host[pos..] == suffix),
        }
    }
}

/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use crate::Error;

use super::{
    KeyMatch, Mode, MxMatch, MxPattern, PolicyDocument, PolicyLine, StsRecord, STS_RECORD_PREFIX,
};

impl StsRecord {
    pub fn parse(record: &str) -> crate::Result<Self> {
        let tags = record
            .strip_prefix(STS_RECORD_PREFIX)
            .ok_or(Error::InvalidRecordType)?;

        let id = tags.split(';').find_map(|tag| {
            let (key, value) = tag.split_once('=')?;
            if key.trim() == "id" {
                Some(value.trim().to_string())
            } else {
                None
            }
        });

        Ok(StsRecord {
            record: record.to_string(),
            id,
        })
    }
}

impl PolicyDocument {
    pub fn parse(data: &str) -> Self {
        PolicyDocument::parse_with(data, KeyMatch::default())
    }

    pub fn parse_with(data: &str, key_match: KeyMatch) -> Self {
        let mut lines = Vec::new();

        for raw in data.split('\n') {
            let raw = raw.strip_suffix('\r').unwrap_or(raw);
            if raw.trim().is_empty() {
                continue;
            }

            let (key, value) = if let Some((key, value)) = raw.split_once(':') {
                let key = key.trim();
                (
                    (!key.is_empty()).then(|| key.to_string()),
                    value.trim().to_string(),
                )
            } else {
                (None, String::new())
            };

            lines.push(PolicyLine {
                raw: raw.to_string(),
                key,
                value,
            });
        }

        PolicyDocument {
            lines,
            key_match,
            mx_match: MxMatch::default(),
        }
    }

    /// Sets how `mx` patterns are compared against resolved hosts.
    pub fn with_mx_match(mut self, mx_match: MxMatch) -> Self {
        self.mx_match = mx_match;
        self
    }

    fn key_matches(&self, line: &PolicyLine, key: &str) -> bool {
        match self.key_match {
            KeyMatch::Prefix => line.raw.starts_with(key),
            KeyMatch::Exact => line.key.as_deref() == Some(key),
        }
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.lines.iter().any(|line| self.key_matches(line, key))
    }

    /// Value of the first line holding `key`, empty when that line has no
    /// `:` separator.
    pub fn value_for_key(&self, key: &str) -> Option<&str> {
        self.lines
            .iter()
            .find(|line| self.key_matches(line, key))
            .map(|line| line.value.as_str())
    }

    pub fn values_for_key<'x>(&'x self, key: &'x str) -> impl Iterator<Item = &'x str> + 'x {
        self.lines
            .iter()
            .filter(move |line| self.key_matches(line, key))
            .map(|line| line.value.as_str())
    }

    pub fn all_keys(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| line.key.as_deref())
    }

    pub fn version(&self) -> Option<&str> {
        self.value_for_key("version")
    }

    pub fn mode(&self) -> Option<Mode> {
        self.value_for_key("mode").and_then(Mode::parse)
    }

    pub fn max_age(&self) -> Option<&str> {
        self.value_for_key("max_age")
    }

    pub fn mx(&self) -> Vec<MxPattern> {
        self.values_for_key("mx")
            .filter(|value| !value.is_empty())
            .map(|value| MxPattern::parse_with(value, self.mx_match))
            .collect()
    }

    pub fn unknown_keys(&self) -> impl Iterator<Item = &str> {
        self.all_keys()
            .filter(|key| !matches!(*key, "version" | "mode" | "max_age" | "mx"))
    }
}

impl Mode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "enforce" => Some(Mode::Enforce),
            "report" => Some(Mode::Report),
            "none" => Some(Mode::None),
            _ => None,
        }
    }
}

impl MxPattern {
    pub fn parse(value: &str) -> Self {
        MxPattern::parse_with(value, MxMatch::Exact)
    }

    pub fn parse_with(value: &str, mx_match: MxMatch) -> Self {
        match mx_match {
            MxMatch::Exact => {
                if value.starts_with('.') {
                    MxPattern::Suffix(value.to_string())
                } else {
                    MxPattern::Equals(value.to_string())
                }
            }
            MxMatch::Lenient => {
                let value = value.to_ascii_lowercase();
                if let Some(suffix) = value.strip_prefix('*').filter(|s| s.starts_with('.')) {
                    MxPattern::Suffix(suffix.to_string())
                } else if value.starts_with('.') {
                    MxPattern::Suffix(value)
                } else {
                    MxPattern::Equals(value)
                }
            }
        }
    }
}

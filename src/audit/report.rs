/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::fmt::Display;

use super::AuditReport;

impl AuditReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Display for AuditReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "MTA-STS audit for {}", self.domain)?;
        writeln!(f)?;

        match &self.mx {
            Ok(hosts) if hosts.is_empty() => writeln!(f, "ERROR: No MX records found.")?,
            Ok(hosts) => {
                writeln!(f, "MX records:")?;
                for host in hosts.hosts() {
                    writeln!(f, "\t{host}")?;
                }
            }
            Err(err) => writeln!(f, "ERROR: MX lookup failed: {err}")?,
        }
        writeln!(f)?;

        for probe in &self.starttls {
            match &probe.result {
                Ok(_) => writeln!(f, "✔ {} certificate is good", probe.host)?,
                Err(err) => writeln!(
                    f,
                    "ERROR: [{}:{}] failed with error message\n\t{}",
                    probe.host, probe.port, err
                )?,
            }
        }
        if !self.starttls.is_empty() {
            writeln!(f)?;
        }

        match &self.sts_record {
            Ok(record) => {
                writeln!(f, "STS Found. STS Record:\n\t {}", record.record)?;
                if record.id.is_none() {
                    writeln!(f, "WARNING: STS record has no 'id' field.")?;
                }
            }
            Err(err) => writeln!(f, "ERROR: STS Failed DNS record not found: {err}")?,
        }
        writeln!(f)?;

        match &self.policy {
            Ok(policy) => {
                writeln!(f, "STS HTTPS Record ({}):", self.policy_url)?;
                writeln!(f, "------------------")?;
                writeln!(f, "{}", policy.body.trim_end())?;
                writeln!(f, "------------------")?;
                if policy.findings.is_empty() {
                    writeln!(f, "✔ Policy is valid.")?;
                } else {
                    for finding in &policy.findings {
                        writeln!(
                            f,
                            "{}: {}",
                            finding.severity().to_string().to_uppercase(),
                            finding
                        )?;
                    }
                }
            }
            Err(err) => writeln!(
                f,
                "ERROR: STS Failed HTTPS record not found ({}): {}",
                self.policy_url, err
            )?,
        }

        Ok(())
    }
}

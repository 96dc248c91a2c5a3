/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{net::SocketAddr, time::Duration};

use serde::Serialize;
use trust_dns_resolver::proto::op::ResponseCode;

use crate::{
    mta_sts::{Finding, KeyMatch, MailExchangeSet, MxMatch, PolicyDocument, StsRecord},
    Error, IpLookupStrategy, Resolver,
};

pub mod https;
pub mod report;
pub mod smtp;

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub port: u16,
    pub timeout: Duration,
    pub ehlo_hostname: String,
    pub key_match: KeyMatch,
    pub mx_match: MxMatch,
    pub starttls: bool,
    pub ip_strategy: IpLookupStrategy,
}

/// Network operations performed against the audited domain.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Connects to `addr`, upgrades the session with STARTTLS and completes
    /// a TLS handshake verifying the certificate against `hostname`.
    async fn starttls(&self, hostname: &str, addr: SocketAddr) -> crate::Result<()>;

    /// Fetches the policy resource, returning the response body.
    async fn fetch_policy(&self, url: &str) -> crate::Result<String>;
}

/// Talks to the real MX and policy hosts.
pub struct NetTransport {
    pub(crate) http: reqwest::Client,
    pub(crate) timeout: Duration,
    pub(crate) ehlo_hostname: String,
}

pub struct Auditor<T: Transport = NetTransport> {
    resolver: Resolver,
    transport: T,
    config: AuditConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartTlsProbe {
    pub host: String,
    pub port: u16,
    pub result: crate::Result<()>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyCheck {
    pub body: String,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub domain: String,
    pub mx: crate::Result<MailExchangeSet>,
    pub starttls: Vec<StartTlsProbe>,
    pub sts_record: crate::Result<StsRecord>,
    pub policy_url: String,
    pub policy: crate::Result<PolicyCheck>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            port: 25,
            timeout: Duration::from_secs(30),
            ehlo_hostname: "localhost".to_string(),
            key_match: KeyMatch::Prefix,
            mx_match: MxMatch::Exact,
            starttls: true,
            ip_strategy: IpLookupStrategy::Ipv4thenIpv6,
        }
    }
}

impl Auditor<NetTransport> {
    pub fn new(resolver: Resolver, config: AuditConfig) -> crate::Result<Self> {
        Ok(Self::with_transport(
            resolver,
            NetTransport::new(&config)?,
            config,
        ))
    }
}

impl<T: Transport> Auditor<T> {
    pub fn with_transport(resolver: Resolver, transport: T, config: AuditConfig) -> Self {
        Auditor {
            resolver,
            transport,
            config,
        }
    }

    /// Runs every check against `domain`. Failures are recorded in the
    /// returned report, a failing check never prevents the next one from
    /// running.
    pub async fn audit(&self, domain: &str) -> AuditReport {
        let domain = domain.trim().trim_end_matches('.').to_lowercase();

        // Mail exchanges
        let mx = self
            .resolver
            .mx_lookup(domain.as_str())
            .await
            .map(|records| MailExchangeSet::from(records.as_slice()));
        match &mx {
            Ok(hosts) => tracing::debug!(
                module = "audit",
                event = "mx-lookup",
                domain = %domain,
                hosts = ?hosts.hosts()
            ),
            Err(err) => tracing::warn!(
                module = "audit",
                event = "mx-lookup",
                domain = %domain,
                reason = %err,
                "MX lookup failed."
            ),
        }

        // STARTTLS on every MX, one at a time
        let mut starttls = Vec::new();
        if let (Ok(hosts), true) = (&mx, self.config.starttls) {
            for host in hosts.hosts().iter().filter(|host| !host.is_empty()) {
                starttls.push(self.probe_starttls(host).await);
            }
        }

        let sts_record = self.sts_record(&domain).await;

        // Policy resource
        let policy_url = policy_url(&domain);
        let policy = match self.transport.fetch_policy(&policy_url).await {
            Ok(body) => {
                let document = PolicyDocument::parse_with(&body, self.config.key_match)
                    .with_mx_match(self.config.mx_match);
                let mut findings = document.validate(
                    mx.as_ref()
                        .map(|hosts| hosts.hosts())
                        .unwrap_or_default(),
                );
                findings.extend(document.lint());
                tracing::debug!(
                    module = "audit",
                    event = "policy-validated",
                    domain = %domain,
                    findings = findings.len()
                );
                Ok(PolicyCheck { body, findings })
            }
            Err(err) => {
                tracing::warn!(
                    module = "audit",
                    event = "policy-fetch",
                    url = %policy_url,
                    reason = %err,
                    "Failed to fetch policy."
                );
                Err(err)
            }
        };

        AuditReport {
            domain,
            mx,
            starttls,
            sts_record,
            policy_url,
            policy,
        }
    }

    /// Looks up the `_mta-sts` TXT record and returns the first one in
    /// MTA-STS format.
    pub async fn sts_record(&self, domain: &str) -> crate::Result<StsRecord> {
        let records = self
            .resolver
            .txt_lookup(format!("_mta-sts.{domain}"))
            .await?;
        records
            .iter()
            .find_map(|record| StsRecord::parse(record).ok())
            .ok_or(Error::InvalidRecordType)
    }

    pub async fn probe_starttls(&self, host: &str) -> StartTlsProbe {
        let port = self.config.port;
        let result = match self
            .resolver
            .ip_lookup(host, self.config.ip_strategy, 1)
            .await
        {
            Ok(ips) => match ips.first() {
                Some(ip) => {
                    self.transport
                        .starttls(host, SocketAddr::new(*ip, port))
                        .await
                }
                None => Err(Error::DnsRecordNotFound(ResponseCode::NoError)),
            },
            Err(err) => Err(err),
        };

        match &result {
            Ok(_) => tracing::info!(
                module = "audit",
                event = "starttls",
                host = host,
                port = port,
                "Certificate is valid."
            ),
            Err(err) => tracing::warn!(
                module = "audit",
                event = "starttls",
                host = host,
                port = port,
                reason = %err,
                "STARTTLS probe failed."
            ),
        }

        StartTlsProbe {
            host: host.to_string(),
            port,
            result,
        }
    }
}

impl AuditReport {
    pub fn findings(&self) -> &[Finding] {
        self.policy
            .as_ref()
            .map(|policy| policy.findings.as_slice())
            .unwrap_or_default()
    }

    /// Whether any check failed or the policy produced an error finding.
    pub fn has_errors(&self) -> bool {
        self.mx.is_err()
            || self.sts_record.is_err()
            || self.policy.is_err()
            || self.starttls.iter().any(|probe| probe.result.is_err())
            || self.findings().iter().any(|finding| finding.is_error())
    }
}

pub fn policy_url(domain: &str) -> String {
    format!("https://mta-sts.{domain}/.well-known/mta-sts.txt")
}

#[cfg(test)]
mod test {
    use std::{
        net::{Ipv4Addr, SocketAddr},
        time::{Duration, Instant},
    };

    use parking_lot::Mutex;
    use trust_dns_resolver::proto::op::ResponseCode;

    use crate::{
        common::resolver::ResolverKind,
        mta_sts::{Finding, KeyMatch, MxMatch, StsRecord},
        Error, Resolver, MX,
    };

    use super::{AuditConfig, Auditor, Transport};

    #[derive(Default)]
    struct MockTransport {
        policy: Option<String>,
        failing_hosts: Vec<&'static str>,
        probed: Mutex<Vec<(String, SocketAddr)>>,
        fetched: Mutex<Vec<String>>,
    }

    impl Transport for MockTransport {
        async fn starttls(&self, hostname: &str, addr: SocketAddr) -> crate::Result<()> {
            self.probed.lock().push((hostname.to_string(), addr));
            if self.failing_hosts.iter().any(|host| *host == hostname) {
                Err(Error::MissingStartTls)
            } else {
                Ok(())
            }
        }

        async fn fetch_policy(&self, url: &str) -> crate::Result<String> {
            self.fetched.lock().push(url.to_string());
            self.policy
                .clone()
                .ok_or_else(|| Error::Http("Policy not found.".to_string()))
        }
    }

    fn resolver() -> Resolver {
        Resolver::new(ResolverKind::Cloudflare, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn audit_compliant_domain() {
        let resolver = resolver();
        let valid_until = Instant::now() + Duration::from_secs(60);
        resolver.mx_add(
            "example.com",
            vec![MX {
                exchanges: vec!["mx.example.com.".to_string()],
                preference: 10,
            }],
            valid_until,
        );
        resolver.txt_add(
            "_mta-sts.example.com",
            vec!["v=STSv1; id=1".to_string()],
            valid_until,
        );
        resolver.ipv4_add(
            "mx.example.com",
            vec![Ipv4Addr::new(192, 0, 2, 1)],
            valid_until,
        );

        let auditor = Auditor::with_transport(
            resolver,
            MockTransport {
                policy: Some(
                    "version: STSv1\nmode: enforce\nmax_age: 86400\nmx: mx.example.com\n"
                        .to_string(),
                ),
                ..Default::default()
            },
            AuditConfig::default(),
        );
        let report = auditor.audit("example.com").await;

        assert_eq!(report.domain, "example.com");
        assert_eq!(report.mx.as_ref().unwrap().hosts(), ["mx.example.com"]);
        assert_eq!(
            report.sts_record,
            Ok(StsRecord {
                record: "v=STSv1; id=1".to_string(),
                id: Some("1".to_string()),
            })
        );
        assert!(report.findings().is_empty());
        assert!(!report.has_errors());

        assert_eq!(report.starttls.len(), 1);
        assert_eq!(report.starttls[0].host, "mx.example.com");
        assert_eq!(report.starttls[0].result, Ok(()));
        assert_eq!(
            auditor.transport.probed.lock().as_slice(),
            &[(
                "mx.example.com".to_string(),
                SocketAddr::from((Ipv4Addr::new(192, 0, 2, 1), 25))
            )]
        );
        assert_eq!(
            auditor.transport.fetched.lock().as_slice(),
            &["https://mta-sts.example.com/.well-known/mta-sts.txt".to_string()]
        );
    }

    #[tokio::test]
    async fn audit_reports_every_failure() {
        let resolver = resolver();
        let valid_until = Instant::now() + Duration::from_secs(60);
        resolver.mx_add(
            "example.org",
            vec![
                MX {
                    exchanges: vec!["mx1.example.org.".to_string()],
                    preference: 10,
                },
                MX {
                    exchanges: vec![
                        "mx2.example.org.".to_string(),
                        "mx3.example.org.".to_string(),
                    ],
                    preference: 20,
                },
            ],
            valid_until,
        );
        resolver.txt_add(
            "_mta-sts.example.org",
            vec!["v=spf1 -all".to_string(), "v=STSv1;id=1".to_string()],
            valid_until,
        );
        for host in ["mx1.example.org", "mx2.example.org"] {
            resolver.ipv4_add(host, vec![Ipv4Addr::LOCALHOST], valid_until);
        }

        let auditor = Auditor::with_transport(
            resolver,
            MockTransport {
                policy: Some(
                    "version: STSv1\nmode: testing\nmx: mx1.example.org\nmx: *.example.net\n"
                        .to_string(),
                ),
                failing_hosts: vec!["mx2.example.org"],
                ..Default::default()
            },
            AuditConfig {
                port: 2525,
                ..Default::default()
            },
        );
        let report = auditor.audit("Example.org.").await;

        assert_eq!(report.domain, "example.org");
        assert_eq!(
            report
                .starttls
                .iter()
                .map(|probe| (probe.host.as_str(), probe.port, probe.result.clone()))
                .collect::<Vec<_>>(),
            vec![
                ("mx1.example.org", 2525, Ok(())),
                ("mx2.example.org", 2525, Err(Error::MissingStartTls)),
                (
                    "mx3.example.org",
                    2525,
                    Err(Error::DnsRecordNotFound(ResponseCode::NXDomain))
                ),
            ]
        );
        assert_eq!(report.sts_record, Err(Error::InvalidRecordType));
        assert_eq!(
            report.findings(),
            &[
                Finding::InvalidMode("testing".to_string()),
                Finding::MissingMaxAge,
                Finding::UndefinedMx("mx2.example.org".to_string()),
                Finding::UndefinedMx("mx3.example.org".to_string()),
            ]
        );
        assert!(report.has_errors());
    }

    #[tokio::test]
    async fn audit_survives_dns_and_http_failures() {
        let auditor = Auditor::with_transport(
            resolver(),
            MockTransport::default(),
            AuditConfig {
                key_match: KeyMatch::Exact,
                ..Default::default()
            },
        );
        let report = auditor.audit("_dns_error.example.net").await;

        assert_eq!(report.mx, Err(Error::DnsError("".to_string())));
        assert!(report.starttls.is_empty());
        assert_eq!(report.sts_record, Err(Error::DnsError("".to_string())));
        assert_eq!(report.policy, Err(Error::Http("Policy not found.".to_string())));
        assert!(report.findings().is_empty());
        assert!(report.has_errors());
        assert_eq!(auditor.transport.fetched.lock().len(), 1);

        // Policy is still validated when the MX lookup fails
        let auditor = Auditor::with_transport(
            resolver(),
            MockTransport {
                policy: Some("version: STSv1\nmode: none\nmax_age: 1\n".to_string()),
                ..Default::default()
            },
            AuditConfig::default(),
        );
        let report = auditor.audit("example.net").await;
        assert_eq!(
            report.mx,
            Err(Error::DnsRecordNotFound(ResponseCode::NXDomain))
        );
        assert!(report.findings().is_empty());
        assert!(report.policy.is_ok());
    }

    #[tokio::test]
    async fn audit_mx_match_modes() {
        for (mx_match, expected) in [
            (
                MxMatch::Exact,
                vec![
                    Finding::UndefinedMx("MX.example.com".to_string()),
                    Finding::DuplicateMx("*.example.com".to_string()),
                ],
            ),
            (
                MxMatch::Lenient,
                vec![Finding::DuplicateMx("*.example.com".to_string())],
            ),
        ] {
            let resolver = resolver();
            resolver.mx_add(
                "example.com",
                vec![MX {
                    exchanges: vec!["MX.example.com.".to_string()],
                    preference: 10,
                }],
                Instant::now() + Duration::from_secs(60),
            );

            let auditor = Auditor::with_transport(
                resolver,
                MockTransport {
                    policy: Some(
                        "version: STSv1\nmode: enforce\nmax_age: 1\nmx: *.example.com\nmx: *.example.com\n"
                            .to_string(),
                    ),
                    ..Default::default()
                },
                AuditConfig {
                    mx_match,
                    starttls: false,
                    ..Default::default()
                },
            );
            let report = auditor.audit("example.com").await;
            assert_eq!(report.findings(), expected.as_slice(), "{mx_match:?}");
        }
    }

    #[tokio::test]
    async fn audit_without_starttls() {
        let resolver = resolver();
        resolver.mx_add(
            "example.com",
            vec![MX {
                exchanges: vec!["mx.example.com.".to_string()],
                preference: 0,
            }],
            Instant::now() + Duration::from_secs(60),
        );

        let auditor = Auditor::with_transport(
            resolver,
            MockTransport::default(),
            AuditConfig {
                starttls: false,
                ..Default::default()
            },
        );
        let report = auditor.audit("example.com").await;
        assert!(report.starttls.is_empty());
        assert!(auditor.transport.probed.lock().is_empty());
    }
}

/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{
    borrow::Cow,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::Arc,
    time::Duration,
};

use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    system_conf::read_system_conf,
    AsyncResolver,
};

use crate::{Error, IpLookupStrategy, Resolver, MX};

use super::lru::{DnsCache, LruCache};

/// Upstream used to answer DNS queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverKind {
    #[default]
    System,
    Cloudflare,
    CloudflareTls,
    Google,
    Quad9,
    Quad9Tls,
}

impl Resolver {
    pub fn new(kind: ResolverKind, timeout: Duration) -> Result<Self, ResolveError> {
        let (config, mut options) = match kind {
            ResolverKind::System => read_system_conf()?,
            ResolverKind::Cloudflare => (ResolverConfig::cloudflare(), ResolverOpts::default()),
            ResolverKind::CloudflareTls => {
                (ResolverConfig::cloudflare_tls(), ResolverOpts::default())
            }
            ResolverKind::Google => (ResolverConfig::google(), ResolverOpts::default()),
            ResolverKind::Quad9 => (ResolverConfig::quad9(), ResolverOpts::default()),
            ResolverKind::Quad9Tls => (ResolverConfig::quad9_tls(), ResolverOpts::default()),
        };
        options.timeout = timeout;
        Self::with_capacity(config, options, 128)
    }

    pub fn with_capacity(
        config: ResolverConfig,
        options: ResolverOpts,
        capacity: usize,
    ) -> Result<Self, ResolveError> {
        Ok(Self {
            resolver: AsyncResolver::tokio(config, options)?,
            cache_txt: LruCache::with_capacity(capacity),
            cache_mx: LruCache::with_capacity(capacity),
            cache_ipv4: LruCache::with_capacity(capacity),
            cache_ipv6: LruCache::with_capacity(capacity),
        })
    }

    /// Returns every TXT string published at `key`. Records split in
    /// several character-strings are joined back together.
    pub async fn txt_lookup<'x>(&self, key: impl IntoFqdn<'x>) -> crate::Result<Arc<Vec<String>>> {
        let key = key.into_fqdn();
        if let Some(value) = self.cache_txt.get(key.as_ref()) {
            return Ok(value);
        }

        #[cfg(any(test, feature = "test"))]
        if true {
            return mock_resolve(key.as_ref());
        }

        let txt_lookup = self.resolver.txt_lookup(key.as_ref()).await?;
        let records = txt_lookup
            .as_lookup()
            .record_iter()
            .filter_map(|r| {
                let txt_data = r.data()?.as_txt()?.txt_data();
                let mut entry = Vec::with_capacity(255 * txt_data.len());
                for data in txt_data {
                    entry.extend_from_slice(data);
                }
                String::from_utf8_lossy(&entry).into_owned().into()
            })
            .collect::<Vec<_>>();

        Ok(self.cache_txt.insert(
            key.into_owned(),
            Arc::new(records),
            txt_lookup.valid_until(),
        ))
    }

    /// MX records grouped by preference, most preferred first.
    pub async fn mx_lookup<'x>(&self, key: impl IntoFqdn<'x>) -> crate::Result<Arc<Vec<MX>>> {
        let key = key.into_fqdn();
        if let Some(value) = self.cache_mx.get(key.as_ref()) {
            return Ok(value);
        }

        #[cfg(any(test, feature = "test"))]
        if true {
            return mock_resolve(key.as_ref());
        }

        let mx_lookup = self.resolver.mx_lookup(key.as_ref()).await?;
        let mx_records = mx_lookup.as_lookup().records();
        let mut records: Vec<MX> = Vec::with_capacity(mx_records.len());
        for mx_record in mx_records {
            if let Some(mx) = mx_record.data().and_then(|r| r.as_mx()) {
                let preference = mx.preference();
                let exchange = mx.exchange().to_lowercase().to_string();

                if let Some(record) = records.iter_mut().find(|r| r.preference == preference) {
                    record.exchanges.push(exchange);
                } else {
                    records.push(MX {
                        exchanges: vec![exchange],
                        preference,
                    });
                }
            }
        }

        records.sort_by_key(|r| r.preference);

        Ok(self
            .cache_mx
            .insert(key.into_owned(), Arc::new(records), mx_lookup.valid_until()))
    }

    pub async fn ipv4_lookup<'x>(
        &self,
        key: impl IntoFqdn<'x>,
    ) -> crate::Result<Arc<Vec<Ipv4Addr>>> {
        let key = key.into_fqdn();
        if let Some(value) = self.cache_ipv4.get(key.as_ref()) {
            return Ok(value);
        }

        #[cfg(any(test, feature = "test"))]
        if true {
            return mock_resolve(key.as_ref());
        }

        let ipv4_lookup = self.resolver.ipv4_lookup(key.as_ref()).await?;
        let ips = ipv4_lookup
            .as_lookup()
            .record_iter()
            .filter_map(|r| (*r.data()?.as_a()?).into())
            .collect::<Vec<_>>();

        Ok(self
            .cache_ipv4
            .insert(key.into_owned(), Arc::new(ips), ipv4_lookup.valid_until()))
    }

    pub async fn ipv6_lookup<'x>(
        &self,
        key: impl IntoFqdn<'x>,
    ) -> crate::Result<Arc<Vec<Ipv6Addr>>> {
        let key = key.into_fqdn();
        if let Some(value) = self.cache_ipv6.get(key.as_ref()) {
            return Ok(value);
        }

        #[cfg(any(test, feature = "test"))]
        if true {
            return mock_resolve(key.as_ref());
        }

        let ipv6_lookup = self.resolver.ipv6_lookup(key.as_ref()).await?;
        let ips = ipv6_lookup
            .as_lookup()
            .record_iter()
            .filter_map(|r| (*r.data()?.as_aaaa()?).into())
            .collect::<Vec<_>>();

        Ok(self
            .cache_ipv6
            .insert(key.into_owned(), Arc::new(ips), ipv6_lookup.valid_until()))
    }

    pub async fn ip_lookup(
        &self,
        key: &str,
        mut strategy: IpLookupStrategy,
        max_results: usize,
    ) -> crate::Result<Vec<IpAddr>> {
        loop {
            match strategy {
                IpLookupStrategy::Ipv4Only | IpLookupStrategy::Ipv4thenIpv6 => {
                    match (self.ipv4_lookup(key).await, strategy) {
                        (Ok(result), _) if !result.is_empty() => {
                            return Ok(result
                                .iter()
                                .take(max_results)
                                .copied()
                                .map(IpAddr::from)
                                .collect())
                        }
                        (Ok(_), IpLookupStrategy::Ipv4Only) => return Ok(Vec::new()),
                        (Err(err), IpLookupStrategy::Ipv4Only) => return Err(err),
                        _ => {
                            strategy = IpLookupStrategy::Ipv6Only;
                        }
                    }
                }
                IpLookupStrategy::Ipv6Only | IpLookupStrategy::Ipv6thenIpv4 => {
                    match (self.ipv6_lookup(key).await, strategy) {
                        (Ok(result), _) if !result.is_empty() => {
                            return Ok(result
                                .iter()
                                .take(max_results)
                                .copied()
                                .map(IpAddr::from)
                                .collect())
                        }
                        (Ok(_), IpLookupStrategy::Ipv6Only) => return Ok(Vec::new()),
                        (Err(err), IpLookupStrategy::Ipv6Only) => return Err(err),
                        _ => {
                            strategy = IpLookupStrategy::Ipv4Only;
                        }
                    }
                }
            }
        }
    }

    #[cfg(any(test, feature = "test"))]
    pub fn txt_add<'x>(
        &self,
        name: impl IntoFqdn<'x>,
        value: Vec<String>,
        valid_until: std::time::Instant,
    ) {
        self.cache_txt
            .insert(name.into_fqdn().into_owned(), Arc::new(value), valid_until);
    }

    #[cfg(any(test, feature = "test"))]
    pub fn mx_add<'x>(
        &self,
        name: impl IntoFqdn<'x>,
        value: Vec<MX>,
        valid_until: std::time::Instant,
    ) {
        self.cache_mx
            .insert(name.into_fqdn().into_owned(), Arc::new(value), valid_until);
    }

    #[cfg(any(test, feature = "test"))]
    pub fn ipv4_add<'x>(
        &self,
        name: impl IntoFqdn<'x>,
        value: Vec<Ipv4Addr>,
        valid_until: std::time::Instant,
    ) {
        self.cache_ipv4
            .insert(name.into_fqdn().into_owned(), Arc::new(value), valid_until);
    }

    #[cfg(any(test, feature = "test"))]
    pub fn ipv6_add<'x>(
        &self,
        name: impl IntoFqdn<'x>,
        value: Vec<Ipv6Addr>,
        valid_until: std::time::Instant,
    ) {
        self.cache_ipv6
            .insert(name.into_fqdn().into_owned(), Arc::new(value), valid_until);
    }
}

impl From<ResolveError> for Error {
    fn from(err: ResolveError) -> Self {
        match err.kind() {
            ResolveErrorKind::NoRecordsFound { response_code, .. } => {
                Error::DnsRecordNotFound(*response_code)
            }
            ResolveErrorKind::Timeout => Error::Timeout,
            _ => Error::DnsError(err.to_string()),
        }
    }
}

pub trait IntoFqdn<'x> {
    fn into_fqdn(self) -> Cow<'x, str>;
}

impl<'x> IntoFqdn<'x> for String {
    fn into_fqdn(self) -> Cow<'x, str> {
        fqdn(&self).into()
    }
}

impl<'x> IntoFqdn<'x> for &'x str {
    fn into_fqdn(self) -> Cow<'x, str> {
        fqdn(self).into()
    }
}

impl<'x> IntoFqdn<'x> for &String {
    fn into_fqdn(self) -> Cow<'x, str> {
        fqdn(self).into()
    }
}

fn fqdn(name: &str) -> String {
    let name = name.trim().to_lowercase();
    if name.ends_with('.') {
        name
    } else {
        format!("{name}.")
    }
}

#[cfg(any(test, feature = "test"))]
pub fn mock_resolve<T>(domain: &str) -> crate::Result<T> {
    Err(if domain.contains("_dns_error.") {
        Error::DnsError("".to_string())
    } else if domain.contains("_timeout.") {
        Error::Timeout
    } else {
        Error::DnsRecordNotFound(trust_dns_resolver::proto::op::ResponseCode::NXDomain)
    })
}

/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::time::Duration;

use clap::{CommandFactory, Parser, ValueEnum};
use mta_sts_check::{
    common::resolver::ResolverKind, AuditConfig, Auditor, KeyMatch, MxMatch, Resolver,
};

#[derive(Parser, Debug)]
#[clap(version, about = "Checks the MTA-STS deployment of a mail domain")]
struct Cli {
    /// Domain to audit
    #[clap(short, long, default_value = "gmail.com")]
    domain: String,

    /// SMTP port used for the STARTTLS probes
    #[clap(long, default_value_t = 25)]
    port: u16,

    /// Network timeout in seconds
    #[clap(long, default_value_t = 30)]
    timeout: u64,

    /// Hostname sent in EHLO
    #[clap(long, default_value = "localhost")]
    ehlo: String,

    /// DNS upstream
    #[clap(long, value_enum, default_value_t = ResolverArg::System)]
    resolver: ResolverArg,

    /// Do not probe the MX hosts for STARTTLS
    #[clap(long)]
    skip_starttls: bool,

    /// Match policy keys exactly instead of by line prefix
    #[clap(long)]
    strict_keys: bool,

    /// Compare mx patterns case-insensitively and accept '*.' wildcards
    #[clap(long)]
    lenient_mx: bool,

    /// Print the report as JSON
    #[clap(long)]
    json: bool,

    /// Exit with status 2 when the report contains errors
    #[clap(long)]
    fail_on_error: bool,

    /// Log verbosity (error, warn, info, debug, trace)
    #[clap(long, default_value = "warn")]
    log_level: tracing::Level,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ResolverArg {
    System,
    Cloudflare,
    CloudflareTls,
    Google,
    Quad9,
    Quad9Tls,
}

impl From<ResolverArg> for ResolverKind {
    fn from(value: ResolverArg) -> Self {
        match value {
            ResolverArg::System => ResolverKind::System,
            ResolverArg::Cloudflare => ResolverKind::Cloudflare,
            ResolverArg::CloudflareTls => ResolverKind::CloudflareTls,
            ResolverArg::Google => ResolverKind::Google,
            ResolverArg::Quad9 => ResolverKind::Quad9,
            ResolverArg::Quad9Tls => ResolverKind::Quad9Tls,
        }
    }
}

#[tokio::main]
async fn main() {
    // Accept the single dash long form, e.g. '-domain example.org'
    let args = Cli::parse_from(std::env::args().map(|arg| {
        if arg == "-domain" || arg.starts_with("-domain=") {
            format!("-{arg}")
        } else {
            arg
        }
    }));

    if args.domain.trim().is_empty() {
        println!("Domain is a required field");
        Cli::command()
            .print_help()
            .failed("Failed to print usage");
        std::process::exit(1);
    }

    // Enable logging
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(args.log_level)
            .with_writer(std::io::stderr)
            .finish(),
    )
    .failed("Failed to set logger");

    let timeout = Duration::from_secs(args.timeout);
    let config = AuditConfig {
        port: args.port,
        timeout,
        ehlo_hostname: args.ehlo,
        key_match: if args.strict_keys {
            KeyMatch::Exact
        } else {
            KeyMatch::Prefix
        },
        mx_match: if args.lenient_mx {
            MxMatch::Lenient
        } else {
            MxMatch::Exact
        },
        starttls: !args.skip_starttls,
        ..Default::default()
    };
    let resolver =
        Resolver::new(args.resolver.into(), timeout).failed("Failed to create DNS resolver");
    let auditor = Auditor::new(resolver, config).failed("Failed to create HTTP client");

    let report = auditor.audit(&args.domain).await;
    if args.json {
        println!(
            "{}",
            report.to_json().failed("Failed to serialize report")
        );
    } else {
        print!("{report}");
    }

    if args.fail_on_error && report.has_errors() {
        std::process::exit(2);
    }
}

pub trait UnwrapFailure<T> {
    fn failed(self, action: &str) -> T;
}

impl<T, E: std::fmt::Display> UnwrapFailure<T> for Result<T, E> {
    fn failed(self, message: &str) -> T {
        match self {
            Ok(result) => result,
            Err(err) => {
                eprintln!("{}: {}", message, err);
                std::process::exit(1);
            }
        }
    }
}

use clap::Parser;
use std::process;
use std::time::Duration;

use dns_crawler::cache::SharedZoneCache;
use dns_crawler::client::{Client, ClientConfig};
use dns_crawler::info::Info;
use dns_crawler::ips::Ips;
use dns_crawler::term::{RunReport, Term};
use dns_types::protocol::types::DomainName;

// the doc comments for this struct turn into the CLI help text
#[derive(Parser)]
/// Iterative DNS lookup utility
///
/// Walks the delegation chain itself, from the root servers down,
/// instead of trusting a recursive upstream; prints what it learned
/// about the domain.  Upstream servers are only queried over IPv4.
struct Args {
    /// Domain to resolve
    #[clap(value_parser)]
    domain: DomainName,

    /// Print only the address chase, skipping the zone harvest
    #[clap(long, action(clap::ArgAction::SetTrue))]
    ips_only: bool,

    /// Dump the resolution transcript to stderr
    #[clap(long, action(clap::ArgAction::SetTrue))]
    transcript: bool,

    /// Per-attempt reply timeout in milliseconds
    #[clap(long, default_value_t = 2000, value_parser)]
    timeout_ms: u64,

    /// Attempts per server
    #[clap(long, default_value_t = 3, value_parser)]
    attempts: u32,
}

fn init_logs() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, registry, EnvFilter};

    let _ = registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=warn", env!("CARGO_PKG_NAME")).into()),
        )
        .with(fmt::layer().with_ansi(cfg!(debug_assertions)))
        .try_init();
}

#[tokio::main]
async fn main() {
    init_logs();
    let args = Args::parse();

    let config = ClientConfig {
        timeout: Duration::from_millis(args.timeout_ms),
        attempts: args.attempts.max(1),
    };
    let client = match Client::new(config).await {
        Ok(client) => client,
        Err(error) => {
            eprintln!("dnsinfo: {error}");
            process::exit(1);
        }
    };

    let term = Term::new(&client, SharedZoneCache::new());

    let report: RunReport;
    if args.ips_only {
        let mut ips = Ips::new(args.domain.clone());
        report = term.run(&mut ips).await;
        if report.error.is_none() {
            let (cnames, records) = ips.results();
            for rr in cnames.iter().chain(records.iter()) {
                println!("{}", rr.digest());
            }
        }
    } else {
        let mut info = Info::new(args.domain.clone());
        report = term.run(&mut info).await;
        if report.error.is_none() {
            print!("{}", info.render());
        }
    }

    if args.transcript {
        eprint!("{}", report.transcript);
    }

    if let Some(error) = report.error {
        eprintln!("dnsinfo: {error}");
        process::exit(1);
    }
}

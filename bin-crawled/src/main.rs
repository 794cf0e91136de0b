use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use dns_crawler::cache::SharedZoneCache;
use dns_crawler::client::{Client, ClientConfig};
use dns_crawler::info::Info;
use dns_crawler::term::Term;
use dns_types::protocol::types::DomainName;

// the doc comments for this struct turn into the CLI help text
#[derive(Parser)]
/// Bulk DNS crawler
///
/// Resolves every domain in the input list iteratively from the
/// roots and writes, per domain, the resolution transcript and the
/// harvested report into a ZIP archive.
struct Args {
    /// Input file: one domain per line, '#' starts a comment
    #[clap(value_parser)]
    input: PathBuf,

    /// Output ZIP archive
    #[clap(value_parser)]
    output: PathBuf,

    /// How many resolutions run in parallel
    #[clap(short, long, value_parser)]
    quota: Option<usize>,

    /// Deflate archive entries instead of storing them
    #[clap(long, action(clap::ArgAction::SetTrue))]
    deflate: bool,

    /// Optional TOML settings file (quota, deflate, timeout_ms,
    /// attempts); flags take precedence
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,
}

/// Settings readable from a TOML file and from `CRAWLED_`-prefixed
/// environment variables.
#[derive(Debug, Default, Deserialize)]
struct Settings {
    quota: Option<usize>,
    deflate: Option<bool>,
    timeout_ms: Option<u64>,
    attempts: Option<u32>,
}

impl Settings {
    fn load(path: Option<&Path>) -> Result<Self, CrawlError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(config::Environment::with_prefix("CRAWLED").try_parsing(true));

        builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|error| CrawlError::Settings(error.to_string()))
    }
}

#[derive(Debug)]
enum CrawlError {
    Io(std::io::Error),
    Zip(zip::result::ZipError),
    Settings(String),
    List { line: usize, text: String },
    Join(tokio::task::JoinError),
}

impl fmt::Display for CrawlError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CrawlError::Io(error) => write!(f, "{error}"),
            CrawlError::Zip(error) => write!(f, "archive: {error}"),
            CrawlError::Settings(error) => write!(f, "settings: {error}"),
            CrawlError::List { line, text } => {
                write!(f, "input line {line}: '{text}' is not a domain")
            }
            CrawlError::Join(error) => write!(f, "worker: {error}"),
        }
    }
}

impl std::error::Error for CrawlError {}

impl From<std::io::Error> for CrawlError {
    fn from(error: std::io::Error) -> Self {
        CrawlError::Io(error)
    }
}

impl From<zip::result::ZipError> for CrawlError {
    fn from(error: zip::result::ZipError) -> Self {
        CrawlError::Zip(error)
    }
}

impl From<tokio::task::JoinError> for CrawlError {
    fn from(error: tokio::task::JoinError) -> Self {
        CrawlError::Join(error)
    }
}

/// Parse the input list: one domain per line, `#` comments, blank
/// lines ignored.
fn parse_list(text: &str) -> Result<Vec<DomainName>, CrawlError> {
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        match DomainName::from_dotted_string(line) {
            Some(domain) => out.push(domain),
            None => {
                return Err(CrawlError::List {
                    line: idx + 1,
                    text: line.to_string(),
                })
            }
        }
    }
    Ok(out)
}

/// The decimal width of the largest index, for zero-padding.
fn digits(mut n: usize) -> usize {
    let mut width = 1;
    while n >= 10 {
        n /= 10;
        width += 1;
    }
    width
}

/// `log/0007_example.com.` and friends.  Domain text is capped at
/// 200 bytes; domain names are pure ASCII so the cut is clean.
fn entry_name(dir: &str, index: &str, domain: &DomainName) -> String {
    let mut name = domain.to_dotted_string();
    name.truncate(200);
    format!("{dir}/{index}_{name}")
}

async fn crawl_one(
    index: String,
    domain: DomainName,
    client: Arc<Client>,
    cache: SharedZoneCache,
    archive: Arc<Mutex<ZipWriter<File>>>,
    deflate: bool,
) -> Result<(), CrawlError> {
    let term = Term::new(client.as_ref(), cache);
    let mut info = Info::new(domain.clone());
    let report = term.run(&mut info).await;

    let body = match &report.error {
        None => info.render(),
        Some(error) => {
            tracing::warn!(%domain, %error, "resolution aborted");
            format!("error: {}\n", error.kind())
        }
    };

    let options = FileOptions::default().compression_method(if deflate {
        CompressionMethod::Deflated
    } else {
        CompressionMethod::Stored
    });

    // one critical section for both entries, so a domain's log and
    // report stay adjacent in the archive
    let mut archive = archive.lock().await;
    archive.start_file(entry_name("log", &index, &domain), options)?;
    archive.write_all(report.transcript.as_bytes())?;
    archive.start_file(entry_name("out", &index, &domain), options)?;
    archive.write_all(body.as_bytes())?;

    Ok(())
}

async fn run(args: Args) -> Result<(), CrawlError> {
    let settings = Settings::load(args.config.as_deref())?;
    let quota = args.quota.or(settings.quota).unwrap_or(8).max(1);
    let deflate = args.deflate || settings.deflate.unwrap_or(false);

    let mut client_config = ClientConfig::default();
    if let Some(ms) = settings.timeout_ms {
        client_config.timeout = Duration::from_millis(ms);
    }
    if let Some(attempts) = settings.attempts {
        client_config.attempts = attempts.max(1);
    }

    let list = parse_list(&std::fs::read_to_string(&args.input)?)?;
    let width = digits(list.len());

    let archive = Arc::new(Mutex::new(ZipWriter::new(File::create(&args.output)?)));
    let client = Arc::new(Client::new(client_config).await?);
    let cache = SharedZoneCache::new();
    let semaphore = Arc::new(Semaphore::new(quota));

    tracing::info!(domains = list.len(), quota, deflate, "starting crawl");

    let mut workers = Vec::with_capacity(list.len());
    for (i, domain) in list.into_iter().enumerate() {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .expect("crawl semaphore closed");
        let index = format!("{:0width$}", i + 1);
        let client = Arc::clone(&client);
        let cache = cache.clone();
        let archive = Arc::clone(&archive);

        workers.push(tokio::spawn(async move {
            let result = crawl_one(index, domain, client, cache, archive, deflate).await;
            drop(permit);
            result
        }));
    }

    for worker in workers {
        worker.await??;
    }

    let archive = Arc::try_unwrap(archive)
        .unwrap_or_else(|_| panic!("archive still shared after crawl"));
    archive.into_inner().finish()?;

    Ok(())
}

fn init_logs() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, registry, EnvFilter};

    let _ = registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_PKG_NAME")).into()),
        )
        .with(fmt::layer().with_ansi(cfg!(debug_assertions)))
        .try_init();
}

#[tokio::main]
async fn main() {
    init_logs();
    let args = Args::parse();

    if let Err(error) = run(args).await {
        eprintln!("crawled: {error}");
        process::exit(1);
    }
}

//! Rota Nym - Entry Point
//!
//! Reads a target URL and a request count, then drains the resulting queue
//! through the worker pool.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use rota_nym::config::{Config, LogConfig};
use rota_nym::error::{Result, RotaError};
use rota_nym::proxy::{
    BrowserUserAgents, HttpAddressProbe, HttpSender, IdentityRotator, ProxyTransport,
    RotationPolicy, SocksHttpClient, TorControlConnector,
};
use rota_nym::services::{JsonLinesSink, RequestQueue, WorkerPool};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting Rota Nym");

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let url = prompt(&mut input, "Enter the URL to generate traffic: ").await?;
    let url = parse_target(&url)?;
    let count = prompt(&mut input, "Enter the number of requests to simulate: ").await?;
    let count = parse_count(&count)?;

    let transport = ProxyTransport::new(config.proxy.clone())?;
    let client: Arc<dyn HttpSender> = Arc::new(SocksHttpClient::new(transport));
    info!("Routing traffic through SOCKS proxy at {}", config.socks_addr());

    let rotator = Arc::new(IdentityRotator::new(
        Arc::new(TorControlConnector::from_config(&config.control)),
        Arc::new(HttpAddressProbe::new(client.clone(), &config.probe)),
        config.control.password.clone(),
        RotationPolicy::from(&config.rotation),
    ));
    info!("Using control port at {}", config.control_addr());

    let sink = Arc::new(JsonLinesSink::open(&config.telemetry.path).await?);
    info!("Writing telemetry to {}", sink.path().display());

    let pool = Arc::new(WorkerPool::new(
        config.workers.clone(),
        rotator,
        client,
        Arc::new(BrowserUserAgents::new()),
        sink,
    ));

    let queue = Arc::new(RequestQueue::repeat(&url, count));
    pool.run(queue).await;

    println!("All requests have been processed.");
    Ok(())
}

fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rota_nym={}", config.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn prompt(input: &mut Lines<BufReader<Stdin>>, message: &str) -> Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(message.as_bytes()).await?;
    stdout.flush().await?;

    let line = input.next_line().await?.ok_or_else(|| {
        RotaError::InvalidRequest("input closed before an answer was given".to_string())
    })?;
    Ok(line.trim().to_string())
}

fn parse_target(input: &str) -> Result<Url> {
    let url = Url::parse(input)?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        _ => Err(RotaError::InvalidRequest(format!(
            "{} is not an http or https URL",
            input
        ))),
    }
}

fn parse_count(input: &str) -> Result<usize> {
    input.parse().map_err(|_| {
        RotaError::InvalidRequest(format!("{} is not a valid number of requests", input))
    })
}

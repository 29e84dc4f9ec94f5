// scrape-api: HTTP service and one-shot CLI around the scrape orchestrator.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use scrape_api::{
    ChromeEngine, Config, ScrapeManager, ScrapeRequest, load_yaml_config, new_session_id,
};

#[derive(Debug, Parser)]
#[command(
    name = "scrape-api",
    version,
    about = "Render pages in headless Chrome and return their markup"
)]
struct Cli {
    /// YAML config file (defaults to ./config.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging, including per-run events for CLI scrapes
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Proxy URI for `fetch` and `scrape` runs
    #[arg(long, global = true)]
    proxy: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve {
        #[arg(long)]
        bind: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the full document of a page once it has loaded
    Fetch { url: String },
    /// Print the markup of the elements matching a selector once they appear
    Scrape {
        url: String,

        /// CSS selector to wait for; the full page is returned without one
        #[arg(short, long)]
        selector: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("scrape_api=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = load_yaml_config(cli.config.as_deref())?;

    let mut request = match cli.command {
        Command::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            scrape_api::server::serve(config).await?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Fetch { url } => ScrapeRequest::new(url).with_full_page(true),
        Command::Scrape { url, selector } => match selector {
            Some(selector) => ScrapeRequest::new(url).with_selector(selector),
            None => ScrapeRequest::new(url),
        },
    };

    if let Some(proxy) = cli.proxy {
        request = request.with_proxy(proxy);
    }
    if cli.verbose {
        request = request.with_session_id(new_session_id());
    }

    Ok(scrape_once(&config, &request).await)
}

async fn scrape_once(config: &Config, request: &ScrapeRequest) -> ExitCode {
    let engine = ChromeEngine::new(config.browser.clone());
    let manager = ScrapeManager::from_config(engine, &config.scrape);
    match manager.run(request).await {
        Ok(content) => {
            println!("{content}");
            ExitCode::SUCCESS
        }
        Err(failure) => {
            eprintln!("{failure}");
            ExitCode::FAILURE
        }
    }
}

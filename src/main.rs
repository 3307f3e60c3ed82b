use std::time::Duration;

use clap::Parser;
use page_harvester::{
    HarvestOptions, HarvestPipeline, HttpPageFetcher, RequestTemplate, ResponseShape,
};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Harvest every page of a paginated JSON endpoint and print the result.
#[derive(Debug, Parser)]
#[command(name = "page-harvest", version, about)]
struct Cli {
    /// Endpoint URL, without the paging parameters
    url: String,

    #[arg(long, default_value_t = 1)]
    start_page: u32,

    /// Items per page
    #[arg(long, default_value_t = 500)]
    limit: u32,

    #[arg(long, default_value_t = 10)]
    max_parallel: usize,

    #[arg(long, default_value_t = 2)]
    max_retries: u32,

    /// Pause before each retry round
    #[arg(long, default_value_t = 0)]
    retry_delay_ms: u64,

    /// Per-request timeout; unset means no timeout
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Refuse sources that report more pages than this
    #[arg(long, default_value_t = 100_000)]
    max_pages: u32,

    #[arg(long, default_value = "page")]
    page_param: String,

    #[arg(long, default_value = "limit")]
    limit_param: String,

    /// Key or JSON pointer of the item array
    #[arg(long, default_value = "items")]
    items_key: String,

    /// Key or JSON pointer of the total page count
    #[arg(long, default_value = "totalPages")]
    total_key: String,

    /// Extra header, as `Name: value` (repeatable)
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Extra query pair, as `name=value` (repeatable)
    #[arg(long = "query", value_parser = parse_query)]
    query: Vec<(String, String)>,
}

impl Cli {
    fn options(&self) -> HarvestOptions {
        HarvestOptions {
            start_page: self.start_page,
            limit: self.limit,
            max_parallel: self.max_parallel,
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            fetch_timeout: self.timeout_ms.map(Duration::from_millis),
            max_pages: self.max_pages,
        }
    }

    fn template(&self) -> RequestTemplate {
        let mut template = RequestTemplate::new(&self.url)
            .with_page_param(&self.page_param)
            .with_limit_param(&self.limit_param);
        for (name, value) in &self.headers {
            template = template.with_header(name, value);
        }
        for (name, value) in &self.query {
            template = template.with_query(name, value);
        }
        template
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once(':')
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected `Name: value`, got '{}'", raw))
}

fn parse_query(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected `name=value`, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let fetcher = HttpPageFetcher::new(cli.template())?
        .with_shape(ResponseShape::fields(&cli.items_key, Some(cli.total_key.as_str())));

    let pipeline = HarvestPipeline::<Value>::builder()
        .fetcher(fetcher)
        .with_options(cli.options())
        .on_progress(|fetched, total| info!(fetched, total, "Progress"))
        .build()?;

    let result = pipeline.execute().await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}

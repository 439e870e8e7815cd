use eyre::{Context, bail, eyre};
use longform_catalog::catalog::DEFAULT_REGION;
use longform_catalog::fallback::{category_feed, search_or_fallback};
use longform_catalog::{Catalog, GlobalRequest, Outcome, PageRequest};
use serde::Serialize;
use std::io::IsTerminal;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage: catalog-cli [--page TOKEN] [--target N] [--min SECONDS] <command>

commands:
  search <query> [region]
  popular [region] [category-id]
  global [category-title]
  related <video-id>
  video <video-id>
  curated
  category <region> <title>
  feed <region> <category-title>
  regions";

fn print_json<T: Serialize>(value: &T) -> eyre::Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}

fn print_outcome<T: Serialize>(outcome: &Outcome<T>) -> eyre::Result<()> {
    print_json(&serde_json::json!({
        "fallback": outcome.fallback_reason(),
        "data": outcome.data(),
    }))
}

/// Splits `--page/--target/--min` options from positional arguments.
fn parse_args(mut args: impl Iterator<Item = String>) -> eyre::Result<(PageRequest, Vec<String>)> {
    let mut request = PageRequest::default();
    let mut positional = Vec::new();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--page" => {
                let token = args.next().ok_or_else(|| eyre!("--page needs a token"))?;
                request.page_token = Some(token);
            }
            "--target" => {
                let n = args.next().ok_or_else(|| eyre!("--target needs a number"))?;
                request.target_size =
                    Some(n.parse().with_context(|| format!("parse --target {n}"))?);
            }
            "--min" => {
                let n = args
                    .next()
                    .ok_or_else(|| eyre!("--min needs a number of seconds"))?;
                request.min_duration_secs =
                    Some(n.parse().with_context(|| format!("parse --min {n}"))?);
            }
            _ => positional.push(arg),
        }
    }
    Ok((request, positional))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let default_level = if std::env::var("YM1_DEBUG").is_ok_and(|v| v == "1") {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let (request, positional) = parse_args(std::env::args().skip(1))?;
    let args: Vec<&str> = positional.iter().map(String::as_str).collect();
    let catalog = Catalog::from_env();

    match args.as_slice() {
        ["search", query, rest @ ..] => {
            let outcome = search_or_fallback(&catalog, query, rest.first().copied(), &request)
                .await
                .context("search")?;
            print_outcome(&outcome)?;
        }
        ["popular", rest @ ..] => {
            let region = rest.first().copied().unwrap_or(DEFAULT_REGION);
            let page = catalog
                .most_popular(region, rest.get(1).copied(), &request)
                .await
                .context("fetch most popular")?;
            print_json(&page)?;
        }
        ["global", rest @ ..] => {
            let global = GlobalRequest {
                target_size: request.target_size,
                min_duration_secs: request.min_duration_secs,
                category_title: (!rest.is_empty()).then(|| rest.join(" ")),
                category_id: None,
            };
            let page = catalog
                .global_most_popular(&global)
                .await
                .context("fetch global most popular")?;
            print_json(&page)?;
        }
        ["related", video_id] => {
            let page = catalog
                .related(video_id, &request)
                .await
                .context("fetch related videos")?;
            print_json(&page)?;
        }
        ["video", id] => {
            let video = catalog.get_video(id).await.context("fetch video")?;
            print_json(&video)?;
        }
        ["curated"] => {
            let page = catalog
                .curated_catalog_page(&request)
                .await
                .context("fetch curated catalog")?;
            print_json(&page)?;
        }
        ["category", region, title @ ..] if !title.is_empty() => {
            let id = catalog
                .resolve_category_id(region, &title.join(" "))
                .await
                .context("resolve category")?;
            print_json(&id)?;
        }
        ["feed", region, title @ ..] if !title.is_empty() => {
            let outcome = category_feed(&catalog, region, &title.join(" "), &request)
                .await
                .context("fetch category feed")?;
            print_outcome(&outcome)?;
        }
        ["regions"] => {
            let regions = catalog.regions().await.context("list regions")?;
            print_json(&regions)?;
        }
        _ => {
            eprintln!("{USAGE}");
            bail!("unrecognized command");
        }
    }

    let metrics = catalog.metrics_snapshot();
    tracing::debug!(
        calls = ?metrics.data_api_calls,
        cache = ?metrics.cache,
        "usage"
    );
    Ok(())
}

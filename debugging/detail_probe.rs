//! Run one of the server's aggregations against live TMDB and print the body.
//! Usage:
//!   cargo run --bin detail_probe -- movie <tmdb_id>
//!   cargo run --bin detail_probe -- tv <tmdb_id>
//!   cargo run --bin detail_probe -- list <trending|top-rated|upcoming|popular-tv>
//! Requires TMDB_API_KEY in the environment (.env supported).

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use reelhub::aggregate::{self, MovieLookup};
use reelhub::app::parse_title_id;
use reelhub::config::Config;
use reelhub::tmdb::{ListKind, TmdbClient};
use serde_json::{json, Value};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Probe {
    Movie,
    Tv,
    List,
}

impl FromStr for Probe {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "movie" => Ok(Probe::Movie),
            "tv" => Ok(Probe::Tv),
            "list" => Ok(Probe::List),
            _ => Err(anyhow!("probe must be 'movie', 'tv' or 'list'")),
        }
    }
}

fn list_kind(name: &str) -> Result<ListKind> {
    match name {
        "trending" => Ok(ListKind::Trending),
        "top-rated" => Ok(ListKind::TopRated),
        "upcoming" => Ok(ListKind::Upcoming),
        "popular-tv" => Ok(ListKind::PopularTv),
        other => Err(anyhow!("unknown listing '{}'", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let mut args = env::args().skip(1);
    let probe: Probe = args
        .next()
        .context("missing probe kind (movie|tv|list)")?
        .parse()?;
    let target = args.next().context("missing id or listing name")?;

    let config = Config::from_env()?;
    let tmdb = TmdbClient::from_config(&config)?;

    let (status, body): (u16, Value) = match probe {
        Probe::List => {
            let titles = aggregate::listing(&tmdb, list_kind(&target)?).await?;
            (200, Value::Array(titles))
        }
        Probe::Movie => {
            let id = parse_title_id(&target).context("movie id must be a positive integer")?;
            match aggregate::movie_detail(&tmdb, id).await? {
                MovieLookup::Found(detail) => (200, serde_json::to_value(detail)?),
                MovieLookup::NoTrailer => (404, json!({ "message": "no YouTube trailer" })),
            }
        }
        Probe::Tv => {
            let id = parse_title_id(&target).context("tv id must be a positive integer")?;
            (200, serde_json::to_value(aggregate::tv_detail(&tmdb, id).await?)?)
        }
    };

    println!("status: {status}");
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

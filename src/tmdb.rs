use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;

const APPEND_DETAIL: &str = "credits,recommendations";
pub const NO_CERTIFICATION: &str = "N/A";

/// Non-2xx answer from TMDB. Carried inside `anyhow::Error` so callers can
/// recover the status with `downcast_ref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("TMDB responded with HTTP {status}")]
pub struct UpstreamStatus {
    pub status: u16,
}

/// The four catalog listings the dashboard renders as rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Trending,
    TopRated,
    Upcoming,
    PopularTv,
}

impl ListKind {
    pub fn path(&self) -> &'static str {
        match self {
            ListKind::Trending => "/trending/movie/day",
            ListKind::TopRated => "/movie/top_rated",
            ListKind::Upcoming => "/movie/upcoming",
            ListKind::PopularTv => "/trending/tv/day",
        }
    }
}

/// Raw TMDB access. Every method is a single GET returning the parsed body
/// untouched; reshaping happens in `aggregate`.
#[async_trait]
pub trait TmdbApi: Send + Sync {
    async fn list(&self, kind: ListKind) -> Result<Value>;
    async fn movie_videos(&self, id: u32) -> Result<Value>;
    async fn movie_release_dates(&self, id: u32) -> Result<Value>;
    async fn movie_detail(&self, id: u32) -> Result<Value>;
    async fn tv_videos(&self, id: u32) -> Result<Value>;
    async fn tv_detail(&self, id: u32) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl TmdbClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let user_agent = format!("reelhub/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .user_agent(user_agent)
            .build()
            .context("Failed to build TMDB HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.tmdb_api_key.clone(), config.tmdb_base_url.clone())
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        // `without_url` keeps the api_key query parameter out of error messages and logs.
        let res = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(query)
            .send()
            .await
            .map_err(|e| anyhow::Error::new(e.without_url()))
            .with_context(|| format!("request to TMDB {path} failed"))?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            debug!(path, status = status.as_u16(), body = %body, "TMDB returned non-success");
            return Err(UpstreamStatus {
                status: status.as_u16(),
            }
            .into());
        }
        res.json::<Value>()
            .await
            .map_err(|e| anyhow::Error::new(e.without_url()))
            .with_context(|| format!("TMDB {path} returned invalid JSON"))
    }
}

#[async_trait]
impl TmdbApi for TmdbClient {
    async fn list(&self, kind: ListKind) -> Result<Value> {
        self.get_json(kind.path(), &[]).await
    }

    async fn movie_videos(&self, id: u32) -> Result<Value> {
        self.get_json(&format!("/movie/{id}/videos"), &[]).await
    }

    async fn movie_release_dates(&self, id: u32) -> Result<Value> {
        self.get_json(&format!("/movie/{id}/release_dates"), &[])
            .await
    }

    async fn movie_detail(&self, id: u32) -> Result<Value> {
        self.get_json(
            &format!("/movie/{id}"),
            &[("append_to_response", APPEND_DETAIL)],
        )
        .await
    }

    async fn tv_videos(&self, id: u32) -> Result<Value> {
        self.get_json(&format!("/tv/{id}/videos"), &[]).await
    }

    async fn tv_detail(&self, id: u32) -> Result<Value> {
        self.get_json(&format!("/tv/{id}"), &[("append_to_response", APPEND_DETAIL)])
            .await
    }
}

#[derive(Debug, Deserialize)]
pub struct Videos {
    pub results: Vec<Video>,
}

#[derive(Debug, Deserialize)]
pub struct Video {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub site: String,
    #[serde(rename = "type", default)]
    pub video_type: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseDates {
    #[serde(default)]
    pub results: Vec<ReleaseEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseEntry {
    #[serde(default)]
    pub iso_3166_1: String,
    #[serde(default)]
    pub release_dates: Vec<ReleaseCert>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseCert {
    #[serde(default)]
    pub certification: Option<String>,
}

/// First YouTube trailer in list order.
pub fn select_trailer(videos: &Videos) -> Option<&str> {
    videos
        .results
        .iter()
        .find(|v| v.site == "YouTube" && v.video_type == "Trailer")
        .map(|v| v.key.as_str())
}

/// Certification of the first US release entry, exactly as TMDB orders it
/// (may be an empty string). `N/A` when there is no US entry or its first
/// certification is null.
pub fn us_certification(data: &ReleaseDates) -> String {
    data.results
        .iter()
        .find(|r| r.iso_3166_1 == "US")
        .and_then(|r| r.release_dates.first())
        .and_then(|rd| rd.certification.clone())
        .unwrap_or_else(|| NO_CERTIFICATION.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn videos(value: Value) -> Videos {
        serde_json::from_value(value).expect("videos deserialize")
    }

    fn release_dates(value: Value) -> ReleaseDates {
        serde_json::from_value(value).expect("release dates deserialize")
    }

    #[test]
    fn picks_first_youtube_trailer_in_list_order() {
        let v = videos(json!({
            "results": [
                { "key": "teaser", "site": "YouTube", "type": "Teaser" },
                { "key": "vimeo", "site": "Vimeo", "type": "Trailer" },
                { "key": "K1", "site": "YouTube", "type": "Trailer" },
                { "key": "K2", "site": "YouTube", "type": "Trailer" }
            ]
        }));
        assert_eq!(select_trailer(&v), Some("K1"));
    }

    #[test]
    fn trailer_match_is_exact() {
        let v = videos(json!({
            "results": [
                { "key": "lower", "site": "youtube", "type": "Trailer" },
                { "key": "plural", "site": "YouTube", "type": "Trailers" }
            ]
        }));
        assert_eq!(select_trailer(&v), None);
        assert_eq!(select_trailer(&videos(json!({ "results": [] }))), None);
    }

    #[test]
    fn videos_without_results_do_not_parse() {
        assert!(serde_json::from_value::<Videos>(json!({ "id": 1 })).is_err());
    }

    #[test]
    fn tolerates_null_certification_and_missing_country() {
        let data = release_dates(json!({
            "results": [
                { "release_dates": [{ "certification": "X" }] },
                { "iso_3166_1": "US", "release_dates": [
                    { "certification": null },
                    { "certification": "R" }
                ]}
            ]
        }));
        assert_eq!(us_certification(&data), NO_CERTIFICATION);
    }

    #[test]
    fn uses_first_us_certification_even_if_empty() {
        let data = release_dates(json!({
            "results": [
                { "iso_3166_1": "GB", "release_dates": [{ "certification": "15" }] },
                { "iso_3166_1": "US", "release_dates": [
                    { "certification": "" },
                    { "certification": "R" }
                ]}
            ]
        }));
        assert_eq!(us_certification(&data), "");

        let data = release_dates(json!({
            "results": [
                { "iso_3166_1": "US", "release_dates": [
                    { "certification": "PG-13" },
                    { "certification": "R" }
                ]}
            ]
        }));
        assert_eq!(us_certification(&data), "PG-13");
    }

    #[test]
    fn missing_us_entry_is_not_available() {
        let data = release_dates(json!({
            "results": [{ "iso_3166_1": "ID", "release_dates": [{ "certification": "13+" }] }]
        }));
        assert_eq!(us_certification(&data), NO_CERTIFICATION);

        let empty_us = release_dates(json!({
            "results": [{ "iso_3166_1": "US", "release_dates": [] }]
        }));
        assert_eq!(us_certification(&empty_us), NO_CERTIFICATION);
    }

    #[test]
    fn list_paths_match_tmdb() {
        assert_eq!(ListKind::Trending.path(), "/trending/movie/day");
        assert_eq!(ListKind::TopRated.path(), "/movie/top_rated");
        assert_eq!(ListKind::Upcoming.path(), "/movie/upcoming");
        assert_eq!(ListKind::PopularTv.path(), "/trending/tv/day");
    }
}

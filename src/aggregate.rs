//! Fan-out over `TmdbApi` and the response shapes handed to the client.
//!
//! Multi-call aggregations wait for every call before looking at any result;
//! one failure discards the whole response.

use anyhow::{anyhow, Context};
use serde::Serialize;
use serde_json::Value;

use crate::tmdb::{self, ListKind, ReleaseDates, TmdbApi, UpstreamStatus, Videos};

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    /// TMDB answered with a non-success status.
    #[error("TMDB responded with HTTP {0}")]
    Upstream(u16),
    /// Transport failure or a payload that does not have the expected shape.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl AggregateError {
    fn classify(err: anyhow::Error) -> Self {
        match err.downcast_ref::<UpstreamStatus>() {
            Some(s) => AggregateError::Upstream(s.status),
            None => AggregateError::Failed(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieDetail {
    pub trailer_key: String,
    pub age_rating: String,
    pub movie_details: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MovieLookup {
    Found(MovieDetail),
    /// Everything loaded but TMDB lists no YouTube trailer for the movie.
    NoTrailer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TvDetail {
    pub trailer_key: Option<String>,
    pub tv_details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub trending: Vec<Value>,
    pub top_rated: Vec<Value>,
    pub upcoming: Vec<Value>,
    #[serde(rename = "popularTV")]
    pub popular_tv: Vec<Value>,
    pub hero: Option<Value>,
}

fn results(payload: Value) -> anyhow::Result<Vec<Value>> {
    match payload {
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(anyhow!("TMDB listing has no results array")),
        },
        _ => Err(anyhow!("TMDB listing is not a JSON object")),
    }
}

pub async fn listing(tmdb: &dyn TmdbApi, kind: ListKind) -> Result<Vec<Value>, AggregateError> {
    let payload = tmdb.list(kind).await.map_err(AggregateError::classify)?;
    Ok(results(payload)?)
}

/// The dashboard's four rows in one response, plus the hero banner pick.
pub async fn catalog(tmdb: &dyn TmdbApi) -> Result<Catalog, AggregateError> {
    let (trending, top_rated, upcoming, popular_tv) = tokio::try_join!(
        listing(tmdb, ListKind::Trending),
        listing(tmdb, ListKind::TopRated),
        listing(tmdb, ListKind::Upcoming),
        listing(tmdb, ListKind::PopularTv),
    )?;
    let hero = pick_hero(&trending);
    Ok(Catalog {
        trending,
        top_rated,
        upcoming,
        popular_tv,
        hero,
    })
}

/// Third trending title when there are enough, otherwise the first.
pub fn pick_hero(trending: &[Value]) -> Option<Value> {
    trending.get(2).or_else(|| trending.first()).cloned()
}

pub async fn movie_detail(tmdb: &dyn TmdbApi, id: u32) -> Result<MovieLookup, AggregateError> {
    let (videos, release, detail) = tokio::join!(
        tmdb.movie_videos(id),
        tmdb.movie_release_dates(id),
        tmdb.movie_detail(id),
    );
    // Checked in call order so the earliest failing call decides the status.
    let videos = videos.map_err(AggregateError::classify)?;
    let release = release.map_err(AggregateError::classify)?;
    let detail = detail.map_err(AggregateError::classify)?;

    let videos: Videos =
        serde_json::from_value(videos).context("TMDB movie videos have an unexpected shape")?;
    let Some(trailer_key) = tmdb::select_trailer(&videos) else {
        return Ok(MovieLookup::NoTrailer);
    };
    let release: ReleaseDates = serde_json::from_value(release)
        .context("TMDB release dates have an unexpected shape")?;
    Ok(MovieLookup::Found(MovieDetail {
        trailer_key: trailer_key.to_string(),
        age_rating: tmdb::us_certification(&release),
        movie_details: detail,
    }))
}

pub async fn tv_detail(tmdb: &dyn TmdbApi, id: u32) -> Result<TvDetail, AggregateError> {
    let (videos, detail) = tokio::join!(tmdb.tv_videos(id), tmdb.tv_detail(id));
    let videos = videos.map_err(AggregateError::classify)?;
    let detail = detail.map_err(AggregateError::classify)?;

    let videos: Videos =
        serde_json::from_value(videos).context("TMDB TV videos have an unexpected shape")?;
    Ok(TvDetail {
        trailer_key: tmdb::select_trailer(&videos).map(str::to_string),
        tv_details: detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hero_prefers_third_trending_title() {
        let rows = vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})];
        assert_eq!(pick_hero(&rows), Some(json!({"id": 3})));
        assert_eq!(pick_hero(&rows[..2]), Some(json!({"id": 1})));
        assert_eq!(pick_hero(&[]), None);
    }

    #[test]
    fn results_are_passed_through_verbatim() {
        let items = results(json!({
            "page": 1,
            "results": [{"id": 1, "x": [1, 2]}, {"id": 2}],
            "total_pages": 9
        }))
        .unwrap();
        assert_eq!(items, vec![json!({"id": 1, "x": [1, 2]}), json!({"id": 2})]);
        assert!(results(json!({"page": 1})).is_err());
        assert!(results(json!([1, 2])).is_err());
    }

    #[test]
    fn classify_separates_upstream_status_from_other_failures() {
        let err = AggregateError::classify(UpstreamStatus { status: 401 }.into());
        assert!(matches!(err, AggregateError::Upstream(401)));

        let err = AggregateError::classify(
            anyhow!(UpstreamStatus { status: 503 }).context("while loading videos"),
        );
        assert!(matches!(err, AggregateError::Upstream(503)));

        let err = AggregateError::classify(anyhow!("connection reset"));
        assert!(matches!(err, AggregateError::Failed(_)));
    }

    #[test]
    fn movie_detail_serializes_with_client_field_names() {
        let body = serde_json::to_value(MovieDetail {
            trailer_key: "K1".into(),
            age_rating: "PG-13".into(),
            movie_details: json!({"id": 7}),
        })
        .unwrap();
        assert_eq!(
            body,
            json!({"trailerKey": "K1", "ageRating": "PG-13", "movieDetails": {"id": 7}})
        );

        let body = serde_json::to_value(TvDetail {
            trailer_key: None,
            tv_details: json!({"id": 8}),
        })
        .unwrap();
        assert_eq!(body, json!({"trailerKey": null, "tvDetails": {"id": 8}}));
    }
}

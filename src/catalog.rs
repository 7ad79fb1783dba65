//! Filter dispatch and list reconciliation flows shared by the dashboard
//! surfaces.

use std::cmp::{Ordering, Reverse};
use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveTime};

use crate::mirror::Mirror;
use crate::model::{split_tags, Movie};
use crate::remote::{Remote, RemoteError};

/// The sort/category selection, orthogonal to the genre filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    TopRated,
    Latest,
}

impl Category {
    pub fn parse(raw: &str) -> Option<Category> {
        match raw {
            "top-rated" => Some(Category::TopRated),
            "latest" => Some(Category::Latest),
            _ => None,
        }
    }
}

/// Translate the two orthogonal selections into one remote query. A selected
/// genre always wins the endpoint choice; the category is then applied as a
/// client-side sort over the genre results.
pub async fn fetch_filtered(
    remote: &Remote,
    category: Option<Category>,
    genre: Option<&str>,
    limit: u32,
) -> Result<Vec<Movie>, RemoteError> {
    if let Some(genre) = genre.map(str::trim).filter(|g| !g.is_empty()) {
        let mut list = remote.by_genre(genre, 1, limit).await?;
        match category {
            Some(Category::TopRated) => sort_top_rated(&mut list),
            Some(Category::Latest) => sort_latest(&mut list),
            None => {}
        }
        return Ok(list);
    }
    match category {
        Some(Category::TopRated) => remote.top_rated(limit).await,
        Some(Category::Latest) => remote.latest(limit).await,
        None => remote.list_movies(None).await,
    }
}

pub fn sort_top_rated(list: &mut [Movie]) {
    list.sort_by(|a, b| {
        b.rating
            .unwrap_or(0.0)
            .partial_cmp(&a.rating.unwrap_or(0.0))
            .unwrap_or(Ordering::Equal)
    });
}

/// Release date descending; a missing or unparseable date counts as the
/// epoch and sorts last.
pub fn sort_latest(list: &mut [Movie]) {
    list.sort_by_key(|movie| Reverse(release_timestamp(movie)));
}

fn release_timestamp(movie: &Movie) -> i64 {
    let raw = match movie.release_date.as_deref() {
        Some(raw) => raw,
        None => return 0,
    };
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return timestamp.timestamp_millis();
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|date| date.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
        .unwrap_or(0)
}

/// Derived locally from the loaded list, never a server call: split on
/// commas, trim, drop empties, deduplicate, sort lexicographically.
pub fn available_genres(movies: &[Movie]) -> Vec<String> {
    let mut tags = BTreeSet::new();
    for movie in movies {
        for entry in &movie.genre {
            tags.extend(split_tags(entry));
        }
    }
    tags.into_iter().collect()
}

/// Client-side title search over the displayed list.
pub fn search(movies: Vec<Movie>, query: &str) -> Vec<Movie> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return movies;
    }
    movies
        .into_iter()
        .filter(|movie| movie.title.to_lowercase().contains(&needle))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Server confirmed; removed from the mirror.
    Deleted,
    /// 401: the operation was not applied and the entry stays put.
    Blocked,
    /// Non-401 failure: the record may genuinely be gone or the backend
    /// unreachable, so the entry is removed optimistically.
    RemovedLocally,
}

pub async fn delete_flow(remote: &Remote, mirror: &Mirror, id: &str) -> DeleteOutcome {
    match remote.delete_movie(id).await {
        Ok(()) => {
            mirror.remove(id);
            DeleteOutcome::Deleted
        }
        Err(err) if err.is_unauthorized() => DeleteOutcome::Blocked,
        Err(err) => {
            log::warn!("delete failed, removing local entry: {}", err);
            mirror.remove(id);
            DeleteOutcome::RemovedLocally
        }
    }
}

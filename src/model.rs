use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    #[serde(
        rename = "_id",
        alias = "id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "genre_tags")]
    pub genre: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    #[serde(default)]
    pub cast: Vec<CastMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(alias = "image", alias = "poster")]
    pub poster_url: String,
    #[serde(default, alias = "trailer", skip_serializing_if = "Option::is_none")]
    pub trailer_url: Option<String>,
}

impl Movie {
    pub fn matches_id(&self, id: &str) -> bool {
        self.id.as_deref() == Some(id)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CastMember {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
}

impl CastMember {
    pub fn is_blank(&self) -> bool {
        self.name.trim().is_empty() && self.role.trim().is_empty()
    }
}

/// Accepts a comma-joined string, a sequence of tags, or comma-joined entries
/// inside a sequence, and normalizes all of them to a flat tag list.
fn genre_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Raw::One(joined)) => split_tags(&joined),
        Some(Raw::Many(items)) => items.iter().flat_map(|item| split_tags(item)).collect(),
    })
}

pub fn split_tags(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Canonical user record; the aliases enumerate every historical field
/// spelling the backend and older persisted blobs have used.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserRecord {
    #[serde(rename = "_id", alias = "id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        alias = "fname",
        alias = "first_name",
        skip_serializing_if = "Option::is_none"
    )]
    pub first_name: Option<String>,
    #[serde(
        alias = "lname",
        alias = "last_name",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(alias = "dob", skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(alias = "phoneNumber", skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(
        alias = "profileImage",
        alias = "avatarUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub avatar: Option<String>,
}

impl UserRecord {
    /// Prefer an explicit full name; otherwise assemble first/last, joining
    /// with a single space only when both parts are present.
    pub fn display_name(&self) -> String {
        if let Some(name) = non_blank(&self.name) {
            return name.to_owned();
        }
        let first = non_blank(&self.first_name).unwrap_or("");
        let last = non_blank(&self.last_name).unwrap_or("");
        let combined = if !first.is_empty() && !last.is_empty() {
            format!("{} {}", first, last)
        } else {
            format!("{}{}", first, last)
        };
        if combined.is_empty() {
            "User".to_owned()
        } else {
            combined
        }
    }

    pub fn initials(&self) -> String {
        if let Some(name) = non_blank(&self.name) {
            let mut words = name.split_whitespace();
            let first = words.next().and_then(|w| w.chars().next());
            let second = words.next().and_then(|w| w.chars().next());
            return first
                .into_iter()
                .chain(second)
                .collect::<String>()
                .to_uppercase();
        }
        let first = non_blank(&self.first_name).and_then(|w| w.chars().next());
        let last = non_blank(&self.last_name).and_then(|w| w.chars().next());
        let combined = first.into_iter().chain(last).collect::<String>();
        if combined.is_empty() {
            "U".to_owned()
        } else {
            combined.to_uppercase()
        }
    }

    pub fn phone_display(&self) -> String {
        let phone = non_blank(&self.phone).unwrap_or("-");
        match non_blank(&self.country_code) {
            Some(code) => format!("{} {}", code, phone),
            None => phone.to_owned(),
        }
    }
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Truncate an ISO-8601 timestamp to its date part for display.
pub fn date_only(value: &str) -> &str {
    value.split('T').next().unwrap_or(value)
}

static YOUTUBE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:youtube\.com/(?:watch\?v=|embed/|shorts/)|youtu\.be/)([A-Za-z0-9_-]{11})")
        .unwrap()
});

/// Extract a watchable autoplay embed URL from a YouTube watch/shorts/embed
/// link, or `None` when the URL is not one we understand.
pub fn youtube_embed(url: &str) -> Option<String> {
    let id = YOUTUBE_ID.captures(url.trim())?.get(1)?.as_str();
    Some(format!("https://www.youtube.com/embed/{}?autoplay=1", id))
}

//! Remote accessor: every network call to the backend REST API goes through
//! here. The bearer token is read from the mirror before each request and the
//! heterogeneous response envelopes are normalized in one place so callers
//! only ever see the inner payload.

use std::time::Duration;

use reqwest::{Client, Method, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;

use crate::mirror::Mirror;
use crate::model::Movie;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("not authorized")]
    Unauthorized,
    #[error("{0}")]
    Api(String),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl RemoteError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RemoteError::Unauthorized)
    }
}

/// What an auth endpoint handed back: the token and the user object, either
/// of which a lenient backend may omit.
#[derive(Debug)]
pub struct AuthSession {
    pub token: Option<String>,
    pub user: Option<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

#[derive(Clone)]
pub struct Remote {
    http: Client,
    base: Url,
    mirror: Mirror,
}

impl Remote {
    pub fn new(base: &str, mirror: Mirror) -> Result<Self, RemoteError> {
        let base = base
            .trim_end_matches('/')
            .parse::<Url>()
            .map_err(|err| RemoteError::Api(format!("invalid backend URL: {}", err)))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { http, base, mirror })
    }

    fn endpoint(&self, segments: &[&str], query: Option<&str>) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Api("backend URL cannot hold paths".to_owned()))?
            .extend(segments);
        url.set_query(query);
        Ok(url)
    }

    /// Attaches `Authorization: Bearer <token>` when the mirror holds one;
    /// otherwise the header is omitted entirely.
    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match self.mirror.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value, RemoteError> {
        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await.unwrap_or_default();
        if status.is_success() {
            Ok(serde_json::from_slice(&bytes).unwrap_or(Value::Null))
        } else if status == StatusCode::UNAUTHORIZED {
            Err(RemoteError::Unauthorized)
        } else {
            Err(RemoteError::Api(extract_message(&bytes, status)))
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, RemoteError> {
        let url = self.endpoint(&["auth", "login"], None)?;
        let body = self
            .send(
                self.request(Method::POST, url)
                    .json(&serde_json::json!({ "email": email, "password": password })),
            )
            .await?;
        let token = string_at(&body, &["token"]).or_else(|| string_at(&body, &["data", "token"]));
        let user = if let Some(data) = body.get("data").filter(|d| d.is_object()) {
            Some(data.clone())
        } else if body.is_object() {
            Some(body)
        } else {
            None
        };
        Ok(AuthSession { token, user })
    }

    pub async fn register(&self, payload: &RegisterPayload) -> Result<AuthSession, RemoteError> {
        let url = self.endpoint(&["auth", "register"], None)?;
        let body = self.send(self.request(Method::POST, url).json(payload)).await?;
        let token = string_at(&body, &["token"])
            .or_else(|| string_at(&body, &["accessToken"]))
            .or_else(|| string_at(&body, &["data", "token"]));
        let user = object_at(&body, &["user"])
            .or_else(|| object_at(&body, &["data", "user"]))
            .or_else(|| if body.is_object() { Some(body.clone()) } else { None });
        Ok(AuthSession { token, user })
    }

    /// Ask the backend for a fresh token; `None` when the response carries no
    /// recognizable token field.
    pub async fn refresh(&self) -> Result<Option<String>, RemoteError> {
        let url = self.endpoint(&["auth", "refresh"], None)?;
        let body = self.send(self.request(Method::POST, url)).await?;
        Ok(string_at(&body, &["token"]).or_else(|| string_at(&body, &["data", "token"])))
    }

    pub async fn get_profile(&self) -> Result<Value, RemoteError> {
        let url = self.endpoint(&["auth", "profile"], None)?;
        let body = self.send(self.request(Method::GET, url)).await?;
        Ok(unwrap_envelope(body))
    }

    pub async fn update_profile(&self, payload: &Value) -> Result<Value, RemoteError> {
        let url = self.endpoint(&["auth", "profile"], None)?;
        let body = self.send(self.request(Method::PUT, url).json(payload)).await?;
        Ok(unwrap_envelope(body))
    }

    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), RemoteError> {
        let url = self.endpoint(&["auth", "changePassword"], None)?;
        self.send(self.request(Method::PUT, url).json(&serde_json::json!({
            "currentPassword": current_password,
            "newPassword": new_password,
        })))
        .await?;
        Ok(())
    }

    pub async fn list_movies(&self, query: Option<&str>) -> Result<Vec<Movie>, RemoteError> {
        let url = self.endpoint(&["movies"], query)?;
        let body = self.send(self.request(Method::GET, url)).await?;
        Ok(movie_list(body))
    }

    pub async fn get_movie(&self, id: &str) -> Result<Movie, RemoteError> {
        let url = self.endpoint(&["movies", id], None)?;
        let body = self.send(self.request(Method::GET, url)).await?;
        movie_object(body)
    }

    pub async fn create_movie(&self, payload: &Movie) -> Result<Movie, RemoteError> {
        let url = self.endpoint(&["movies"], None)?;
        let body = self.send(self.request(Method::POST, url).json(payload)).await?;
        movie_object(body)
    }

    pub async fn update_movie(&self, id: &str, payload: &Movie) -> Result<Movie, RemoteError> {
        let url = self.endpoint(&["movies", id], None)?;
        let body = self.send(self.request(Method::PUT, url).json(payload)).await?;
        movie_object(body)
    }

    pub async fn delete_movie(&self, id: &str) -> Result<(), RemoteError> {
        let url = self.endpoint(&["movies", id], None)?;
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    pub async fn top_rated(&self, limit: u32) -> Result<Vec<Movie>, RemoteError> {
        let url = self.endpoint(&["movies", "top-rated"], Some(&format!("limit={}", limit)))?;
        let body = self.send(self.request(Method::GET, url)).await?;
        Ok(movie_list(body))
    }

    pub async fn latest(&self, limit: u32) -> Result<Vec<Movie>, RemoteError> {
        let url = self.endpoint(&["movies", "latest"], Some(&format!("limit={}", limit)))?;
        let body = self.send(self.request(Method::GET, url)).await?;
        Ok(movie_list(body))
    }

    pub async fn by_genre(
        &self,
        genre: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Movie>, RemoteError> {
        let url = self.endpoint(
            &["movies", "genre", genre],
            Some(&format!("page={}&limit={}", page, limit)),
        )?;
        let body = self.send(self.request(Method::GET, url)).await?;
        Ok(movie_list(body))
    }
}

/// Collapse the three envelope shapes the backend uses: a bare payload,
/// `{data: ...}`, and `{data: {data: ...}}`.
pub fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            match map.remove("data").unwrap_or(Value::Null) {
                Value::Object(mut inner) if inner.contains_key("data") => {
                    inner.remove("data").unwrap_or(Value::Null)
                }
                inner => inner,
            }
        }
        other => other,
    }
}

pub fn movie_list(body: Value) -> Vec<Movie> {
    match unwrap_envelope(body) {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(movie) => Some(movie),
                Err(err) => {
                    log::debug!("skipping malformed movie entry: {}", err);
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn movie_object(body: Value) -> Result<Movie, RemoteError> {
    serde_json::from_value(unwrap_envelope(body))
        .map_err(|err| RemoteError::Api(format!("malformed movie payload: {}", err)))
}

/// Priority order for surfaced errors: a server-provided message field, the
/// raw payload, then the bare status.
fn extract_message(bytes: &[u8], status: StatusCode) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return message.to_owned();
        }
    }
    let raw = String::from_utf8_lossy(bytes);
    let raw = raw.trim();
    if raw.is_empty() {
        format!("request failed with status {}", status)
    } else {
        raw.to_owned()
    }
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for segment in path {
        current = current.get(segment)?;
    }
    current.as_str().map(str::to_owned)
}

fn object_at(value: &Value, path: &[&str]) -> Option<Value> {
    let mut current = value;
    for segment in path {
        current = current.get(segment)?;
    }
    current.is_object().then(|| current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use httpmock::prelude::*;
    use serde_json::json;

    fn remote_for(server: &MockServer) -> Remote {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let mirror = Mirror::new(db, Bus::new());
        Remote::new(&server.base_url(), mirror).unwrap()
    }

    #[test]
    fn envelope_shapes_collapse_to_payload() {
        let list = json!([{ "_id": "a", "title": "A", "posterUrl": "p" }]);
        for body in [
            list.clone(),
            json!({ "data": list.clone() }),
            json!({ "data": { "data": list.clone() } }),
        ] {
            let movies = movie_list(body);
            assert_eq!(movies.len(), 1);
            assert_eq!(movies[0].title, "A");
        }
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let movies = movie_list(json!([
            { "_id": "a", "title": "A", "posterUrl": "p" },
            { "noTitle": true },
        ]));
        assert_eq!(movies.len(), 1);
    }

    #[test]
    fn error_message_priority_order() {
        assert_eq!(
            extract_message(br#"{"message":"boom"}"#, StatusCode::INTERNAL_SERVER_ERROR),
            "boom"
        );
        assert_eq!(
            extract_message(b"kaput", StatusCode::INTERNAL_SERVER_ERROR),
            "kaput"
        );
        assert_eq!(
            extract_message(b"", StatusCode::INTERNAL_SERVER_ERROR),
            "request failed with status 500 Internal Server Error"
        );
    }

    #[actix_rt::test]
    async fn bearer_token_is_attached_from_mirror() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/movies")
                .header("authorization", "Bearer t1");
            then.status(200).json_body(json!([]));
        });

        let remote = remote_for(&server);
        remote.mirror.set_token("t1");
        remote.list_movies(None).await.unwrap();
        mock.assert();
    }

    #[actix_rt::test]
    async fn login_finds_token_at_both_nestings() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/auth/login");
            then.status(200)
                .json_body(json!({ "token": "t1", "data": { "_id": "u1", "name": "Jane" } }));
        });
        let remote = remote_for(&server);
        let session = remote.login("jane@example.com", "pw").await.unwrap();
        assert_eq!(session.token.as_deref(), Some("t1"));
        assert_eq!(
            session.user.unwrap().get("name").and_then(Value::as_str),
            Some("Jane")
        );

        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/auth/login");
            then.status(200)
                .json_body(json!({ "data": { "token": "t2", "name": "Jane" } }));
        });
        let remote = remote_for(&server);
        let session = remote.login("jane@example.com", "pw").await.unwrap();
        assert_eq!(session.token.as_deref(), Some("t2"));
    }

    #[actix_rt::test]
    async fn unauthorized_is_distinguished_from_other_failures() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(DELETE).path("/movies/a");
            then.status(401).json_body(json!({ "message": "nope" }));
        });
        let remote = remote_for(&server);
        let err = remote.delete_movie("a").await.unwrap_err();
        assert!(err.is_unauthorized());

        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(DELETE).path("/movies/a");
            then.status(500).json_body(json!({ "message": "boom" }));
        });
        let remote = remote_for(&server);
        let err = remote.delete_movie("a").await.unwrap_err();
        assert!(!err.is_unauthorized());
        assert_eq!(err.to_string(), "boom");
    }

    #[actix_rt::test]
    async fn refresh_extracts_token_from_either_nesting() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/auth/refresh");
            then.status(200).json_body(json!({ "data": { "token": "t9" } }));
        });
        let remote = remote_for(&server);
        assert_eq!(remote.refresh().await.unwrap().as_deref(), Some("t9"));

        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/auth/refresh");
            then.status(200).json_body(json!({ "ok": true }));
        });
        let remote = remote_for(&server);
        assert_eq!(remote.refresh().await.unwrap(), None);
    }

    #[actix_rt::test]
    async fn profile_fetch_unwraps_envelope() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/auth/profile");
            then.status(200)
                .json_body(json!({ "data": { "name": "Jane" } }));
        });
        let remote = remote_for(&server);
        let user = remote.get_profile().await.unwrap();
        assert_eq!(user.get("name").and_then(Value::as_str), Some("Jane"));
    }

    #[actix_rt::test]
    async fn change_password_accepts_empty_success_body() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(PUT).path("/auth/changePassword");
            then.status(200);
        });
        let remote = remote_for(&server);
        remote.change_password("old", "new").await.unwrap();
        mock.assert();
    }

    #[actix_rt::test]
    async fn genre_path_segment_is_percent_encoded() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/movies/genre/Science%20Fiction")
                .query_param("page", "1")
                .query_param("limit", "50");
            then.status(200).json_body(json!({ "data": [] }));
        });
        let remote = remote_for(&server);
        remote.by_genre("Science Fiction", 1, 50).await.unwrap();
        mock.assert();
    }

    #[actix_rt::test]
    async fn register_unwraps_user_from_known_shapes() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/auth/register");
            then.status(201).json_body(
                json!({ "accessToken": "t3", "data": { "user": { "name": "New" } } }),
            );
        });
        let remote = remote_for(&server);
        let payload = RegisterPayload {
            name: "New".into(),
            email: "n@example.com".into(),
            password: "Secret1!".into(),
            role: "user".into(),
            phone: None,
            date_of_birth: None,
            bio: None,
        };
        let session = remote.register(&payload).await.unwrap();
        assert_eq!(session.token.as_deref(), Some("t3"));
        assert_eq!(
            session.user.unwrap().get("name").and_then(Value::as_str),
            Some("New")
        );
    }
}

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use super::types::{
    ApiError, LoginResponse, LoginResult, MessageResponse, StoriesResponse, StoryResponse,
    StoryUpload,
};
use crate::storage::StoryRecord;

/// Public story API used when nothing is configured.
pub const DEFAULT_BASE_URL: &str = "https://story-api.dicoding.dev/v1";

const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MIN_PASSWORD_LEN: usize = 8;

/// Client for the remote story REST API.
///
/// Stateless apart from the connection pool: every call carries its own
/// bearer token, so queued submissions can replay the token captured when
/// they were enqueued.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    max_response_size: usize,
}

impl ApiClient {
    /// Build a client for `base_url`.
    ///
    /// HTTPS is required so bearer tokens are never sent in clear text;
    /// plain HTTP is allowed only for localhost (tests, local servers).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("storysync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::with_client(client, base_url, timeout)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ApiError::InvalidBaseUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(base_url.to_string()));
        }

        match base_url.scheme() {
            "https" => {}
            "http" => {
                let is_localhost = matches!(
                    base_url.host_str(),
                    Some("localhost") | Some("127.0.0.1") | Some("[::1]")
                );
                if !is_localhost {
                    tracing::error!(base_url = %base_url, "Rejecting non-HTTPS API base URL");
                    return Err(ApiError::InsecureBaseUrl);
                }
                tracing::warn!(base_url = %base_url, "Using non-HTTPS API base URL (localhost only)");
            }
            other => {
                return Err(ApiError::InvalidBaseUrl(format!(
                    "unsupported scheme '{other}'"
                )))
            }
        }

        Ok(Self {
            client,
            base_url,
            timeout,
            max_response_size: MAX_RESPONSE_SIZE,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_max_response_size(mut self, limit: usize) -> Self {
        self.max_response_size = limit;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base() was rejected in the constructor
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    /// `POST /login`
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResult, ApiError> {
        let request = self
            .client
            .post(self.endpoint(&["login"]))
            .json(&serde_json::json!({ "email": email, "password": password }));

        let response: LoginResponse = self.send_json(request).await?;
        tracing::info!(user_id = %response.login_result.user_id, "Logged in");
        Ok(response.login_result)
    }

    /// `POST /register`, returning the server's message.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<String, ApiError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let request = self.client.post(self.endpoint(&["register"])).json(
            &serde_json::json!({ "name": name, "email": email, "password": password }),
        );

        let response: MessageResponse = self.send_json(request).await?;
        Ok(response.message)
    }

    // ========================================================================
    // Stories
    // ========================================================================

    /// `GET /stories`
    pub async fn fetch_all_stories(
        &self,
        token: Option<&SecretString>,
    ) -> Result<Vec<StoryRecord>, ApiError> {
        let request = authorize(self.client.get(self.endpoint(&["stories"])), token);
        let response: StoriesResponse = self.send_json(request).await?;
        tracing::debug!(count = response.list_story.len(), "Fetched story list");
        Ok(response.list_story)
    }

    /// `GET /stories/{id}`
    pub async fn get_story(
        &self,
        id: &str,
        token: Option<&SecretString>,
    ) -> Result<StoryRecord, ApiError> {
        let request = authorize(self.client.get(self.endpoint(&["stories", id])), token);
        let response: StoryResponse = self.send_json(request).await?;
        Ok(response.story)
    }

    /// `POST /stories` as multipart form data.
    ///
    /// Fields: `description`, `photo` (file `photo.jpg`) and, when the story
    /// has a location, `lat` and `lon`. Returns the server's message.
    pub async fn submit_story(
        &self,
        upload: StoryUpload<'_>,
        token: Option<&SecretString>,
    ) -> Result<String, ApiError> {
        let photo = Part::bytes(upload.photo.to_vec())
            .file_name("photo.jpg")
            .mime_str("image/jpeg")?;

        let mut form = Form::new()
            .text("description", upload.description.to_string())
            .part("photo", photo);
        if let Some(point) = upload.location {
            form = form
                .text("lat", point.lat.to_string())
                .text("lon", point.lon.to_string());
        }

        let request = authorize(self.client.post(self.endpoint(&["stories"])), token).multipart(form);
        // A 2xx means the story is stored, whatever happens to the body.
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            return Err(rejection(status, body.ok().as_deref()));
        }
        let message = match body {
            Ok(body) => match serde_json::from_slice::<MessageResponse>(&body) {
                Ok(response) => response.message,
                Err(e) => {
                    tracing::debug!(error = %e, "Story accepted with unreadable response body");
                    String::new()
                }
            },
            Err(e) => {
                tracing::debug!(error = %e, "Story accepted, response body lost");
                String::new()
            }
        };
        tracing::debug!(message = %message, "Story accepted by server");
        Ok(message)
    }

    // ========================================================================
    // Connectivity
    // ========================================================================

    /// Whether the API host answers at all.
    ///
    /// Any HTTP response counts, including errors: only a failed or timed out
    /// request means offline.
    pub async fn is_reachable(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.client.head(self.base_url.clone()).send()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::trace!(error = %e, "Connectivity probe failed");
                false
            }
            Err(_) => {
                tracing::trace!("Connectivity probe timed out");
                false
            }
        }
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    /// Send `request` and read the body, both within the request timeout.
    ///
    /// The outer error means no status was received. A body that could not
    /// be read is returned next to the status so callers can still act on it.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(StatusCode, Result<Vec<u8>, ApiError>), ApiError> {
        let deadline = tokio::time::Instant::now() + self.timeout;

        let response = tokio::time::timeout_at(deadline, request.send())
            .await
            .map_err(|_| ApiError::Timeout)??;
        let status = response.status();

        let body = tokio::time::timeout_at(
            deadline,
            read_limited_bytes(response, self.max_response_size),
        )
        .await
        .unwrap_or(Err(ApiError::Timeout));

        Ok((status, body))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            return Err(rejection(status, body.ok().as_deref()));
        }
        Ok(serde_json::from_slice(&body?)?)
    }
}

/// `Rejected`, carrying the server's message when the body has one.
fn rejection(status: StatusCode, body: Option<&[u8]>) -> ApiError {
    let message = body
        .and_then(|body| serde_json::from_slice::<MessageResponse>(body).ok())
        .map(|m| m.message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
    tracing::warn!(status = status.as_u16(), message = %message, "API request rejected");
    ApiError::Rejected {
        status: status.as_u16(),
        message,
    }
}

fn authorize(
    request: reqwest::RequestBuilder,
    token: Option<&SecretString>,
) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token.expose_secret()),
        None => request,
    }
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, ApiError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ApiError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{GeoPoint, NewStory};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    fn token(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn story_json(id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": "Dimas",
            "description": "Lorem Ipsum",
            "photoUrl": "https://story-api.dicoding.dev/images/stories/photo.png",
            "createdAt": "2022-01-08T06:34:18.598Z",
            "lat": -10.212,
            "lon": -16.002
        })
    }

    #[test]
    fn test_http_base_url_rejected() {
        let result = ApiClient::new("http://evil.example.com/v1", Duration::from_secs(1));
        assert!(matches!(result, Err(ApiError::InsecureBaseUrl)));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(matches!(
            ApiClient::new("not a url", Duration::from_secs(1)),
            Err(ApiError::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            ApiClient::new("ftp://example.com", Duration::from_secs(1)),
            Err(ApiError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let client = ApiClient::new(DEFAULT_BASE_URL, Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.endpoint(&["stories"]).as_str(),
            "https://story-api.dicoding.dev/v1/stories"
        );
        assert_eq!(
            client.endpoint(&["stories", "a/b"]).as_str(),
            "https://story-api.dicoding.dev/v1/stories/a%2Fb"
        );

        let trailing = ApiClient::new("https://example.com/v1/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            trailing.endpoint(&["login"]).as_str(),
            "https://example.com/v1/login"
        );
    }

    #[tokio::test]
    async fn test_fetch_all_stories_sends_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stories"))
            .and(header("authorization", "Bearer abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": false,
                "message": "Stories fetched successfully",
                "listStory": [story_json("s1"), story_json("s2")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let stories = client_for(&server)
            .fetch_all_stories(Some(&token("abc123")))
            .await
            .unwrap();
        assert_eq!(stories.len(), 2);
        assert_eq!(stories[1].id, "s2");
    }

    #[tokio::test]
    async fn test_rejected_carries_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stories"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": true,
                "message": "Missing authentication"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_all_stories(None).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(err.to_string().contains("Missing authentication"));
    }

    #[tokio::test]
    async fn test_get_story() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stories/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": false,
                "message": "Story fetched successfully",
                "story": story_json("s1")
            })))
            .mount(&server)
            .await;

        let story = client_for(&server).get_story("s1", None).await.unwrap();
        assert_eq!(story.id, "s1");
        assert_eq!(story.name, "Dimas");
    }

    #[tokio::test]
    async fn test_submit_story_multipart_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stories"))
            .and(header("authorization", "Bearer tok"))
            .and(body_string_contains("name=\"description\""))
            .and(body_string_contains("hello from the beach"))
            .and(body_string_contains("name=\"photo\"; filename=\"photo.jpg\""))
            .and(body_string_contains("name=\"lat\""))
            .and(body_string_contains("name=\"lon\""))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "error": false,
                "message": "success"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let story = NewStory {
            description: "hello from the beach".to_string(),
            photo: b"JPEGDATA".to_vec(),
            location: Some(GeoPoint {
                lat: -8.65,
                lon: 115.21,
            }),
        };
        let message = client_for(&server)
            .submit_story((&story).into(), Some(&token("tok")))
            .await
            .unwrap();
        assert_eq!(message, "success");
    }

    #[tokio::test]
    async fn test_submit_accepted_counts_even_when_body_is_lost() {
        let server = MockServer::start().await;
        Mock::given(path("/stories"))
            .respond_with(ResponseTemplate::new(201).set_body_string("x".repeat(64)))
            .mount(&server)
            .await;
        let story = NewStory {
            description: "oversized reply".to_string(),
            photo: b"JPEGDATA".to_vec(),
            location: None,
        };

        // Body exceeds the limit: the upload itself still succeeded.
        let client = client_for(&server).with_max_response_size(16);
        let message = client.submit_story((&story).into(), None).await.unwrap();
        assert_eq!(message, "");

        // Other calls still surface the oversized body.
        let err = client.fetch_all_stories(None).await.unwrap_err();
        assert!(matches!(err, ApiError::ResponseTooLarge(16)));
    }

    #[tokio::test]
    async fn test_submit_rejection_still_fails_when_body_is_lost() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stories"))
            .respond_with(ResponseTemplate::new(500).set_body_string("y".repeat(64)))
            .mount(&server)
            .await;
        let story = NewStory {
            description: "rejected".to_string(),
            photo: b"JPEGDATA".to_vec(),
            location: None,
        };

        let err = client_for(&server)
            .with_max_response_size(16)
            .submit_story((&story).into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Rejected { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_submit_without_location_omits_coordinates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stories"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "error": false,
                "message": "success"
            })))
            .mount(&server)
            .await;

        let story = NewStory {
            description: "no place".to_string(),
            photo: b"JPEGDATA".to_vec(),
            location: None,
        };
        client_for(&server)
            .submit_story((&story).into(), None)
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(!body.contains("name=\"lat\""));
        assert!(!body.contains("name=\"lon\""));
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_string_contains("user@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": false,
                "message": "success",
                "loginResult": { "userId": "user-yj5pc_LARC_AgK61", "name": "Arif Faizin", "token": "jwt" }
            })))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .login("user@example.com", "password123")
            .await
            .unwrap();
        assert_eq!(result.token, "jwt");
        assert_eq!(result.name, "Arif Faizin");
    }

    #[tokio::test]
    async fn test_register_short_password_rejected_locally() {
        let server = MockServer::start().await;
        let result = client_for(&server)
            .register("A", "a@example.com", "short")
            .await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), Duration::from_millis(100)).unwrap();
        let err = client.fetch_all_stories(None).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout));
        assert!(err.is_network_failure());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_failure() {
        // Port 1 on loopback: connection refused immediately.
        let client = ApiClient::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let err = client.fetch_all_stories(None).await.unwrap_err();
        assert!(err.is_network_failure());
        assert!(!client.is_reachable(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_is_reachable_on_any_status() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client_for(&server).is_reachable(Duration::from_secs(1)).await);
    }
}

//!
//! src/fetch.rs
//!
//! Defines methods for hitting specified endpoints and
//! returning unparsed data. One call is one attempt, nothing retries.
//!

use reqwest::{Client, header, redirect, RequestBuilder, Response};
use url::Url;

use crate::config::{DiscordConfig, HttpConfig, MelonConfig, SpotifyConfig, YouTubeConfig};
use crate::errors::TrackerError;

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

fn client_with_headers(http: &HttpConfig, headers: header::HeaderMap) ->
    Result<Client, TrackerError> {
    client_helper(http)
        .default_headers(headers)
        .build()
        .map_err(|e| TrackerError::Http(format!("build client: {e}")))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, TrackerError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_with_headers(http, h)
}

fn join(base: &Url, path: &str) -> Result<Url, TrackerError> {
    base.join(path)
        .map_err(|e| TrackerError::Config(format!("join {base} + {path}: {e}")))
}

/// Turns a non-success status into the matching error, keeping a bit of body
async fn check_status(resp: Response) -> Result<Response, TrackerError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let retry_after = resp.headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let url = resp.url().path().to_string();
    let body = resp.text().await.unwrap_or_default();
    let body: String = body.chars().take(200).collect();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let after = retry_after.unwrap_or_else(|| "unknown".to_string());
        return Err(TrackerError::RateLimited(format!("{url} (retry after {after})")));
    }
    Err(TrackerError::Http(format!("{url} returned {status}: {body}")))
}

/// Sends once and decodes a json body
pub async fn send_json(request: RequestBuilder) -> Result<serde_json::Value, TrackerError> {
    let resp = check_status(request.send().await?).await?;
    Ok(resp.json::<serde_json::Value>().await?)
}

/// Sends once and returns the body as text
pub async fn send_text(request: RequestBuilder) -> Result<String, TrackerError> {
    let resp = check_status(request.send().await?).await?;
    Ok(resp.text().await?)
}

#[derive(Clone, Debug)]
pub struct SpotifyClient {
    pub http: Client,
    pub cfg: SpotifyConfig
}

impl SpotifyClient {
    pub fn new(http_config: &HttpConfig, cfg: &SpotifyConfig) ->
        Result<Self, TrackerError> {

        let http = base_client(http_config)?;
        Ok( Self {
            http,
            cfg: cfg.clone()
        })
    }

    /// POST {token_url} with client credentials
    pub fn token_request(&self) -> RequestBuilder {
        self.http
            .post(self.cfg.token_url.clone())
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
    }

    /// GET /v1/artists/{id}/albums?include_groups=album,single&limit=
    pub fn artist_albums(&self, artist_id: &str, limit: u32, bearer: &str) ->
        Result<RequestBuilder, TrackerError> {
        let url = join(&self.cfg.api_base, &format!("artists/{artist_id}/albums"))?;
        Ok( self.http.get(url).bearer_auth(bearer).query(&[
            ("include_groups", "album,single"),
            ("limit", &limit.to_string())
        ]))
    }
}

#[derive(Clone, Debug)]
pub struct YouTubeClient {
    pub http: Client,
    pub cfg: YouTubeConfig
}

impl YouTubeClient {
    pub fn new(http_config: &HttpConfig, cfg: &YouTubeConfig) ->
        Result<Self, TrackerError> {
        let http = base_client(http_config)?;
        Ok( Self { http, cfg: cfg.clone() })
    }

    /// GET /youtube/v3/search?part=snippet&channelId=...&order=date&type=video&publishedAfter=...
    pub fn channel_uploads(&self, channel_id: &str, published_after: &str) ->
        Result<RequestBuilder, TrackerError> {
        let url = join(&self.cfg.api_base, "search")?;
        Ok( self.http.get(url).query(&[
            ("part", "snippet"),
            ("channelId", channel_id),
            ("maxResults", &self.cfg.max_results.to_string()),
            ("order", "date"),
            ("type", "video"),
            ("publishedAfter", published_after),
            ("key", &self.cfg.api_key)
        ]))
    }
}

#[derive(Clone, Debug)]
pub struct MelonClient {
    pub http: Client,
    pub cfg: MelonConfig
}

impl MelonClient {
    pub fn new(http_config: &HttpConfig, cfg: &MelonConfig) -> Result<Self, TrackerError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
            )
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_str(&cfg.accept_language)
                .map_err(|e| TrackerError::Config(format!("invalid accept-language {e}")))?
        );
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_str(&cfg.user_agent)
                .map_err(|e| TrackerError::Config(format!("invalid user-agent {e}")))?
        );
        let http = client_with_headers(http_config, headers)?;
        Ok( Self { http, cfg: cfg.clone() })
    }

    /// GET {melon_url}, the artist's song listing page
    pub fn artist_songs(&self, melon_url: &str) -> Result<RequestBuilder, TrackerError> {
        let url = Url::parse(melon_url)
            .map_err(|e| TrackerError::Config(format!("melon_url invalid {melon_url}: {e}")))?;
        Ok( self.http.get(url) )
    }
}

#[derive(Clone, Debug)]
pub struct DiscordClient {
    pub http: Client,
    pub cfg: DiscordConfig
}

impl DiscordClient {
    pub fn new(http_config: &HttpConfig, cfg: &DiscordConfig) -> Result<Self, TrackerError> {
        let http = client_with_headers(http_config, header::HeaderMap::new())?;
        Ok( Self { http, cfg: cfg.clone() })
    }

    /// POST {webhook_url} with a json payload
    pub fn execute_webhook(&self, payload: &serde_json::Value) -> RequestBuilder {
        self.http.post(self.cfg.webhook_url.clone()).json(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limit_is_its_own_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/limited")
            .with_status(429)
            .with_header("retry-after", "30")
            .create_async()
            .await;

        let client = base_client(&HttpConfig::default()).unwrap();
        let err = send_json(client.get(format!("{}/limited", server.url())))
            .await
            .unwrap_err();

        match err {
            TrackerError::RateLimited(msg) => assert!(msg.contains("30")),
            other => panic!("expected rate limit, got {other:?}")
        }
    }

    #[tokio::test]
    async fn server_error_carries_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/broken")
            .with_status(503)
            .with_body("upstream down")
            .create_async()
            .await;

        let client = base_client(&HttpConfig::default()).unwrap();
        let err = send_text(client.get(format!("{}/broken", server.url())))
            .await
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("upstream down"));
    }

    #[tokio::test]
    async fn json_body_is_decoded() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/ok")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"items": []}"#)
            .create_async()
            .await;

        let client = base_client(&HttpConfig::default()).unwrap();
        let value = send_json(client.get(format!("{}/ok", server.url()))).await.unwrap();
        assert!(value["items"].as_array().unwrap().is_empty());
    }
}

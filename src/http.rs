use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use tracing::{debug, info, instrument};
use url::Url;

use crate::errors::{AlarmError, Result};

/// Alarm collection path on the Alarm Manager
pub const ALARMS_PATH: &str = "ric/v1/alarms";

/// Fallback sink posting alarm messages to the Alarm Manager REST API
///
/// # Example
///
/// ```rust,no_run
/// use ric_alarm::HttpSink;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let sink = HttpSink::new("http://service-ricplt-alarmmanager-http.ricplt:8080")?;
///     sink.post(br#"{"managedObjectId":"my-pod"}"#).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct HttpSink {
    client: ClientWithMiddleware,
    alarms_url: Url,
    strict_status: bool,
}

impl HttpSink {
    /// Create a sink for the Alarm Manager at `manager_url`
    ///
    /// The underlying HTTP client keeps its default timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(manager_url: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(AlarmError::BuildHttpClient)?;

        let client = ClientBuilder::new(client).build();

        Self::with_client(client, manager_url)
    }

    /// Create a sink with a custom reqwest middleware client
    ///
    /// This allows you to add custom middleware (logging, tracing, etc.)
    pub fn with_client(client: ClientWithMiddleware, manager_url: &str) -> Result<Self> {
        Ok(Self {
            client,
            alarms_url: alarms_url(manager_url)?,
            strict_status: false,
        })
    }

    /// Fail on non-2xx responses instead of only logging them
    pub fn strict_status(mut self, strict: bool) -> Self {
        self.strict_status = strict;
        self
    }

    /// Full URL alarms are posted to
    pub fn url(&self) -> &Url {
        &self.alarms_url
    }

    /// Post a serialized alarm message
    ///
    /// The body is sent as is, with content type `application/json`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The HTTP request fails
    /// - Strict status checking is on and the Alarm Manager answers non-2xx
    #[instrument(
        name = "HttpSink::post",
        skip_all,
        fields(url = %self.alarms_url, len = payload.len())
    )]
    pub async fn post(&self, payload: &[u8]) -> Result<()> {
        debug!("Posting alarm to Alarm Manager");

        let response = self
            .client
            .post(self.alarms_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(AlarmError::HttpPost)?;

        let status = response.status();
        info!(status = status.as_u16(), "Alarm posted");

        if self.strict_status && !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AlarmError::HttpStatus {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}

fn alarms_url(manager_url: &str) -> Result<Url> {
    let url = format!("{}/{}", manager_url.trim_end_matches('/'), ALARMS_PATH);
    Url::parse(&url).map_err(|source| AlarmError::InvalidUrl {
        url: manager_url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAYLOAD: &[u8] = br#"{"managedObjectId":"my-pod","AlarmAction":"RAISE"}"#;

    #[tokio::test]
    async fn test_post_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/ric/v1/alarms"))
            .and(header("content-type", "application/json"))
            .and(body_bytes(PAYLOAD))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let sink = HttpSink::new(&mock_server.uri()).unwrap();
        let result = sink.post(PAYLOAD).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_error_status_is_lenient_by_default() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/ric/v1/alarms"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal error"))
            .mount(&mock_server)
            .await;

        let sink = HttpSink::new(&mock_server.uri()).unwrap();
        assert!(sink.post(PAYLOAD).await.is_ok());
    }

    #[tokio::test]
    async fn test_error_status_in_strict_mode() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/ric/v1/alarms"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Bad request"))
            .mount(&mock_server)
            .await;

        let sink = HttpSink::new(&mock_server.uri()).unwrap().strict_status(true);
        let result = sink.post(PAYLOAD).await;

        if let Err(AlarmError::HttpStatus { status, message }) = result {
            assert_eq!(status, 400);
            assert_eq!(message, "Bad request");
        } else {
            panic!("Expected HttpStatus error");
        }
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let sink = HttpSink::new("http://127.0.0.1:1").unwrap();
        let result = sink.post(PAYLOAD).await;
        assert!(matches!(result, Err(AlarmError::HttpPost(_))));
    }

    #[test]
    fn test_url_joining() {
        let sink = HttpSink::new("http://localhost:8080").unwrap();
        assert_eq!(sink.url().as_str(), "http://localhost:8080/ric/v1/alarms");

        let sink = HttpSink::new("http://am.ricplt:8080/").unwrap();
        assert_eq!(sink.url().as_str(), "http://am.ricplt:8080/ric/v1/alarms");
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            HttpSink::new("not a url"),
            Err(AlarmError::InvalidUrl { .. })
        ));
    }
}

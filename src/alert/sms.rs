use serde::Serialize;

use super::{Alert, AlertChannel, AlertError, BoxFuture};
use crate::config::SmsConfig;

#[derive(Serialize)]
struct SmsRequest<'a> {
    from: &'a str,
    to: &'a str,
    body: String,
}

/// Sends the alert text through an HTTP SMS gateway. One attempt per alert.
pub struct SmsClient {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
    from: String,
    to: String,
}

impl SmsClient {
    pub fn new(config: &SmsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            auth_token: config.auth_token.clone(),
            from: config.from.clone(),
            to: config.to.clone(),
        }
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("User-Agent", format!("herdwatch/{}", env!("CARGO_PKG_VERSION")))
            .json(&SmsRequest {
                from: &self.from,
                to: &self.to,
                body: alert.message(),
            });
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        request.send().await?.error_for_status()?;

        tracing::info!(to = %self.to, "sms sent");
        Ok(())
    }
}

impl AlertChannel for SmsClient {
    fn name(&self) -> &'static str {
        "sms"
    }

    fn notify<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), AlertError>> {
        Box::pin(self.send(alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use chrono::{Local, TimeZone};
    use std::sync::{Arc, Mutex};

    type Received = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

    async fn gateway(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/sms",
                post(
                    move |State(received): State<Received>,
                          headers: HeaderMap,
                          axum::Json(body): axum::Json<serde_json::Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(|v| v.to_string());
                        received.lock().unwrap().push((auth, body));
                        status
                    },
                ),
            )
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/sms"), received)
    }

    fn client(endpoint: String) -> SmsClient {
        SmsClient::new(&SmsConfig {
            enabled: true,
            endpoint,
            auth_token: Some("secret".to_string()),
            from: "+10000000000".to_string(),
            to: "+19999999999".to_string(),
        })
    }

    fn alert() -> Alert {
        Alert {
            at: Local.with_ymd_and_hms(2024, 5, 1, 6, 15, 0).unwrap(),
            positive_frames: 17,
        }
    }

    #[tokio::test]
    async fn test_posts_message_to_gateway() {
        let (endpoint, received) = gateway(StatusCode::OK).await;
        client(endpoint).notify(&alert()).await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let (auth, body) = &received[0];
        assert_eq!(auth.as_deref(), Some("Bearer secret"));
        assert_eq!(body["to"], "+19999999999");
        assert_eq!(
            body["body"],
            "Alert! Animal intrusion detected on your farm at 2024-05-01 06:15:00."
        );
    }

    #[tokio::test]
    async fn test_rejection_is_an_error_without_retry() {
        let (endpoint, received) = gateway(StatusCode::INTERNAL_SERVER_ERROR).await;
        let err = client(endpoint).notify(&alert()).await.unwrap_err();
        assert!(matches!(err, AlertError::Http(_)));
        assert_eq!(received.lock().unwrap().len(), 1);
    }
}

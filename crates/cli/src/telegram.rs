//! Telegram alert sink.
//!
//! Fire-and-forget delivery: every message is also written to the log,
//! and the HTTP send happens on a spawned task whose failure is logged
//! and swallowed. A broken chat bridge never propagates into trading.

use chrono::Local;
use std::time::Duration;

use ironfly_engine::alerts::AlertSink;

const TELEGRAM_API: &str = "https://api.telegram.org";

pub struct TelegramAlerter {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl std::fmt::Debug for TelegramAlerter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramAlerter")
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

impl TelegramAlerter {
    /// Creates the alerter.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_base: TELEGRAM_API.to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        })
    }

    /// Points the alerter at a different API host. Test hook.
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Sends a test message and waits for the venue's answer, so boot
    /// can tell the operator whether the bridge works.
    ///
    /// # Errors
    /// Returns an error when Telegram rejects the message.
    pub async fn test_connection(&self) -> anyhow::Result<()> {
        let text = format!(
            "🧪 ironfly connection test\nTime: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
        );
        let response = self
            .http
            .post(self.send_url())
            .json(&self.payload(&text))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error: {status} - {body}");
        }
        Ok(())
    }

    fn send_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    fn payload(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        })
    }

    fn send_detached(&self, text: String) {
        let http = self.http.clone();
        let url = self.send_url();
        let payload = self.payload(&text);
        tokio::spawn(async move {
            match http.post(&url).json(&payload).send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!(
                        target: "ironfly::alerts",
                        status = %response.status(),
                        "Telegram rejected a message"
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(
                        target: "ironfly::alerts",
                        error = %err,
                        "failed to deliver Telegram message"
                    );
                }
            }
        });
    }
}

impl AlertSink for TelegramAlerter {
    fn alert(&self, text: &str) {
        tracing::warn!(target: "ironfly::alerts", "ALERT: {text}");
        let stamped = format!("🚨 ALERT [{}]\n{text}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        self.send_detached(stamped);
    }

    fn notify(&self, text: &str) {
        tracing::info!(target: "ironfly::alerts", "NOTIFY: {text}");
        let stamped = format!("ℹ️ INFO [{}]\n{text}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        self.send_detached(stamped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_connection_round_trips() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_partial_json(serde_json::json!({ "chat_id": "-100555" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
            .mount(&server)
            .await;

        let alerter = TelegramAlerter::new("123:abc", "-100555")
            .unwrap()
            .with_api_base(server.uri());
        alerter.test_connection().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let alerter = TelegramAlerter::new("bad-token", "-100555")
            .unwrap()
            .with_api_base(server.uri());
        assert!(alerter.test_connection().await.is_err());
    }

    #[tokio::test]
    async fn alert_is_fire_and_forget_even_with_no_server() {
        let alerter = TelegramAlerter::new("123:abc", "-100555")
            .unwrap()
            .with_api_base("http://127.0.0.1:1");
        // Must not panic or block on the unreachable endpoint.
        alerter.alert("ORDER test alert");
        alerter.notify("SESSION test notify");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::instrument;

use super::types::{ApiResponse, Update};
use super::{Outbound, TelegramErr, TelegramResult};

const BOT_API_BASE: &str = "https://api.telegram.org";

/// Thin Bot API client: long-poll `getUpdates` inbound, `sendMessage`
/// outbound. No webhook mode.
#[derive(Debug, Clone)]
pub struct BotApi {
    client: reqwest::Client,
    base: String,
}

impl BotApi {
    pub fn new(token: &str) -> Self {
        Self::with_base(BOT_API_BASE, token)
    }

    /// Point the client at an arbitrary host, for tests.
    pub fn with_base(base: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: format!("{base}/bot{token}"),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> TelegramResult<Vec<Update>> {
        let updates: Vec<Update> = self
            .call(
                "getUpdates",
                json!({
                    "offset": offset,
                    "timeout": timeout_secs,
                    "allowed_updates": ["message"],
                }),
            )
            .await?;

        tracing::debug!(count = updates.len(), "polled updates");
        Ok(updates)
    }

    #[instrument(skip(self, body))]
    async fn call<T>(&self, method: &str, body: Value) -> TelegramResult<T>
    where
        T: DeserializeOwned,
    {
        let uri = format!("{}/{method}", self.base);
        let res = self
            .client
            .post(uri)
            .json(&body)
            .send()
            .await?
            .json::<ApiResponse<T>>()
            .await?;

        if !res.ok {
            let detail = res.description.unwrap_or_else(|| "no description".into());
            tracing::error!(method, detail = %detail, "bot api call failed");
            return Err(TelegramErr::Api(detail));
        }

        res.result
            .ok_or_else(|| TelegramErr::Api(format!("{method}: ok response without a result")))
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> TelegramResult<()> {
        // the returned Message payload is of no use to us
        let _: Value = self
            .call("sendMessage", json!({ "chat_id": chat_id, "text": text }))
            .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Outbound for BotApi {
    #[instrument(skip(self, text))]
    async fn send_channel_message(&self, chat_id: i64, text: &str) -> TelegramResult<()> {
        self.send_message(chat_id, text).await
    }

    #[instrument(skip(self, text))]
    async fn send_direct_message(&self, user_id: i64, text: &str) -> TelegramResult<()> {
        // a direct message is a sendMessage to the private chat, whose id is
        // the user id
        self.send_message(user_id, text).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn get_updates_sends_offset_and_parses_result() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/bottesttoken/getUpdates"))
            .and(body_partial_json(json!({ "offset": 41 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [{
                    "update_id": 41,
                    "message": {
                        "message_id": 9,
                        "chat": { "id": -100 },
                        "text": "/rules"
                    }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = BotApi::with_base(&server.uri(), "testtoken");
        let updates = api.get_updates(41, 0).await.unwrap();

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_id, 41);
    }

    #[tokio::test]
    async fn send_message_posts_chat_and_text() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/bottesttoken/sendMessage"))
            .and(body_partial_json(
                json!({ "chat_id": -100, "text": "hello" }),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": { "message_id": 1 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = BotApi::with_base(&server.uri(), "testtoken");
        api.send_channel_message(-100, "hello").await.unwrap();
    }

    #[tokio::test]
    async fn api_rejection_surfaces_description() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/bottesttoken/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": false,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let api = BotApi::with_base(&server.uri(), "testtoken");
        let err = api.send_channel_message(0, "hello").await.unwrap_err();

        assert!(matches!(err, TelegramErr::Api(d) if d.contains("chat not found")));
    }
}

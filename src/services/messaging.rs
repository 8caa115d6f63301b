/// Message channel between the content side and the background process
///
/// Every message crosses the channel as a `serde_json::Value`, so neither
/// side can hand the other a reference into its own memory. The background
/// task answers each message on a one-shot reply channel; handlers run
/// concurrently, as browser message listeners do.
use crate::{
    error::{AppError, AppResult},
    models::{
        message::request_from_counts, ExtensionMessage, RecommendationRequest,
        RecommendationsResponse, SettingResponse,
    },
    services::{preferences::PreferenceStore, recommendations::RecommendationFetcher},
};
use serde_json::Value;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

/// Pending messages before senders wait
const CHANNEL_CAPACITY: usize = 64;

/// A serialized message and where to send the reply
struct Envelope {
    payload: Value,
    reply_tx: oneshot::Sender<Value>,
}

/// Asynchronous request/response interface used by the content side
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RecommendationsRpc: Send + Sync {
    async fn get_recommendations(
        &self,
        message: ExtensionMessage,
    ) -> AppResult<RecommendationsResponse>;

    async fn get_setting(&self, setting: &str) -> AppResult<Option<Value>>;
}

/// Background-process message router
pub struct BackgroundService {
    fetcher: Arc<RecommendationFetcher>,
    preferences: Arc<dyn PreferenceStore>,
}

impl BackgroundService {
    pub fn new(fetcher: Arc<RecommendationFetcher>, preferences: Arc<dyn PreferenceStore>) -> Self {
        Self {
            fetcher,
            preferences,
        }
    }

    /// Starts the listener task and returns a client connected to it
    ///
    /// The task stops once every client has been dropped.
    pub fn spawn(self) -> (BackgroundClient, JoinHandle<()>) {
        let (message_tx, message_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let service = Arc::new(self);

        let handle = tokio::spawn(async move {
            service.listen(message_rx).await;
        });

        (BackgroundClient { message_tx }, handle)
    }

    async fn listen(self: Arc<Self>, mut message_rx: mpsc::Receiver<Envelope>) {
        tracing::info!("Background message listener started");

        while let Some(envelope) = message_rx.recv().await {
            let service = Arc::clone(&self);
            tokio::spawn(async move {
                let reply = service.dispatch(envelope.payload).await;
                if envelope.reply_tx.send(reply).is_err() {
                    tracing::debug!("Message sender went away before the reply");
                }
            });
        }

        tracing::info!("Background message listener stopped");
    }

    /// Handles one serialized message, always producing a serialized reply
    pub async fn dispatch(&self, payload: Value) -> Value {
        let message: ExtensionMessage = match serde_json::from_value(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected malformed message");
                return AppError::InvalidInput(format!("Unsupported message: {}", e)).to_payload();
            }
        };

        let name = message.name();
        match self.handle(message).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(error = %e, message = name, "Message handler failed");
                e.to_payload()
            }
        }
    }

    async fn handle(&self, message: ExtensionMessage) -> AppResult<Value> {
        match message {
            ExtensionMessage::GetTournesolRecommendations {
                videos_number,
                additional_videos_number,
                search,
            } => {
                let request = request_from_counts(videos_number, additional_videos_number, search);
                let response = self.recommendations(&request, false).await;
                Ok(serde_json::to_value(response)?)
            }
            ExtensionMessage::GetTournesolSearchRecommendations {
                videos_number,
                additional_videos_number,
                search,
            } => {
                let request = request_from_counts(videos_number, additional_videos_number, search);
                if request.search_query.is_none() {
                    return Err(AppError::InvalidInput(
                        "Search query cannot be empty".to_string(),
                    ));
                }
                let response = self.recommendations(&request, true).await;
                Ok(serde_json::to_value(response)?)
            }
            ExtensionMessage::GetSetting { setting } => {
                if setting.trim().is_empty() {
                    return Ok(serde_json::to_value(SettingResponse::default())?);
                }
                let value = self.preferences.get(&setting).await?;
                Ok(serde_json::to_value(SettingResponse { value })?)
            }
        }
    }

    async fn recommendations(
        &self,
        request: &RecommendationRequest,
        search_mode: bool,
    ) -> RecommendationsResponse {
        let languages = self.fetcher.resolve_languages().await;

        let sample = if search_mode {
            self.fetcher.fetch_search(request, &languages).await
        } else {
            self.fetcher.fetch_with_languages(request, &languages).await
        };

        RecommendationsResponse {
            data: sample.into_data(),
            recommendations_languages: languages.joined(),
            load_videos: request.primary_count > 0,
            load_additional_videos: request.additional_count > 0,
        }
    }
}

/// Content-side handle to the background process
#[derive(Clone)]
pub struct BackgroundClient {
    message_tx: mpsc::Sender<Envelope>,
}

impl BackgroundClient {
    /// Sends a serialized message and waits for its reply
    pub async fn send_message(&self, payload: Value) -> AppResult<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.message_tx
            .send(Envelope { payload, reply_tx })
            .await
            .map_err(|_| AppError::Messaging("Background process is not running".to_string()))?;

        reply_rx
            .await
            .map_err(|_| AppError::Messaging("Background process dropped the message".to_string()))
    }

    async fn request<T: serde::de::DeserializeOwned>(&self, message: &ExtensionMessage) -> AppResult<T> {
        let reply = self.send_message(serde_json::to_value(message)?).await?;

        if let Some(error) = reply.get("error").and_then(Value::as_str) {
            return Err(AppError::Messaging(error.to_string()));
        }

        Ok(serde_json::from_value(reply)?)
    }
}

#[async_trait::async_trait]
impl RecommendationsRpc for BackgroundClient {
    async fn get_recommendations(
        &self,
        message: ExtensionMessage,
    ) -> AppResult<RecommendationsResponse> {
        self.request(&message).await
    }

    async fn get_setting(&self, setting: &str) -> AppResult<Option<Value>> {
        let response: SettingResponse = self
            .request(&ExtensionMessage::GetSetting {
                setting: setting.to_string(),
            })
            .await?;
        Ok(response.value)
    }
}

/// Tournesol API provider
///
/// Calls `GET {api_url}/polls/{poll}/recommendations/`. The access token is
/// read from local storage on every call, so a login or logout in another
/// tab is picked up without restarting the background process. A missing
/// token is not an error: the request goes out unauthenticated.
use crate::{
    error::{AppError, AppResult},
    models::{RecommendationItem, RecommendationsPage},
    services::{
        preferences::{get_string, PreferenceStore, ACCESS_TOKEN_KEY},
        providers::{RecommendationQuery, RecommendationsApi},
    },
};
use reqwest::Client as HttpClient;
use std::sync::Arc;

#[derive(Clone)]
pub struct TournesolApi {
    http_client: HttpClient,
    api_url: String,
    poll_name: String,
    credentials: Arc<dyn PreferenceStore>,
}

impl TournesolApi {
    pub fn new(api_url: String, poll_name: String, credentials: Arc<dyn PreferenceStore>) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_url,
            poll_name,
            credentials,
        }
    }

    fn recommendations_url(&self) -> String {
        format!(
            "{}/polls/{}/recommendations/",
            self.api_url.trim_end_matches('/'),
            self.poll_name
        )
    }
}

#[async_trait::async_trait]
impl RecommendationsApi for TournesolApi {
    async fn fetch_recommendations(
        &self,
        query: &RecommendationQuery,
    ) -> AppResult<Vec<RecommendationItem>> {
        let url = self.recommendations_url();

        let mut request = self
            .http_client
            .get(&url)
            .query(&query.to_query_pairs());

        if let Some(token) = get_string(self.credentials.as_ref(), ACCESS_TOKEN_KEY).await {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                body = %body,
                provider = "tournesol",
                "Recommendations request failed"
            );
            return Err(AppError::ExternalApi(format!(
                "Tournesol API returned status {}: {}",
                status, body
            )));
        }

        let response_text = response.text().await?;
        let page: RecommendationsPage = serde_json::from_str(&response_text).map_err(|e| {
            tracing::error!(error = %e, "Failed to deserialize Tournesol response");
            AppError::ExternalApi(format!("Failed to parse Tournesol response: {}", e))
        })?;

        tracing::debug!(
            limit = query.limit,
            results = page.results.len(),
            provider = "tournesol",
            "Recommendations fetched"
        );

        Ok(page.results)
    }

    fn name(&self) -> &'static str {
        "tournesol"
    }
}

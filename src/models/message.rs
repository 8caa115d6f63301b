use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{RecommendationItem, RecommendationRequest};

/// Messages the content side sends to the background process
///
/// Serialized as `{ "message": "<name>", ...fields }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message")]
pub enum ExtensionMessage {
    #[serde(rename = "getTournesolRecommendations", rename_all = "camelCase")]
    GetTournesolRecommendations {
        videos_number: i64,
        additional_videos_number: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search: Option<String>,
    },

    #[serde(rename = "getTournesolSearchRecommendations", rename_all = "camelCase")]
    GetTournesolSearchRecommendations {
        videos_number: i64,
        additional_videos_number: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search: Option<String>,
    },

    #[serde(rename = "getSetting")]
    GetSetting { setting: String },
}

impl ExtensionMessage {
    /// Name used on the wire, for logging
    pub fn name(&self) -> &'static str {
        match self {
            ExtensionMessage::GetTournesolRecommendations { .. } => "getTournesolRecommendations",
            ExtensionMessage::GetTournesolSearchRecommendations { .. } => {
                "getTournesolSearchRecommendations"
            }
            ExtensionMessage::GetSetting { .. } => "getSetting",
        }
    }
}

/// Largest item count honored per half of a request
pub const MAX_VIDEOS_NUMBER: i64 = 100;

/// Converts the signed wire counts into a request
///
/// Counts are clamped to `0..=MAX_VIDEOS_NUMBER`.
pub fn request_from_counts(
    videos_number: i64,
    additional_videos_number: i64,
    search: Option<String>,
) -> RecommendationRequest {
    RecommendationRequest {
        primary_count: videos_number.clamp(0, MAX_VIDEOS_NUMBER) as usize,
        additional_count: additional_videos_number.clamp(0, MAX_VIDEOS_NUMBER) as usize,
        search_query: search.filter(|s| !s.trim().is_empty()),
    }
}

/// Reply to both recommendation messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationsResponse {
    /// Primary items followed by additional items
    #[serde(default)]
    pub data: Vec<RecommendationItem>,
    #[serde(default)]
    pub recommendations_languages: String,
    /// Whether primary items were requested at all
    #[serde(default)]
    pub load_videos: bool,
    /// Whether additional items were requested at all
    #[serde(default)]
    pub load_additional_videos: bool,
}

/// Reply to `getSetting`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingResponse {
    #[serde(default)]
    pub value: Option<Value>,
}

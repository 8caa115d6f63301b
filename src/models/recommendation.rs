use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A recommended entity as returned by the backend
///
/// Only `uid` is read (for deduplication); every other field is carried
/// through untouched so the card renderer receives the backend payload as is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationItem {
    pub uid: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RecommendationItem {
    /// Creates an item with no payload besides its identifier
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            fields: Map::new(),
        }
    }
}

/// Paginated response of `GET /polls/{poll}/recommendations/`
#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationsPage {
    #[serde(default)]
    pub results: Vec<RecommendationItem>,
}

/// Publication-date bucket a candidate pool is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recency {
    /// Published within the recency window
    Recent,
    /// Published before the recency window
    Old,
}

/// Over-fetched candidates for one recency bucket
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePool {
    pub items: Vec<RecommendationItem>,
    pub recency: Recency,
}

impl CandidatePool {
    pub fn empty(recency: Recency) -> Self {
        Self {
            items: Vec::new(),
            recency,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What the content side asks the background for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendationRequest {
    pub primary_count: usize,
    pub additional_count: usize,
    pub search_query: Option<String>,
}

impl RecommendationRequest {
    pub fn new(primary_count: usize, additional_count: usize) -> Self {
        Self {
            primary_count,
            additional_count,
            search_query: None,
        }
    }

    pub fn with_search(mut self, query: impl Into<String>) -> Self {
        self.search_query = Some(query.into());
        self
    }
}

/// Items picked for one request, primary first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleResult {
    pub primary: Vec<RecommendationItem>,
    pub additional: Vec<RecommendationItem>,
}

impl SampleResult {
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.additional.is_empty()
    }

    /// Flattens the sample into the `data` array of the message contract
    pub fn into_data(self) -> Vec<RecommendationItem> {
        let mut data = self.primary;
        data.extend(self.additional);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_keeps_unknown_fields() {
        let raw = json!({
            "uid": "yt:abc",
            "tournesol_score": 42.5,
            "metadata": { "video_id": "abc", "language": "fr" }
        });

        let item: RecommendationItem = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(item.uid, "yt:abc");
        assert_eq!(item.fields["tournesol_score"], json!(42.5));
        assert_eq!(serde_json::to_value(&item).unwrap(), raw);
    }

    #[test]
    fn test_page_without_results_is_empty() {
        let page: RecommendationsPage = serde_json::from_str(r#"{"count": 0}"#).unwrap();
        assert!(page.results.is_empty());
    }

    #[test]
    fn test_into_data_puts_primary_first() {
        let sample = SampleResult {
            primary: vec![RecommendationItem::new("a"), RecommendationItem::new("b")],
            additional: vec![RecommendationItem::new("c")],
        };

        let uids: Vec<String> = sample.into_data().into_iter().map(|i| i.uid).collect();
        assert_eq!(uids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_request_with_search() {
        let request = RecommendationRequest::new(4, 0).with_search("climate");
        assert_eq!(request.search_query.as_deref(), Some("climate"));
    }
}

/// Recommendation data provider abstraction
///
/// The fetcher only needs "give me up to N recommendations matching these
/// filters". Keeping that behind a trait lets the sampling logic be tested
/// against canned pools and keeps HTTP details in one place.
use crate::{
    error::AppResult,
    models::{Recency, RecommendationItem},
};
use chrono::{DateTime, SecondsFormat, Utc};

pub mod tournesol;

pub use tournesol::TournesolApi;

/// Publication-date bound of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicationFilter {
    /// Published at or after the date (`date_gte`)
    Since(DateTime<Utc>),
    /// Published at or before the date (`date_lte`)
    Until(DateTime<Utc>),
}

impl PublicationFilter {
    pub fn recency(&self) -> Recency {
        match self {
            PublicationFilter::Since(_) => Recency::Recent,
            PublicationFilter::Until(_) => Recency::Old,
        }
    }

    fn to_query_pair(self) -> (String, String) {
        let (key, date) = match self {
            PublicationFilter::Since(date) => ("date_gte", date),
            PublicationFilter::Until(date) => ("date_lte", date),
        };
        (
            key.to_string(),
            date.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }
}

/// Filters of one `GET /polls/{poll}/recommendations/` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendationQuery {
    pub publication: Option<PublicationFilter>,
    pub limit: usize,
    pub languages: Vec<String>,
    pub search: Option<String>,
    /// Search-results mode: excludes unsafe entities, default scoring
    pub search_mode: bool,
}

impl RecommendationQuery {
    /// Query string parameters, in the order the API documents them
    ///
    /// `metadata[language]` is repeated once per language.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();

        if let Some(publication) = self.publication {
            pairs.push(publication.to_query_pair());
        }
        pairs.push(("limit".to_string(), self.limit.to_string()));

        if let Some(search) = &self.search {
            pairs.push(("search".to_string(), search.clone()));
        }
        if self.search_mode {
            pairs.push(("unsafe".to_string(), "false".to_string()));
            pairs.push(("score_mode".to_string(), "default".to_string()));
        }

        for lang in self.languages.iter().filter(|l| !l.is_empty()) {
            pairs.push(("metadata[language]".to_string(), lang.clone()));
        }

        pairs
    }
}

/// Trait for recommendation backends
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RecommendationsApi: Send + Sync {
    /// Fetches up to `query.limit` recommendations, best ranked first
    async fn fetch_recommendations(
        &self,
        query: &RecommendationQuery,
    ) -> AppResult<Vec<RecommendationItem>>;

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}

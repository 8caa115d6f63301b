pub mod language;
pub mod message;
pub mod recommendation;

pub use language::LanguagePreference;
pub use message::{ExtensionMessage, RecommendationsResponse, SettingResponse};
pub use recommendation::{
    CandidatePool, Recency, RecommendationItem, RecommendationRequest, RecommendationsPage,
    SampleResult,
};

use crate::models::RecommendationItem;
use reqwest::Url;
use serde::Serialize;

/// Marker carried by every overlay the controller inserts
pub const OVERLAY_MARKER: &str = "tournesol_container";

const TITLE: &str = "Recommended by Tournesol";
const VIEW_MORE_URL: &str = "https://tournesol.app/recommendations/";

/// The overlay subtree, as handed to the host page
///
/// Item cards are rendered elsewhere; this carries what the container
/// itself decides: which items, in which order, and the state of its
/// controls.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverlayElement {
    pub marker: String,
    pub title: String,
    pub items: Vec<RecommendationItem>,
    pub expanded: bool,
    /// Disabled while a refresh is in flight
    pub refresh_enabled: bool,
    /// Only offered when there are additional items to reveal
    pub expand_available: bool,
    /// Container styled for the search results page
    pub search: bool,
    pub view_more_link: Option<String>,
}

/// Inputs the container is built from
#[derive(Debug)]
pub struct OverlayView<'a> {
    pub marker: &'a str,
    pub primary: &'a [RecommendationItem],
    pub additional: &'a [RecommendationItem],
    pub expanded: bool,
    pub refresh_enabled: bool,
    pub search_query: Option<&'a str>,
    pub languages: &'a str,
}

impl OverlayElement {
    pub fn build(view: &OverlayView<'_>) -> Self {
        let mut items = view.primary.to_vec();
        if view.expanded {
            items.extend_from_slice(view.additional);
        }

        let view_more_link = view
            .search_query
            .and_then(|query| view_more_link(query, view.languages));

        Self {
            marker: view.marker.to_string(),
            title: TITLE.to_string(),
            items,
            expanded: view.expanded,
            refresh_enabled: view.refresh_enabled,
            expand_available: !view.additional.is_empty(),
            search: view.search_query.is_some(),
            view_more_link,
        }
    }
}

/// Link to the full search results on the platform
fn view_more_link(query: &str, languages: &str) -> Option<String> {
    Url::parse_with_params(
        VIEW_MORE_URL,
        &[
            ("search", query),
            ("language", languages),
            ("utm_source", "extension"),
        ],
    )
    .map(String::from)
    .map_err(|e| tracing::warn!(error = %e, "Invalid view more link"))
    .ok()
}

/// Overlay mount controller
///
/// Runs on the content side. It asks the background process for
/// recommendations, waits for the host page to render the anchor, splices
/// the overlay in, and keeps it in sync with refresh/expand/collapse.
///
/// State lives behind a mutex that is never held across an `.await`; the
/// anchor poller and the pending loads are separate tasks that re-enter it.
/// Every load gets a sequence number and only the latest one is applied.
use crate::{
    config::Config,
    models::{ExtensionMessage, RecommendationItem, RecommendationsResponse},
    overlay::{
        container::{OverlayElement, OverlayView, OVERLAY_MARKER},
        page::{AnchorDescriptor, HostPage},
    },
    services::{messaging::RecommendationsRpc, preferences::SEARCH_ENABLED_KEY},
};
use serde_json::Value;
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::Instrument;
use uuid::Uuid;

/// Parent of the home page grid; the overlay goes before its second row
pub const HOME_ANCHOR_SELECTOR: &str = "#contents.ytd-rich-grid-renderer";
pub const HOME_ANCHOR_CHILD: usize = 1;
/// Parent of the search results list
pub const SEARCH_ANCHOR_SELECTOR: &str = "#contents.ytd-section-list-renderer";
pub const SEARCH_ANCHOR_CHILD: usize = 0;

/// Host-page location a controller instance is responsible for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageScope {
    Home,
    Search,
}

impl PageScope {
    pub fn path(&self) -> &'static str {
        match self {
            PageScope::Home => "/",
            PageScope::Search => "/results",
        }
    }
}

/// Lifecycle of the overlay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MountState {
    #[default]
    Idle,
    AwaitingAnchor,
    Mounted {
        expanded: bool,
    },
    Empty,
}

#[derive(Debug, Clone)]
pub struct MountOptions {
    pub scope: PageScope,
    pub anchor: AnchorDescriptor,
    pub marker: String,
    pub videos_per_row: usize,
    pub additional_videos: usize,
    pub poll_interval: Duration,
    /// Anchor lookups before giving up
    pub max_polls: u32,
}

impl MountOptions {
    pub fn home(config: &Config) -> Self {
        Self {
            scope: PageScope::Home,
            anchor: AnchorDescriptor::new(HOME_ANCHOR_SELECTOR, HOME_ANCHOR_CHILD),
            marker: OVERLAY_MARKER.to_string(),
            videos_per_row: config.videos_per_row,
            additional_videos: config.additional_videos(),
            poll_interval: config.anchor_poll_interval(),
            max_polls: config.anchor_max_polls,
        }
    }

    /// Search results only show one row, never expanded
    pub fn search(config: &Config) -> Self {
        Self {
            scope: PageScope::Search,
            anchor: AnchorDescriptor::new(SEARCH_ANCHOR_SELECTOR, SEARCH_ANCHOR_CHILD),
            marker: OVERLAY_MARKER.to_string(),
            videos_per_row: config.videos_per_row,
            additional_videos: 0,
            poll_interval: config.anchor_poll_interval(),
            max_polls: config.anchor_max_polls,
        }
    }
}

#[derive(Debug, Default)]
struct ControllerState {
    mount: MountState,
    page_loaded: bool,
    loaded: bool,
    loading: bool,
    expanded: bool,
    refresh_enabled: bool,
    videos: Vec<RecommendationItem>,
    additional: Vec<RecommendationItem>,
    languages: String,
    search_query: Option<String>,
    request_seq: u64,
    poll_generation: u64,
    poller: Option<JoinHandle<()>>,
}

struct Shared {
    id: Uuid,
    options: MountOptions,
    page: Arc<dyn HostPage>,
    rpc: Arc<dyn RecommendationsRpc>,
    state: Mutex<ControllerState>,
}

/// Content-side owner of the overlay
///
/// Must be used from within a Tokio runtime. Dropping the controller
/// tears it down, as `teardown()` does.
pub struct MountController {
    shared: Arc<Shared>,
}

impl MountController {
    pub fn new(
        options: MountOptions,
        page: Arc<dyn HostPage>,
        rpc: Arc<dyn RecommendationsRpc>,
    ) -> Self {
        let state = ControllerState {
            refresh_enabled: true,
            ..ControllerState::default()
        };

        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                options,
                page,
                rpc,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn state(&self) -> MountState {
        self.shared.lock().mount
    }

    pub fn is_loading(&self) -> bool {
        self.shared.lock().loading
    }

    pub fn refresh_enabled(&self) -> bool {
        self.shared.lock().refresh_enabled
    }

    /// Items currently held for display, primary then additional
    pub fn held_items(&self) -> (Vec<RecommendationItem>, Vec<RecommendationItem>) {
        let state = self.shared.lock();
        (state.videos.clone(), state.additional.clone())
    }

    /// Sets the search terms of the current results page
    pub fn set_search_query(&self, query: Option<String>) {
        self.shared.lock().search_query = query.filter(|q| !q.trim().is_empty());
    }

    /// Entry point, called on page load and on every host navigation
    ///
    /// Displays what is already loaded, or starts a load when nothing is.
    /// Returns the load task when one was started. On the home page a load
    /// still in flight is reused.
    pub fn show_recommendations(&self) -> Option<JoinHandle<()>> {
        if !self.shared.in_scope() {
            tracing::debug!(
                scope = ?self.shared.options.scope,
                path = %self.shared.page.path(),
                "Page outside of the controller scope"
            );
            return None;
        }

        let needs_load = {
            let mut state = self.shared.lock();
            state.page_loaded = true;

            // The pending load displays its reply once it lands.
            if self.shared.options.scope == PageScope::Home && state.loading {
                tracing::debug!(controller = %self.shared.id, "Load already in flight");
                return None;
            }

            let needs_load = self.shared.options.scope == PageScope::Search
                || (state.videos.is_empty() && !state.loaded);
            if !needs_load {
                self.shared.display(&mut state);
            }
            needs_load
        };

        needs_load.then(|| self.load_recommendations())
    }

    /// Asks the background process for a new sample
    ///
    /// Supersedes any load still in flight.
    pub fn load_recommendations(&self) -> JoinHandle<()> {
        let (seq, message) = {
            let mut state = self.shared.lock();
            state.request_seq += 1;
            state.loading = true;
            (state.request_seq, self.shared.message(&state))
        };

        let shared = Arc::clone(&self.shared);
        let span = tracing::debug_span!("load", controller = %shared.id, seq);
        tokio::spawn(async move { shared.run_load(seq, message).await }.instrument(span))
    }

    /// Refresh control: disables itself and reloads in place
    pub fn refresh(&self) -> JoinHandle<()> {
        {
            let mut state = self.shared.lock();
            state.refresh_enabled = false;
            if let MountState::Mounted { .. } = state.mount {
                self.shared.render_in_place(&mut state);
            }
        }
        self.load_recommendations()
    }

    /// Reveals the additional items already held in memory
    pub fn expand(&self) {
        self.set_expanded(true);
    }

    pub fn collapse(&self) {
        self.set_expanded(false);
    }

    fn set_expanded(&self, expanded: bool) {
        let mut state = self.shared.lock();
        if state.expanded == expanded {
            return;
        }
        state.expanded = expanded;
        if let MountState::Mounted { .. } = state.mount {
            self.shared.render_in_place(&mut state);
        }
    }

    /// Detaches the controller from the current view
    ///
    /// Cancels the poller, removes the overlay and makes any response still
    /// in flight stale. Loaded items are kept for the next
    /// `show_recommendations()`.
    pub fn teardown(&self) {
        let mut state = self.shared.lock();
        self.shared.detach(&mut state);
    }
}

impl Drop for MountController {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        self.shared.detach(&mut state);
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Leaves the view: loads still in flight become stale
    fn detach(&self, state: &mut ControllerState) {
        self.cancel_polling(state);
        self.page.remove_overlays(&self.options.marker);
        state.request_seq += 1;
        state.loading = false;
        state.page_loaded = false;
        state.expanded = false;
        state.refresh_enabled = true;
        state.mount = MountState::Idle;
        tracing::debug!(controller = %self.id, "Controller detached");
    }

    fn in_scope(&self) -> bool {
        self.page.path() == self.options.scope.path()
    }

    fn message(&self, state: &ControllerState) -> ExtensionMessage {
        let videos_number = self.options.videos_per_row as i64;
        let additional_videos_number = self.options.additional_videos as i64;

        match self.options.scope {
            PageScope::Home => ExtensionMessage::GetTournesolRecommendations {
                videos_number,
                additional_videos_number,
                search: None,
            },
            PageScope::Search => ExtensionMessage::GetTournesolSearchRecommendations {
                videos_number,
                additional_videos_number,
                search: state.search_query.clone(),
            },
        }
    }

    async fn run_load(self: Arc<Self>, seq: u64, message: ExtensionMessage) {
        if self.options.scope == PageScope::Search && !self.search_enabled().await {
            self.apply_disabled(seq);
            return;
        }

        let response = match self.rpc.get_recommendations(message).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Recommendations unavailable");
                RecommendationsResponse {
                    load_videos: true,
                    load_additional_videos: self.options.additional_videos > 0,
                    ..RecommendationsResponse::default()
                }
            }
        };

        self.apply_response(seq, response);
    }

    /// Read on every load so toggling the option applies on next navigation
    async fn search_enabled(&self) -> bool {
        match self.rpc.get_setting(SEARCH_ENABLED_KEY).await {
            Ok(Some(Value::Bool(enabled))) => enabled,
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read search setting");
                false
            }
        }
    }

    fn apply_disabled(&self, seq: u64) {
        let mut state = self.lock();
        if seq != state.request_seq {
            return;
        }
        state.loading = false;
        self.cancel_polling(&mut state);
        self.page.remove_overlays(&self.options.marker);
        state.mount = MountState::Idle;
        tracing::debug!("Search recommendations disabled");
    }

    fn apply_response(self: &Arc<Self>, seq: u64, response: RecommendationsResponse) {
        let mut state = self.lock();
        if seq != state.request_seq {
            tracing::debug!(
                seq,
                latest = state.request_seq,
                "Discarding superseded response"
            );
            return;
        }

        state.loading = false;
        state.loaded = true;
        state.refresh_enabled = true;
        state.languages = response.recommendations_languages;

        let mut data = response.data;
        match (response.load_videos, response.load_additional_videos) {
            (true, true) => {
                let additional = data.split_off(self.options.videos_per_row.min(data.len()));
                state.videos = data;
                state.additional = additional;
            }
            (true, false) => state.videos = data,
            (false, true) => state.additional = data,
            (false, false) => {}
        }

        tracing::debug!(
            videos = state.videos.len(),
            additional = state.additional.len(),
            "Recommendations received"
        );

        if state.page_loaded {
            self.display(&mut state);
        }
    }

    fn display(self: &Arc<Self>, state: &mut ControllerState) {
        if state.videos.is_empty() {
            self.cancel_polling(state);
            self.page.remove_overlays(&self.options.marker);
            state.mount = MountState::Empty;
            tracing::info!(controller = %self.id, "No recommendation to display");
            return;
        }

        match state.mount {
            MountState::Mounted { .. } => self.render_in_place(state),
            _ => self.start_polling(state),
        }
    }

    /// Re-renders an overlay whose anchor is already known good
    ///
    /// Falls back to polling if the host page dropped the anchor meanwhile.
    fn render_in_place(self: &Arc<Self>, state: &mut ControllerState) {
        self.page.remove_overlays(&self.options.marker);

        let Some(parent) = self.page.query_anchor(&self.options.anchor) else {
            tracing::debug!(controller = %self.id, "Anchor lost, polling again");
            self.start_polling(state);
            return;
        };

        let overlay = self.build_overlay(state);
        match self
            .page
            .insert_overlay(&parent, self.options.anchor.child_index, overlay)
        {
            Ok(()) => {
                state.mount = MountState::Mounted {
                    expanded: state.expanded,
                };
            }
            Err(e) => {
                tracing::warn!(error = %e, "Overlay re-render failed, polling again");
                self.start_polling(state);
            }
        }
    }

    fn start_polling(self: &Arc<Self>, state: &mut ControllerState) {
        self.cancel_polling(state);
        state.poll_generation += 1;
        state.mount = MountState::AwaitingAnchor;

        let shared = Arc::clone(self);
        let generation = state.poll_generation;
        let span = tracing::debug_span!("anchor_poll", controller = %self.id, generation);
        state.poller = Some(tokio::spawn(
            async move { shared.poll_anchor(generation).await }.instrument(span),
        ));
    }

    fn cancel_polling(&self, state: &mut ControllerState) {
        if let Some(poller) = state.poller.take() {
            poller.abort();
        }
    }

    async fn poll_anchor(self: Arc<Self>, generation: u64) {
        let period = self.options.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for attempt in 1..=self.options.max_polls {
            ticker.tick().await;
            if self.try_mount(generation, attempt) {
                return;
            }
        }

        let mut state = self.lock();
        if state.poll_generation == generation {
            state.poller = None;
            state.mount = MountState::Idle;
            tracing::warn!(
                max_polls = self.options.max_polls,
                selector = %self.options.anchor.selector,
                "Anchor never appeared, giving up"
            );
        }
    }

    /// One poll tick; returns `true` once polling must stop
    fn try_mount(&self, generation: u64, attempt: u32) -> bool {
        let mut state = self.lock();
        if state.poll_generation != generation {
            return true;
        }

        // The host page may have re-rendered and detached a previous insertion.
        self.page.remove_overlays(&self.options.marker);

        let Some(parent) = self.page.query_anchor(&self.options.anchor) else {
            tracing::trace!(attempt, "Anchor not rendered yet");
            return false;
        };

        let overlay = self.build_overlay(&state);
        if let Err(e) = self
            .page
            .insert_overlay(&parent, self.options.anchor.child_index, overlay)
        {
            tracing::warn!(error = %e, attempt, "Overlay insertion failed");
            return false;
        }

        // Dropping our own handle detaches the task, which ends right after.
        state.poller = None;
        state.mount = MountState::Mounted {
            expanded: state.expanded,
        };
        tracing::info!(
            attempt,
            items = state.videos.len(),
            "Overlay mounted"
        );
        true
    }

    fn build_overlay(&self, state: &ControllerState) -> OverlayElement {
        let search_query = match self.options.scope {
            PageScope::Search => state.search_query.as_deref(),
            PageScope::Home => None,
        };

        OverlayElement::build(&OverlayView {
            marker: &self.options.marker,
            primary: &state.videos,
            additional: &state.additional,
            expanded: state.expanded,
            refresh_enabled: state.refresh_enabled,
            search_query,
            languages: &state.languages,
        })
    }
}

use crate::{
    models::{
        CandidatePool, LanguagePreference, Recency, RecommendationItem, RecommendationRequest,
        SampleResult,
    },
    services::{
        preferences::{LanguageResolver, PreferenceStore},
        providers::{PublicationFilter, RecommendationQuery, RecommendationsApi},
    },
};
use chrono::{DateTime, Duration, Timelike, Utc};
use rand::{seq::SliceRandom, Rng};
use std::{collections::HashSet, sync::Arc};

/// Recent candidates fetched per recent item shown
pub const RECENT_OVERSAMPLING_RATIO: f64 = 3.0;
/// Old candidates fetched per old item shown
pub const OLD_OVERSAMPLING_RATIO: f64 = 50.0;
/// Share of recent items among primary items
pub const RECENT_SHARE_PRIMARY: f64 = 0.75;
/// Share of recent items among additional items
pub const RECENT_SHARE_ADDITIONAL: f64 = 0.5;
/// Age under which an item counts as recent
pub const RECENCY_WINDOW_DAYS: i64 = 21;
/// Minimum number of results requested in search mode
pub const SEARCH_MIN_LIMIT: usize = 20;

/// Numeric tunables of the sampling
///
/// Higher oversampling lets items come from further down the ranking and
/// makes consecutive reloads more diverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPolicy {
    pub recent_oversampling: f64,
    pub old_oversampling: f64,
    pub recent_share_primary: f64,
    pub recent_share_additional: f64,
    pub recency_window: Duration,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            recent_oversampling: RECENT_OVERSAMPLING_RATIO,
            old_oversampling: OLD_OVERSAMPLING_RATIO,
            recent_share_primary: RECENT_SHARE_PRIMARY,
            recent_share_additional: RECENT_SHARE_ADDITIONAL,
            recency_window: Duration::days(RECENCY_WINDOW_DAYS),
        }
    }
}

impl SamplingPolicy {
    /// Candidates to fetch for each bucket and half of the overlay
    pub fn raw_counts(&self, request: &RecommendationRequest) -> RawCounts {
        let primary = request.primary_count;
        let additional = request.additional_count;

        RawCounts {
            recent_primary: scaled(primary, self.recent_oversampling, self.recent_share_primary),
            old_primary: scaled(
                primary,
                self.old_oversampling,
                1.0 - self.recent_share_primary,
            ),
            recent_additional: scaled(
                additional,
                self.recent_oversampling,
                self.recent_share_additional,
            ),
            old_additional: scaled(
                additional,
                self.old_oversampling,
                1.0 - self.recent_share_additional,
            ),
        }
    }

    /// Boundary between recent and old items
    ///
    /// Truncated to the hour so identical queries share the API cache.
    pub fn recency_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let boundary = now - self.recency_window;
        boundary
            .with_minute(0)
            .and_then(|d| d.with_second(0))
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(boundary)
    }
}

/// `count × ratio × share`, rounded half away from zero
fn scaled(count: usize, ratio: f64, share: f64) -> usize {
    if count == 0 {
        return 0;
    }
    (count as f64 * ratio * share).round().max(0.0) as usize
}

/// Number of candidates requested per bucket and half
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCounts {
    pub recent_primary: usize,
    pub old_primary: usize,
    pub recent_additional: usize,
    pub old_additional: usize,
}

impl RawCounts {
    pub fn recent_limit(&self) -> usize {
        self.recent_primary.saturating_add(self.recent_additional)
    }

    pub fn old_limit(&self) -> usize {
        self.old_primary.saturating_add(self.old_additional)
    }
}

/// Draws the primary and additional samples from the two pools
///
/// Pools are deduplicated by uid, cut into a primary prefix and an
/// additional suffix, then each half is mixed independently.
pub fn sample_pools<R: Rng + ?Sized>(
    policy: &SamplingPolicy,
    request: &RecommendationRequest,
    recent: CandidatePool,
    old: CandidatePool,
    rng: &mut R,
) -> SampleResult {
    let counts = policy.raw_counts(request);
    let (recent, old) = dedupe_pools(recent.items, old.items);

    let (recent_primary, recent_additional) = split_candidates(recent, counts.recent_primary);
    let (old_primary, old_additional) = split_candidates(old, counts.old_primary);

    SampleResult {
        primary: mix(
            request.primary_count,
            policy.recent_share_primary,
            recent_primary,
            old_primary,
            rng,
        ),
        additional: mix(
            request.additional_count,
            policy.recent_share_additional,
            recent_additional,
            old_additional,
            rng,
        ),
    }
}

/// Drops repeated uids, keeping the recent occurrence
///
/// The two queries share their date boundary, so an item published exactly
/// at it can come back in both.
fn dedupe_pools(
    recent: Vec<RecommendationItem>,
    old: Vec<RecommendationItem>,
) -> (Vec<RecommendationItem>, Vec<RecommendationItem>) {
    let mut seen = HashSet::new();
    let recent: Vec<_> = recent
        .into_iter()
        .filter(|item| seen.insert(item.uid.clone()))
        .collect();
    let old: Vec<_> = old
        .into_iter()
        .filter(|item| seen.insert(item.uid.clone()))
        .collect();
    (recent, old)
}

fn split_candidates(
    mut pool: Vec<RecommendationItem>,
    primary_raw: usize,
) -> (Vec<RecommendationItem>, Vec<RecommendationItem>) {
    let additional = pool.split_off(primary_raw.min(pool.len()));
    (pool, additional)
}

/// Picks `target` items, `recent_share` of them recent when supply allows
///
/// Old candidates cover what recent ones cannot, and the other way round,
/// so the result is only short when both sides together are.
fn mix<R: Rng + ?Sized>(
    target: usize,
    recent_share: f64,
    recent: Vec<RecommendationItem>,
    old: Vec<RecommendationItem>,
    rng: &mut R,
) -> Vec<RecommendationItem> {
    if target == 0 {
        return Vec::new();
    }

    let recent_wanted = scaled(target, 1.0, recent_share).min(target).min(recent.len());
    let old_shown = (target - recent_wanted).min(old.len());
    let recent_shown = (target - old_shown).min(recent.len());

    let mut selected = random_subset(recent, recent_shown, rng);
    selected.extend(random_subset(old, old_shown, rng));
    selected.shuffle(rng);
    selected
}

/// Uniform random subset of `count` items
fn random_subset<R: Rng + ?Sized>(
    mut items: Vec<RecommendationItem>,
    count: usize,
    rng: &mut R,
) -> Vec<RecommendationItem> {
    items.shuffle(rng);
    items.truncate(count);
    items
}

/// Background-side recommendation fetcher
///
/// Over-fetches recent and old candidates with two concurrent queries and
/// returns a freshly randomized sample on every call, so reloading the page
/// does not show the same items over and over.
pub struct RecommendationFetcher {
    api: Arc<dyn RecommendationsApi>,
    preferences: Arc<dyn PreferenceStore>,
    languages: LanguageResolver,
    policy: SamplingPolicy,
}

impl RecommendationFetcher {
    pub fn new(
        api: Arc<dyn RecommendationsApi>,
        preferences: Arc<dyn PreferenceStore>,
        languages: LanguageResolver,
        policy: SamplingPolicy,
    ) -> Self {
        Self {
            api,
            preferences,
            languages,
            policy,
        }
    }

    pub async fn resolve_languages(&self) -> LanguagePreference {
        self.languages.resolve(self.preferences.as_ref()).await
    }

    /// Fetches and samples recommendations for the overlay
    pub async fn fetch(&self, request: &RecommendationRequest) -> SampleResult {
        let languages = self.resolve_languages().await;
        self.fetch_with_languages(request, &languages).await
    }

    pub async fn fetch_with_languages(
        &self,
        request: &RecommendationRequest,
        languages: &LanguagePreference,
    ) -> SampleResult {
        let counts = self.policy.raw_counts(request);
        let boundary = self.policy.recency_boundary(Utc::now());

        let recent_query = self.pool_query(
            PublicationFilter::Since(boundary),
            counts.recent_limit(),
            languages,
            request,
        );
        let old_query = self.pool_query(
            PublicationFilter::Until(boundary),
            counts.old_limit(),
            languages,
            request,
        );

        let (recent, old) = tokio::join!(
            self.fetch_pool(Recency::Recent, recent_query),
            self.fetch_pool(Recency::Old, old_query)
        );

        tracing::debug!(
            recent = recent.len(),
            old = old.len(),
            recent_limit = counts.recent_limit(),
            old_limit = counts.old_limit(),
            "Candidate pools fetched"
        );

        let sample = sample_pools(&self.policy, request, recent, old, &mut rand::rng());

        tracing::info!(
            primary = sample.primary.len(),
            additional = sample.additional.len(),
            requested_primary = request.primary_count,
            requested_additional = request.additional_count,
            "Recommendations sampled"
        );

        sample
    }

    /// Fetches recommendations matching a search, without recency mixing
    pub async fn fetch_search(
        &self,
        request: &RecommendationRequest,
        languages: &LanguagePreference,
    ) -> SampleResult {
        if request.primary_count == 0 {
            return SampleResult::default();
        }

        let query = RecommendationQuery {
            publication: None,
            limit: request.primary_count.max(SEARCH_MIN_LIMIT),
            languages: languages.as_slice().to_vec(),
            search: request.search_query.clone(),
            search_mode: true,
        };

        let mut primary = match self.api.fetch_recommendations(&query).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    provider = self.api.name(),
                    "Search recommendations unavailable"
                );
                Vec::new()
            }
        };
        primary.truncate(request.primary_count);

        SampleResult {
            primary,
            additional: Vec::new(),
        }
    }

    fn pool_query(
        &self,
        publication: PublicationFilter,
        limit: usize,
        languages: &LanguagePreference,
        request: &RecommendationRequest,
    ) -> Option<RecommendationQuery> {
        (limit > 0).then(|| RecommendationQuery {
            publication: Some(publication),
            limit,
            languages: languages.as_slice().to_vec(),
            search: request.search_query.clone(),
            search_mode: false,
        })
    }

    /// Runs one pool query; any failure yields an empty pool
    async fn fetch_pool(&self, recency: Recency, query: Option<RecommendationQuery>) -> CandidatePool {
        let Some(query) = query else {
            return CandidatePool::empty(recency);
        };

        match self.api.fetch_recommendations(&query).await {
            Ok(items) => CandidatePool { items, recency },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    recency = ?recency,
                    provider = self.api.name(),
                    "Recommendation bucket unavailable, using an empty pool"
                );
                CandidatePool::empty(recency)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::AppError,
        services::{preferences::MemoryStore, providers::MockRecommendationsApi},
    };
    use chrono::TimeZone;
    use rand::{rngs::StdRng, SeedableRng};

    fn items(prefix: &str, count: usize) -> Vec<RecommendationItem> {
        (0..count)
            .map(|i| RecommendationItem::new(format!("{}{}", prefix, i)))
            .collect()
    }

    fn pool(prefix: &str, count: usize, recency: Recency) -> CandidatePool {
        CandidatePool {
            items: items(prefix, count),
            recency,
        }
    }

    fn count_prefix(items: &[RecommendationItem], prefix: &str) -> usize {
        items.iter().filter(|i| i.uid.starts_with(prefix)).count()
    }

    fn fetcher(api: MockRecommendationsApi) -> RecommendationFetcher {
        RecommendationFetcher::new(
            Arc::new(api),
            Arc::new(MemoryStore::new()),
            LanguageResolver::new(vec!["fr-FR".to_string()], vec!["fr".to_string()]),
            SamplingPolicy::default(),
        )
    }

    #[test]
    fn test_raw_counts_for_default_overlay() {
        let counts = SamplingPolicy::default().raw_counts(&RecommendationRequest::new(4, 8));
        assert_eq!(
            counts,
            RawCounts {
                recent_primary: 9,
                old_primary: 50,
                recent_additional: 12,
                old_additional: 200,
            }
        );
        assert_eq!(counts.recent_limit(), 21);
        assert_eq!(counts.old_limit(), 250);
    }

    #[test]
    fn test_raw_counts_round_half_up() {
        // 1 * 3 * 0.5 = 1.5 rounds to 2
        let counts = SamplingPolicy::default().raw_counts(&RecommendationRequest::new(0, 1));
        assert_eq!(counts.recent_additional, 2);
        assert_eq!(counts.recent_primary, 0);
        assert_eq!(counts.old_primary, 0);
    }

    #[test]
    fn test_limits_saturate_on_huge_requests() {
        let counts =
            SamplingPolicy::default().raw_counts(&RecommendationRequest::new(usize::MAX, usize::MAX));
        assert_eq!(counts.recent_limit(), usize::MAX);
        assert_eq!(counts.old_limit(), usize::MAX);
    }

    #[test]
    fn test_recency_boundary_truncated_to_hour() {
        let now = Utc.with_ymd_and_hms(2024, 3, 22, 10, 47, 13).unwrap();
        let boundary = SamplingPolicy::default().recency_boundary(now);
        assert_eq!(boundary, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_sample_lengths_when_pools_suffice() {
        let mut rng = StdRng::seed_from_u64(7);
        let request = RecommendationRequest::new(4, 8);

        let sample = sample_pools(
            &SamplingPolicy::default(),
            &request,
            pool("r", 30, Recency::Recent),
            pool("o", 150, Recency::Old),
            &mut rng,
        );

        assert_eq!(sample.primary.len(), 4);
        assert_eq!(sample.additional.len(), 8);
        assert_eq!(count_prefix(&sample.primary, "r"), 3);
        assert_eq!(count_prefix(&sample.primary, "o"), 1);
        assert_eq!(count_prefix(&sample.additional, "r"), 4);
        assert_eq!(count_prefix(&sample.additional, "o"), 4);
    }

    #[test]
    fn test_primary_draws_only_from_primary_candidates() {
        let mut rng = StdRng::seed_from_u64(11);
        let sample = sample_pools(
            &SamplingPolicy::default(),
            &RecommendationRequest::new(4, 8),
            pool("r", 30, Recency::Recent),
            pool("o", 150, Recency::Old),
            &mut rng,
        );

        // Recent primary candidates are r0..r8, old ones o0..o49.
        for item in &sample.primary {
            let index: usize = item.uid[1..].parse().unwrap();
            if item.uid.starts_with('r') {
                assert!(index < 9);
            } else {
                assert!(index < 50);
            }
        }
        for item in &sample.additional {
            let index: usize = item.uid[1..].parse().unwrap();
            if item.uid.starts_with('r') {
                assert!(index >= 9);
            } else {
                assert!(index >= 50);
            }
        }
    }

    #[test]
    fn test_old_backfills_missing_recent() {
        let mut rng = StdRng::seed_from_u64(3);
        let sample = sample_pools(
            &SamplingPolicy::default(),
            &RecommendationRequest::new(4, 0),
            pool("r", 1, Recency::Recent),
            pool("o", 3, Recency::Old),
            &mut rng,
        );

        assert_eq!(sample.primary.len(), 4);
        assert_eq!(count_prefix(&sample.primary, "r"), 1);
        assert_eq!(count_prefix(&sample.primary, "o"), 3);
    }

    #[test]
    fn test_recent_backfills_missing_old() {
        let mut rng = StdRng::seed_from_u64(5);
        let sample = sample_pools(
            &SamplingPolicy::default(),
            &RecommendationRequest::new(4, 0),
            pool("r", 9, Recency::Recent),
            pool("o", 0, Recency::Old),
            &mut rng,
        );

        assert_eq!(sample.primary.len(), 4);
        assert_eq!(count_prefix(&sample.primary, "r"), 4);
    }

    #[test]
    fn test_short_supply_is_not_padded() {
        let mut rng = StdRng::seed_from_u64(1);
        let sample = sample_pools(
            &SamplingPolicy::default(),
            &RecommendationRequest::new(4, 8),
            pool("r", 2, Recency::Recent),
            pool("o", 1, Recency::Old),
            &mut rng,
        );

        assert_eq!(sample.primary.len(), 3);
        assert!(sample.additional.is_empty());
    }

    #[test]
    fn test_overlapping_pools_are_deduplicated() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut old = items("o", 4);
        old.push(RecommendationItem::new("shared"));
        let mut recent = vec![RecommendationItem::new("shared")];
        recent.push(RecommendationItem::new("shared"));

        let sample = sample_pools(
            &SamplingPolicy::default(),
            &RecommendationRequest::new(10, 10),
            CandidatePool {
                items: recent,
                recency: Recency::Recent,
            },
            CandidatePool {
                items: old,
                recency: Recency::Old,
            },
            &mut rng,
        );

        let all = sample.into_data();
        let unique: HashSet<&str> = all.iter().map(|i| i.uid.as_str()).collect();
        assert_eq!(all.len(), 5);
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn test_zero_counts_yield_empty_sample() {
        let mut rng = StdRng::seed_from_u64(2);
        let sample = sample_pools(
            &SamplingPolicy::default(),
            &RecommendationRequest::new(0, 0),
            pool("r", 10, Recency::Recent),
            pool("o", 10, Recency::Old),
            &mut rng,
        );
        assert!(sample.is_empty());
    }

    #[test]
    fn test_reloads_vary() {
        let request = RecommendationRequest::new(4, 0);
        let draws: HashSet<Vec<String>> = (0..20)
            .map(|seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                sample_pools(
                    &SamplingPolicy::default(),
                    &request,
                    pool("r", 9, Recency::Recent),
                    pool("o", 50, Recency::Old),
                    &mut rng,
                )
                .primary
                .into_iter()
                .map(|i| i.uid)
                .collect()
            })
            .collect();

        assert!(draws.len() > 1);
    }

    #[tokio::test]
    async fn test_fetch_issues_two_queries_with_oversampled_limits() {
        let mut api = MockRecommendationsApi::new();
        api.expect_name().return_const("mock");
        api.expect_fetch_recommendations()
            .withf(|q| {
                q.limit == 21
                    && matches!(q.publication, Some(PublicationFilter::Since(_)))
                    && q.languages == vec!["fr".to_string()]
            })
            .times(1)
            .returning(|_| Ok(items("r", 30)));
        api.expect_fetch_recommendations()
            .withf(|q| q.limit == 250 && matches!(q.publication, Some(PublicationFilter::Until(_))))
            .times(1)
            .returning(|_| Ok(items("o", 150)));

        let sample = fetcher(api).fetch(&RecommendationRequest::new(4, 8)).await;

        assert_eq!(sample.primary.len(), 4);
        assert_eq!(sample.additional.len(), 8);
    }

    #[tokio::test]
    async fn test_fetch_degrades_failed_bucket() {
        let mut api = MockRecommendationsApi::new();
        api.expect_name().return_const("mock");
        api.expect_fetch_recommendations()
            .withf(|q| matches!(q.publication, Some(PublicationFilter::Since(_))))
            .returning(|_| Err(AppError::ExternalApi("503".to_string())));
        api.expect_fetch_recommendations()
            .withf(|q| matches!(q.publication, Some(PublicationFilter::Until(_))))
            .returning(|_| Ok(items("o", 150)));

        let sample = fetcher(api).fetch(&RecommendationRequest::new(4, 8)).await;

        assert_eq!(sample.primary.len(), 4);
        assert_eq!(count_prefix(&sample.primary, "o"), 4);
        assert_eq!(sample.additional.len(), 8);
    }

    #[tokio::test]
    async fn test_fetch_both_buckets_failing_is_empty() {
        let mut api = MockRecommendationsApi::new();
        api.expect_name().return_const("mock");
        api.expect_fetch_recommendations()
            .times(2)
            .returning(|_| Err(AppError::ExternalApi("unreachable".to_string())));

        let sample = fetcher(api).fetch(&RecommendationRequest::new(4, 8)).await;

        assert_eq!(sample, SampleResult::default());
    }

    #[tokio::test]
    async fn test_fetch_skips_queries_for_zero_counts() {
        let mut api = MockRecommendationsApi::new();
        api.expect_fetch_recommendations().never();

        let sample = fetcher(api).fetch(&RecommendationRequest::new(0, 0)).await;
        assert!(sample.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_forwards_search_term() {
        let mut api = MockRecommendationsApi::new();
        api.expect_name().return_const("mock");
        api.expect_fetch_recommendations()
            .withf(|q| q.search.as_deref() == Some("bees") && !q.search_mode)
            .times(2)
            .returning(|_| Ok(vec![]));

        let request = RecommendationRequest::new(4, 0).with_search("bees");
        assert!(fetcher(api).fetch(&request).await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_search_keeps_ranking_order() {
        let mut api = MockRecommendationsApi::new();
        api.expect_name().return_const("mock");
        api.expect_fetch_recommendations()
            .withf(|q| q.limit == 20 && q.search_mode && q.publication.is_none())
            .times(1)
            .returning(|_| Ok(items("s", 20)));

        let request = RecommendationRequest::new(3, 0).with_search("bees");
        let languages = LanguagePreference::default();
        let sample = fetcher(api).fetch_search(&request, &languages).await;

        let uids: Vec<&str> = sample.primary.iter().map(|i| i.uid.as_str()).collect();
        assert_eq!(uids, vec!["s0", "s1", "s2"]);
        assert!(sample.additional.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_search_failure_is_empty() {
        let mut api = MockRecommendationsApi::new();
        api.expect_name().return_const("mock");
        api.expect_fetch_recommendations()
            .returning(|_| Err(AppError::ExternalApi("timeout".to_string())));

        let request = RecommendationRequest::new(30, 0).with_search("bees");
        let sample = fetcher(api)
            .fetch_search(&request, &LanguagePreference::default())
            .await;
        assert!(sample.is_empty());
    }
}

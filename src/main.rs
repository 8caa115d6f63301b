use std::{sync::Arc, time::Duration};
use tournesol_extension::{
    config::Config,
    overlay::{
        controller::HOME_ANCHOR_SELECTOR, MountController, MountOptions, MountState, VirtualPage,
    },
    services::{
        messaging::BackgroundService,
        preferences::{JsonFileStore, LanguageResolver, PreferenceStore},
        providers::{RecommendationsApi, TournesolApi},
        recommendations::{RecommendationFetcher, SamplingPolicy},
    },
};
use tracing_subscriber::EnvFilter;

/// Delay before the simulated host page renders its grid
const HOST_RENDER_DELAY: Duration = Duration::from_millis(900);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    // Background process
    let store: Arc<dyn PreferenceStore> = Arc::new(JsonFileStore::new(&config.storage_path));
    let api: Arc<dyn RecommendationsApi> = Arc::new(TournesolApi::new(
        config.api_url.clone(),
        config.poll_name.clone(),
        Arc::clone(&store),
    ));
    tracing::info!(api = api.name(), url = %config.api_url, "Using recommendations backend");

    let fetcher = RecommendationFetcher::new(
        api,
        Arc::clone(&store),
        LanguageResolver::new(
            config.navigator_languages.clone(),
            config.supported_languages.clone(),
        ),
        SamplingPolicy::default(),
    );
    let (client, background) = BackgroundService::new(Arc::new(fetcher), store).spawn();

    // Content side, against a host page that renders its grid late
    let page = Arc::new(VirtualPage::new("/"));
    let controller = MountController::new(MountOptions::home(&config), page.clone(), Arc::new(client));

    let renderer = {
        let page = Arc::clone(&page);
        tokio::spawn(async move {
            tokio::time::sleep(HOST_RENDER_DELAY).await;
            page.render(HOME_ANCHOR_SELECTOR, 8);
        })
    };

    if let Some(load) = controller.show_recommendations() {
        load.await?;
    }
    renderer.await?;

    let deadline = config.anchor_poll_interval() * config.anchor_max_polls;
    let settled = tokio::time::timeout(deadline, async {
        loop {
            match controller.state() {
                MountState::Mounted { .. } | MountState::Empty | MountState::Idle => break,
                MountState::AwaitingAnchor => {
                    tokio::time::sleep(config.anchor_poll_interval()).await
                }
            }
        }
    })
    .await;

    if settled.is_err() {
        tracing::warn!("Overlay did not settle in time");
    }

    match controller.state() {
        MountState::Mounted { .. } => {
            controller.expand();
            for overlay in page.overlays() {
                println!("{}", serde_json::to_string_pretty(&overlay)?);
            }
        }
        state => tracing::info!(?state, "Nothing mounted"),
    }

    controller.teardown();
    drop(controller);
    background.abort();
    Ok(())
}

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use market_proxy::cache::{Cache, MemoryCache};
use market_proxy::coingecko::{
    CoinGeckoClient, KeyManager, ReqwestTransport, RequestBuilder, RetryConfig, RetryingClient,
};
use market_proxy::config::{listen_port, ApiTokens, Config};
use market_proxy::handlers;
use market_proxy::metrics::Metrics;
use market_proxy::services::asset_platforms::AssetPlatformsService;
use market_proxy::services::binance::BinanceService;
use market_proxy::services::coins::CoinsService;
use market_proxy::services::coinslist::CoinsListService;
use market_proxy::services::leaderboard::LeaderboardService;
use market_proxy::services::market_chart::MarketChartService;
use market_proxy::services::markets::MarketsService;
use market_proxy::services::prices::PricesService;
use market_proxy::AppState;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,market_proxy=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path = env::var("CONFIG_FILE").unwrap_or_else(|_| "config.yaml".to_string());
    tracing::info!("Loading configuration from {}", config_path);
    let config = Config::load(&config_path).expect("Failed to load configuration");

    let tokens = match ApiTokens::load(&config.tokens_file) {
        Ok(tokens) => {
            tracing::info!(
                "Loaded {} pro and {} demo API tokens",
                tokens.api_tokens.len(),
                tokens.demo_api_tokens.len()
            );
            tokens
        }
        Err(e) => {
            tracing::warn!(
                "No API tokens loaded ({}), continuing with anonymous access",
                e
            );
            ApiTokens::default()
        }
    };

    let metrics = Metrics::default();

    // Upstream pipeline: transport -> retries -> key rotation.
    let transport =
        Arc::new(ReqwestTransport::new(UPSTREAM_TIMEOUT).expect("Failed to build HTTP client"));
    let keys = Arc::new(KeyManager::new(
        tokens.api_tokens,
        tokens.demo_api_tokens,
        metrics.clone(),
    ));
    let client = Arc::new(CoinGeckoClient::new(
        RetryingClient::new(transport, RetryConfig::default(), metrics.clone()),
        keys,
    ));
    let builder = RequestBuilder::new();

    // Shared cache for all CoinGecko services.
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(
        config.cache.memory.default_expiration,
        config.cache.memory.cleanup_interval,
    ));

    let markets = MarketsService::new(
        client.clone(),
        builder.clone(),
        cache.clone(),
        config.coingecko_markets.clone(),
        config.coingecko_leaderboard.limit,
        metrics.clone(),
    )
    .expect("Invalid markets tier configuration");

    let coinslist = CoinsListService::new(
        client.clone(),
        builder.clone(),
        config.coingecko_coinslist.clone(),
        metrics.clone(),
    );

    let prices = PricesService::new(
        client.clone(),
        builder.clone(),
        cache.clone(),
        config.coingecko_prices.clone(),
        markets.clone(),
        coinslist.clone(),
        metrics.clone(),
    )
    .expect("Invalid prices tier configuration");

    let coins = CoinsService::new(
        client.clone(),
        builder.clone(),
        cache.clone(),
        config.coingecko_coins.clone(),
        config.coingecko_markets.market_params_normalize.clone(),
        markets.clone(),
        metrics.clone(),
    );

    let market_chart = MarketChartService::new(
        client.clone(),
        builder.clone(),
        config.coingecko_market_chart.clone(),
        metrics.clone(),
    );

    let asset_platforms =
        AssetPlatformsService::new(client.clone(), builder.clone(), cache.clone(), metrics.clone());

    let binance = BinanceService::new(
        config.coingecko_leaderboard.quote_symbol.clone(),
        metrics.clone(),
    );

    let leaderboard = LeaderboardService::new(
        markets.clone(),
        binance.clone(),
        config.coingecko_leaderboard.clone(),
    );

    // Subscriptions flow producers -> consumers; this is the only place
    // that connects them. Each top-markets refresh pushes the new symbol
    // universe onto the exchange ticker watch list.
    let markets_for_watch = markets.clone();
    let binance_for_watch = binance.clone();
    let _watchlist_bridge = markets.subscribe().watch(
        move || {
            let markets = markets_for_watch.clone();
            let binance = binance_for_watch.clone();
            async move {
                let symbols = markets.top_symbols();
                if !symbols.is_empty() {
                    binance.set_watch_list(&symbols);
                }
            }
        },
        false,
    );

    // Start background refreshers; each owns its schedulers.
    coinslist.start();
    markets.start();
    prices.start();
    coins.start();
    binance.start();

    let state = AppState {
        markets,
        prices,
        coinslist,
        coins,
        market_chart,
        asset_platforms,
        binance,
        leaderboard,
        metrics,
    };

    let app = handlers::router(state);

    let port = listen_port();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .expect("Failed to bind listener");

    tracing::info!("Server listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}

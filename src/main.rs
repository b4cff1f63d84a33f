//! Wiring & DI. Entry point: bootstrap adapters, inject into services, run the update loop.
//! No business logic here; authentication is delegated to AuthService.

use dotenv::dotenv;
use grammers_client::client::UpdatesConfiguration;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tg_relay::adapters::discord::DiscordWebhook;
use tg_relay::adapters::persistence::{JsonMirrorStore, SqliteFingerprintStore, mirror_json};
use tg_relay::adapters::telegram::{GrammersAuthAdapter, GrammersTgGateway, run_update_loop};
use tg_relay::adapters::ui::InquirePrompt;
use tg_relay::ports::{AuthPort, FingerprintStore, PromptPort, TgGateway, UpdateHandler, WebhookPort};
use tg_relay::shared::config::{AppConfig, RelayConfig};
use tg_relay::usecases::{AuthService, ErrorReporter, RelayService};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let env_loaded = dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &env_loaded {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(_) => info!(cwd = %cwd.display(), "no .env found (check CWD)"),
    }

    let cfg = AppConfig::load().map_err(|e| anyhow::anyhow!("load settings: {}", e))?;
    let relay_cfg = RelayConfig::load(cfg.relay_file_or_default())
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    info!(
        listeners = relay_cfg.listeners.len(),
        path = cfg.relay_file_or_default(),
        "relay rules loaded"
    );

    let api_hash = cfg.api_hash.clone().unwrap_or_default();
    if api_hash.is_empty() {
        anyhow::bail!("Set TG_RELAY_API_HASH (env or .env). Get from https://my.telegram.org");
    }
    let api_id = cfg.api_id.unwrap_or(0);
    if api_id == 0 {
        anyhow::bail!("Set TG_RELAY_API_ID (and TG_RELAY_API_HASH) in .env. Get from https://my.telegram.org");
    }

    let data_path = PathBuf::from(cfg.data_dir_or_default());
    let session_path = PathBuf::from(cfg.session_path_or_default());

    // --- Telegram client (cloned for auth and gateway; same session) ---
    let session = tg_relay::adapters::telegram::session::open_file_session(&session_path)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    let pool = grammers_client::SenderPool::new(Arc::new(session), api_id);
    let client = grammers_client::Client::new(pool.handle.clone());
    let updates = pool.updates;
    tokio::spawn(async move {
        pool.runner.run().await;
    });

    // --- Auth ---
    let auth_adapter: Arc<dyn AuthPort> = Arc::new(GrammersAuthAdapter::new(client.clone()));
    let prompt: Arc<dyn PromptPort> = Arc::new(InquirePrompt::new());
    AuthService::new(auth_adapter, prompt, api_hash, cfg.phone.clone())
        .run_auth_flow()
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let tg: Arc<dyn TgGateway> = Arc::new(GrammersTgGateway::new(
        client.clone(),
        data_path.join("tmp"),
    ));
    match tg.get_dialogs().await {
        Ok(dialogs) => {
            info!(count = dialogs.len(), "connected; watching dialogs");
            for chat in dialogs.iter().filter(|c| !c.is_dm()) {
                info!(id = chat.id, kind = chat.kind_label(), "{}", chat.title());
            }
        }
        Err(e) => warn!(error = %e, "could not list dialogs"),
    }

    let store: Arc<dyn FingerprintStore> = Arc::new(
        SqliteFingerprintStore::connect(&data_path)
            .await
            .map_err(|e| anyhow::anyhow!("SQLite connect failed: {}", e))?,
    );
    let webhook: Arc<dyn WebhookPort> = Arc::new(
        DiscordWebhook::new(Duration::from_secs(cfg.request_timeout_secs_or_default()))
            .map_err(|e| anyhow::anyhow!("{}", e))?,
    );

    let error_settings = relay_cfg.errors.clone();
    let mut relay = RelayService::new(
        relay_cfg,
        Arc::clone(&tg),
        Arc::clone(&webhook),
        store,
        cfg.recent_capacity_or_default(),
    )
    .map_err(|e| anyhow::anyhow!("{}", e))?;

    if cfg.mirror_enabled() {
        let mirror_dir = data_path.join("messages");
        let mirror = JsonMirrorStore::open(&mirror_dir)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        info!(path = %mirror_dir.display(), "message mirror enabled");
        tokio::spawn(mirror_json::log_events(mirror.subscribe()));
        relay = relay.with_mirror(Arc::new(mirror));
    }

    match (error_settings.catch, error_settings.webhook) {
        (true, Some(url)) => {
            let reporter = Arc::new(ErrorReporter::new(Arc::clone(&webhook), url));
            reporter.install_panic_hook();
            relay = relay.with_reporter(reporter);
            info!("error reports enabled");
        }
        (true, None) => info!("errors are logged only (no errors.webhook set)"),
        (false, _) => info!("error reporting disabled"),
    }

    let handler: Arc<dyn UpdateHandler> = Arc::new(relay);
    let stream = client
        .stream_updates(
            updates,
            UpdatesConfiguration {
                catch_up: false,
                ..Default::default()
            },
        )
        .await;
    run_update_loop(stream, handler).await;

    info!("stopped");
    Ok(())
}

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware::Logger, web};
use anyhow::Result;

use groupwork::database::connect_store;
use groupwork::middleware::{RateLimiter, RequestIdMiddleware};
use groupwork::realtime::Notifier;
use groupwork::{AppState, Config, routes};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    env_logger::init();

    let config = Config::from_env()?;
    log::info!(
        "Starting groupwork API (environment: {})",
        config.environment
    );

    let notifier = Notifier::new(config.realtime_channel_capacity);
    let store = connect_store(&config, notifier.clone()).await?;
    let app_state = web::Data::new(AppState::new(store, &config));
    let config_data = web::Data::new(config.clone());

    // Drop broadcast channels nobody listens to any more
    let prune_notifier = notifier.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            prune_notifier.prune();
            log::debug!(
                "Realtime channels after prune: {}",
                prune_notifier.channel_count()
            );
        }
    });

    let server_address = config.server_address();
    log::info!("Server starting on http://{}", server_address);

    let client_base_url = config.client_base_url.clone();
    let rate_limits = RateLimiter::new();
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(config_data.clone())
            .wrap(
                Cors::default()
                    .allowed_origin(&client_base_url)
                    .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                    .allowed_headers(vec![
                        "Authorization",
                        "Content-Type",
                        "Accept",
                        "X-Requested-With",
                        "X-Correlation-ID",
                    ])
                    .max_age(3600),
            )
            .wrap(RequestIdMiddleware)
            .wrap(Logger::new(
                r#"%a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %T correlation_id=%{x-correlation-id}o"#,
            ))
            .configure(|cfg| routes::configure(cfg, &rate_limits))
    })
    .bind(&server_address)?
    .run()
    .await
    .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer};
use std::time::Duration;
use visual_search::AppState;
use visual_search::config::AppConfig;
use visual_search::models::Collaborators;
use visual_search::store::TaskStore;

fn to_io_error(e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

async fn periodic_sweep(store: TaskStore, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let removed = store.sweep_expired();
        if removed > 0 {
            log::info!("Swept {} expired tasks ({} still pending)", removed, store.len());
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::load().map_err(|e| {
        log::error!("Failed to load configuration: {}", e);
        to_io_error(e)
    })?;

    let collaborators = Collaborators::from_config(&config.inference).map_err(|e| {
        log::error!("Failed to initialise models: {}", e);
        to_io_error(e)
    })?;

    let store = if config.tasks.ttl_secs > 0 {
        log::info!("Unstreamed tasks expire after {}s", config.tasks.ttl_secs);
        TaskStore::with_ttl(Duration::from_secs(config.tasks.ttl_secs))
    } else {
        log::warn!("Task expiry disabled; unstreamed tasks are kept until restart");
        TaskStore::new()
    };

    if config.tasks.ttl_secs > 0 {
        actix_web::rt::spawn(periodic_sweep(
            store.clone(),
            Duration::from_secs(config.tasks.sweep_interval_secs),
        ));
    }

    let state = AppState::new(collaborators, store, &config);
    let static_dir = config.server.static_dir.clone();
    let bind_address = config.bind_address();

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .configure(|cfg| state.configure(cfg, static_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}

pub mod config;
pub mod error;
pub mod imaging;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod similarity;
pub mod store;
pub mod stream;

use actix_web::web;
use std::path::PathBuf;

use config::AppConfig;
use models::Collaborators;
use pipeline::{PipelineRunner, PipelineSettings};
use routes::{ApiSettings, configure_routes};
use store::TaskStore;

/// Everything a worker needs, shared across workers by cloning.
#[derive(Clone)]
pub struct AppState {
    pub store: TaskStore,
    pub runner: PipelineRunner,
    pub collaborators: Collaborators,
    pub settings: ApiSettings,
}

impl AppState {
    pub fn new(collaborators: Collaborators, store: TaskStore, config: &AppConfig) -> Self {
        let runner = PipelineRunner::new(
            collaborators.clone(),
            PipelineSettings::from(&config.pipeline),
        );
        Self {
            store,
            runner,
            collaborators,
            settings: ApiSettings::from(config),
        }
    }

    pub fn configure(&self, cfg: &mut web::ServiceConfig, static_dir: Option<PathBuf>) {
        cfg.app_data(web::Data::new(self.store.clone()))
            .app_data(web::Data::new(self.runner.clone()))
            .app_data(web::Data::new(self.collaborators.clone()))
            .app_data(web::Data::new(self.settings.clone()));
        configure_routes(cfg, static_dir);
    }
}

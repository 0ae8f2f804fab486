// lib.rs - pipeline library: workflow core, stores, clients and the HTTP surface
pub mod clients;
pub mod config;
pub mod db;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod store;
pub mod workflow;

use std::sync::Arc;

use config::AppConfig;
use store::StoreProvider;
use workflow::{BatchCoordinator, Collaborators, PipelineOrchestrator};

// AppState holds the configuration, the store provider, the pipeline engines and the job registry
pub struct AppState {
    pub config: AppConfig,
    pub provider: Arc<dyn StoreProvider>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub batch: Arc<BatchCoordinator>,
    pub job_manager: jobs::SharedJobManager,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        provider: Arc<dyn StoreProvider>,
        collaborators: Collaborators,
    ) -> Self {
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            collaborators,
            config.directories.clone(),
            config.retry.clone(),
        ));
        let batch = Arc::new(BatchCoordinator::new(orchestrator.clone(), provider.clone()));

        Self {
            config,
            provider,
            orchestrator,
            batch,
            job_manager: Arc::new(jobs::BatchJobManager::new()),
        }
    }
}

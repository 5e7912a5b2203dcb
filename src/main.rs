use std::env;
use std::sync::Arc;

use goalPlanner::cli;
use goalPlanner::clients::openai_client::OpenAIService;
use goalPlanner::config::{AppConfig, PlannerSettings, RunMode};
use goalPlanner::logging::init_logging;
use goalPlanner::runtime;
use goalPlanner::service::schedule_service::ScheduleController;
use goalPlanner::store::{FileBackend, QueuedStore};

#[tokio::main]
async fn main() {
    let config = match env::var("CONFIG_FILE") {
        Ok(path) => match AppConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
        Err(_) => AppConfig::default(),
    };

    let get_prop = |key: &str| -> Option<String> { config.get(key).or_else(|| env::var(key).ok()) };

    let settings = match PlannerSettings::from_lookup(&get_prop) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    init_logging(&settings.log_level);

    if settings.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; schedule generation will fail");
    }

    let store = QueuedStore::spawn(FileBackend::new(settings.data_file.clone()));
    let mut client = OpenAIService::new(settings.openai_api_key.clone(), settings.openai_model.clone());
    if let Some(endpoint) = get_prop("OPENAI_ENDPOINT") {
        client = client.with_endpoint(endpoint);
    }
    let controller = match ScheduleController::new(Arc::new(store), Arc::new(client), settings.planner_options()).await {
        Ok(controller) => Arc::new(controller),
        Err(e) => {
            eprintln!("Unable to load events from {}: {}", settings.data_file.display(), e);
            std::process::exit(1);
        }
    };

    match settings.run_mode {
        RunMode::Api => runtime::run_api(controller, settings.bind_addr, settings.generation_timeout).await,
        RunMode::Cli => cli::cli(controller, settings.generation_timeout).await,
    }
}

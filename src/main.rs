use annostudy::catalog::{seed_images_from_folders, seed_scenarios};
use annostudy::configuration::Args;
use annostudy::web_interface::WebServer;
use annostudy::{DatabaseStorage, SessionManager};
use clap::Parser;
use log::{error, info};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    info!("Importing configuration");

    // Get command-line arguments
    let args = Args::parse();

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Configuration imported successfully");

    let storage = match DatabaseStorage::new_file(
        &config.storage.database_path,
        config.storage.max_connections,
    )
    .await
    {
        Ok(storage) => storage,
        Err(e) => {
            error!("Unable to open storage: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = seed_scenarios(&storage, &config.scenarios).await {
        error!("Unable to seed scenarios: {}, exiting...", e);
        std::process::exit(1);
    }

    if let Some(ref root) = args.seed_images {
        if let Err(e) = seed_images_from_folders(&storage, root).await {
            error!("Image seeding failed: {}, exiting...", e);
            std::process::exit(1);
        }
    }

    let manager = SessionManager::new(storage.clone());
    let server = match WebServer::new(manager, storage, &config) {
        Ok(server) => server,
        Err(e) => {
            error!("Unable to create the web server: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.start().await {
        error!("Web server stopped: {}", e);
        std::process::exit(1);
    }
}

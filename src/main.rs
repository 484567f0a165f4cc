use availability_manager::{
    configuration::Configuration, configuration_handler::ConfigurationHandler, http::create_app,
    local_availability::LocalAvailability, remote_availability::RemoteAvailability,
};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("########################");
    println!("# Availability Manager #");
    println!("########################");

    let configuration = ConfigurationHandler::parse_arguments();

    let address = format!("0.0.0.0:{}", configuration.port());
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, %address, "Failed to bind");
            return ExitCode::FAILURE;
        }
    };
    println!("Accessible at:\n{address}");

    let app = if let Some(url) = configuration.availability_service_url() {
        match RemoteAvailability::new(&url, configuration.request_timeout()) {
            Ok(backend) => {
                info!(%url, "Using remote availability service");
                create_app(backend, configuration)
            }
            Err(err) => {
                error!(%err, %url, "Failed to set up the availability service client");
                return ExitCode::FAILURE;
            }
        }
    } else {
        let backend = match configuration.seed_file() {
            Some(path) => match LocalAvailability::from_seed_file(&path) {
                Ok(backend) => backend,
                Err(err) => {
                    error!(%err, path = %path.display(), "Failed to load seed data");
                    return ExitCode::FAILURE;
                }
            },
            None => LocalAvailability::default(),
        };
        info!("Using in-memory availability (not persisted)");
        create_app(backend, configuration)
    };

    if let Err(err) = axum::serve(listener, app).await {
        error!(%err, "Server stopped");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

mod api_controller;
mod db;
mod lifecycle_manager;

#[tokio::main]
async fn main() {
    if let Err(e) = api_controller::start_server().await {
        tracing::error!(error = %e, "serverless-core failed to start");
        std::process::exit(1);
    }
}

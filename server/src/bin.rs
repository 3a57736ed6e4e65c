use corevm_server::config::Settings;
use log::{info, warn};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    std::env::set_var("RUST_LOG", "actix_server=info,actix_web=info");
    env_logger::init();

    let settings = Settings::load().unwrap_or_else(|err| {
        warn!("failed to load config, falling back to defaults: {}", err);
        Settings::default()
    });
    info!("starting corevm_server on {}", settings.server_host);

    corevm_server::server::run_server(settings).await
}

use voice_review::config::Config;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("[main] {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = voice_review::run(config).await {
        log::error!("[main] {}", e);
        std::process::exit(1);
    }
}

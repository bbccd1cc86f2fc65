use std::io::Write;

use pi30_bridge::options::Options;
use pi30_bridge::prelude::*;

#[tokio::main]
async fn main() {
    let options = Options::new();

    let config = match Config::new(options.config_file.clone()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load config {}: {:?}", options.config_file, err);
            std::process::exit(255);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.loglevel()))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .init();

    if let Err(err) = pi30_bridge::app(options, config).await {
        error!("{:?}", err);
        std::process::exit(1);
    }
}

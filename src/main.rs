use dlform::{init_env, Config};
use log::error;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let _guard = match init_env::init_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = dlform::serve(config).await {
        error!("Server failed: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

use obstacle_party::run_with_config;
use obstacle_party::use_cases::SessionExit;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Delegate to the client framework entry point.
    match run_with_config().await {
        Ok(SessionExit::Left) => ExitCode::SUCCESS,
        Ok(_) | Err(_) => ExitCode::FAILURE,
    }
}

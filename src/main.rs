use std::process::ExitCode;

use handover_secrets::cli;

#[tokio::main]
async fn main() -> ExitCode {
    match cli::run_cli().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(u8::try_from(cli::exit_code(&e)).unwrap_or(1))
        }
    }
}

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match policyd::cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            policyd::cli::exit_code(&err)
        }
    }
}

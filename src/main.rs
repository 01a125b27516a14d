use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    vetportal::run().await
}

use vaultsync::cli;

#[tokio::main]
async fn main() {
    let code = cli::run_cli().await;
    std::process::exit(code);
}

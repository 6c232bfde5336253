#[tokio::main]
async fn main() {
    if let Err(err) = sshfabric::cli::run().await {
        eprintln!("sshfabric: {}", err);
        std::process::exit(1);
    }
}

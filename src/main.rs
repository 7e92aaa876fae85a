#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = examrounds::run().await {
        eprintln!("examrounds fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lefocus_server::run().await
}

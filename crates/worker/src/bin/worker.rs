use scout_worker::Stage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scout_observability::init();
    scout_worker::run(Stage::Worker).await
}

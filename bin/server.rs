// Receipt Tracker - Web Server
// REST API + single-page dashboard with Axum

use anyhow::Context;
use clap::Parser;
use receipt_tracker::{
    build_categorizer, build_provider, db, open_database, router, telemetry, AppState, Args, Config,
    ReceiptPipeline,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let config = Config::load(&args).context("Failed to load configuration")?;

    if args.validate {
        config.jwt_secret()?;
        println!("✓ Configuration is valid ({})", args.config);
        return Ok(());
    }

    telemetry::init_telemetry()?;
    info!("🌐 Receipt Tracker v{} starting", receipt_tracker::VERSION);

    // Open database
    let conn = open_database(&config.database_path)
        .with_context(|| format!("Failed to open database at {}", config.database_path.display()))?;
    info!(path = %config.database_path.display(), "Database opened");

    // Providers
    let ocr = build_provider(&config.ocr).await?;
    let categorizer = build_categorizer(&config.llm, &config.default_currency)?;
    let pipeline = ReceiptPipeline::new(ocr, categorizer, &config.default_currency);
    info!(
        ocr = pipeline.ocr_name(),
        categorizer = pipeline.categorizer_name(),
        "Pipeline ready"
    );

    let addr = config.bind_address();
    let state = AppState::new(db::shared(conn), config, pipeline)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("🚀 Server running on http://{}", addr);
    info!("   API: http://{}/api/transactions", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

use std::env;

use lecture_pipeline::{
    config::AppConfig,
    db,
    models::SessionId,
    store::{PgStoreProvider, StoreProvider},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let session_id: SessionId = env::args()
        .nth(1)
        .ok_or("usage: check_session <session_id>")?
        .parse()?;

    let config = AppConfig::from_env();
    let database_url = config
        .database
        .url
        .as_ref()
        .ok_or("DATABASE_URL must be set")?;

    let pool = db::create_pool(database_url.expose(), &config.database).await?;
    let store = PgStoreProvider::new(pool).open().await?;

    println!("Checking session {}...\n", session_id);

    let Some(session) = store.session(session_id).await? else {
        println!("❌ Session {} NOT FOUND", session_id);
        return Ok(());
    };

    println!("✅ Session FOUND:");
    println!("  - Label: {}", session.label);
    println!("  - Source: {}", session.source_url);
    println!("  - User: {}", session.user);
    println!("  - Outputs: {:?}", session.outputs);
    println!("  - Created: {}", session.created_at);

    let stages = store.stages(session_id).await?;
    println!("\nStages ({}):", stages.len());
    for stage in &stages {
        println!(
            "  - [{}] {} ({} errors, updated {}): {}",
            stage.status,
            stage.kind,
            stage.error_count,
            stage.updated_at,
            stage.result_text.chars().take(120).collect::<String>()
        );
    }

    let deliverables = store.deliverables(session_id).await?;
    if deliverables.is_empty() {
        println!("\nNo deliverables published.");
    } else {
        println!("\nDeliverables:");
        for deliverable in deliverables {
            println!("  - {:?}: {}", deliverable.kind, deliverable.url);
        }
    }

    Ok(())
}

//! LiveQuery end-to-end demo.
//!
//! Walks the whole subsystem against the in-memory engine:
//! - seeding and observing a task list through the observation bridge
//! - toggling sync through the persisted flag and watching the control
//!   loop converge the engine
//! - an external write to the flag driving the same loop
//!
//! Run with: cargo run -p live_tasks
//! Set RUST_LOG=debug for the registration/dispatch trace.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use livequery_bridge::{ObservationBridge, Task, TaskProjection, TaskStore};
use livequery_control::{ControlConfig, SyncControlLoop};
use livequery_engine::{MemoryEngine, Query, StoreEngine};

fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("  (no tasks)");
    }
    for task in tasks {
        let mark = if task.done { "x" } else { " " };
        println!("  [{mark}] {} ({})", task.title, task.id);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== LiveQuery Demo ===\n");

    let engine = Arc::new(MemoryEngine::new());
    let bridge = ObservationBridge::new(Arc::clone(&engine));
    let store = TaskStore::new(Arc::clone(&engine));

    println!("--- Sync control loop ---");
    let control = SyncControlLoop::start(Arc::clone(&engine), ControlConfig::default())?;
    let mut sync_state = control.state();
    println!("flag seeded, sync enabled: {}", control.current());

    println!("\n--- Task projection ---");
    let projection = TaskProjection::start(&bridge)?;
    let mut tasks = projection.tasks();

    store.seed_initial()?;
    tasks.wait_for(|list| list.len() == 4).await?;
    println!("after seeding the starter tasks:");
    print_tasks(&tasks.borrow());

    let errand = store.create("Return library books")?;
    store.toggle_done(&errand.id)?;
    tasks
        .wait_for(|list| list.iter().any(|t| t.id == errand.id && t.done))
        .await?;
    println!("\nafter creating and completing an errand:");
    print_tasks(&tasks.borrow());

    store.soft_delete(&errand.id)?;
    tasks.wait_for(|list| list.len() == 4).await?;
    println!("\nafter soft-deleting it (document stays in the store):");
    print_tasks(&tasks.borrow());

    println!("\n--- Toggling sync through the store ---");
    let observed = control.toggle_and_wait().await?;
    println!(
        "toggle observed: flag = {observed}, engine active = {}",
        engine.is_sync_active()
    );

    // Any writer of the flag document controls sync; the loop reacts to
    // the store, not to its own toggle path.
    engine.execute(
        &Query::new("UPDATE sync_state SET enabled = :enabled WHERE _id = :id")
            .with_param("enabled", false)
            .with_param("id", "sync_state"),
    )?;
    sync_state.wait_for(|enabled| !enabled).await?;
    println!(
        "external write observed: flag = false, engine active = {}",
        engine.is_sync_active()
    );

    let stats = control.stats();
    println!(
        "\ncontrol loop: {} snapshots, {} transitions, {} failures",
        stats.snapshots_observed, stats.transitions_applied, stats.apply_failures
    );

    projection.shutdown().await;
    control.shutdown().await;
    println!("\n=== Done ===");
    Ok(())
}

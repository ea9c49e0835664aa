//! # Seed Data Generator
//!
//! Populates a local store with sample items for development. Every item is
//! staged through the outbox, so the seeded database also carries a pending
//! queue ready to push.
//!
//! ## Usage
//! ```bash
//! # Generate 200 items (default)
//! cargo run -p driftwood-db --bin seed
//!
//! # Generate custom amount
//! cargo run -p driftwood-db --bin seed -- --count 1000
//!
//! # Specify database path
//! cargo run -p driftwood-db --bin seed -- --db ./data/syncstore.db
//! ```
//!
//! Set `RUST_LOG=driftwood_db=debug` to see each staged operation.

use driftwood_core::{Item, DEFAULT_TABLE_NAME};
use driftwood_db::{Database, DbConfig};
use std::env;
use tracing_subscriber::EnvFilter;

/// Verbs and objects combined into item texts.
const VERBS: &[&str] = &[
    "Buy", "Call", "Email", "Fix", "Plan", "Review", "Book", "Clean", "Return", "Order",
];

const OBJECTS: &[&str] = &[
    "milk",
    "the plumber",
    "the landlord",
    "bike tyre",
    "team offsite",
    "pull request",
    "dentist appointment",
    "garage",
    "library books",
    "birthday cake",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 200;
    let mut db_path = String::from("./syncstore_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Driftwood Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of items to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: ./syncstore_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Driftwood Seed Data Generator");
    println!("=============================");
    println!("Database: {}", db_path);
    println!("Items:    {}", count);
    println!();

    let db = Database::new(DbConfig::new(&db_path).run_migrations(true)).await?;

    let existing = db.items().count().await?;
    if existing > 0 {
        println!("Database already has {} items", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let start = std::time::Instant::now();
    let mut generated = 0;

    for seed in 0..count {
        let item = generate_item(seed);

        if let Err(e) = db.items().stage_insert(&item, DEFAULT_TABLE_NAME).await {
            eprintln!("Failed to insert {}: {}", item.id, e);
            continue;
        }

        generated += 1;
        if generated % 100 == 0 {
            println!("  Generated {} items...", generated);
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!("Generated {} items in {:?}", generated, elapsed);
    println!("  Pending operations: {}", db.operations().count().await?);

    db.close().await;
    Ok(())
}

/// Generates one item; every third is already done.
fn generate_item(seed: usize) -> Item {
    let verb = VERBS[seed % VERBS.len()];
    let object = OBJECTS[(seed / VERBS.len()) % OBJECTS.len()];

    let mut item = Item::new(
        format!("{} {}", verb, object),
        format!("Sample item #{}", seed + 1),
    )
    .with_done(seed % 3 == 0);
    item.ensure_id();
    item
}

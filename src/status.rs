// System status display — database file, schema, and the configured user's counters.

use anyhow::Result;
use std::path::Path;

use crate::activity::UserId;
use crate::layout;
use crate::social;
use crate::store::DocumentStore;

/// Display system status to the terminal.
///
/// `tables` is the schema table count when the backend has one.
pub async fn show(
    store: &dyn DocumentStore,
    db_display_path: &str,
    tables: Option<i64>,
    user: Option<&UserId>,
) -> Result<()> {
    match tables {
        Some(tables) => {
            let file_size = std::fs::metadata(db_display_path)
                .map(|m| format_bytes(m.len()))
                .unwrap_or_else(|_| "unknown".to_string());
            println!("Database: {} ({}, {} tables)", db_display_path, file_size, tables);
        }
        None => println!("Database: in-memory (nothing persists)"),
    }

    let Some(user) = user else {
        println!("User: not set");
        println!("  Set VISIO_USER_ID in your .env file or pass --user");
        return Ok(());
    };

    let profile = social::profile(store, user).await?;
    println!(
        "User: {} ({} followers, {} following)",
        user, profile.followers_count, profile.following_count
    );

    let conversations = store.get(&layout::conversations_of(user)).await?;
    println!("Conversations: {}", conversations.len());

    Ok(())
}

/// True if an SQLite database file exists at `path`.
pub fn is_initialized(path: &str) -> bool {
    Path::new(path).exists()
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

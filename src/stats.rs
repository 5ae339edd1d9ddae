//! Per-user statistics: how many books and annotations exist, how much of
//! the collection is embedded, and how many annotations were recorded on each
//! of the last N days. Used by `marg stats`.

use anyhow::Result;

use crate::config::Config;
use crate::models::UserId;
use crate::sqlite_store::SqliteStore;
use crate::store::{AnnotationStore, StoreStats};

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config, user: &UserId, days: u32) -> Result<()> {
    let store = SqliteStore::open(config).await?;

    let since = chrono::Utc::now().timestamp() - i64::from(days) * 86_400;
    let stats = store.stats(user, since).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Marginalia stats for {}", user);
    println!("================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    print!("{}", render_stats(&stats, days));

    store.pool().close().await;
    Ok(())
}

fn render_stats(stats: &StoreStats, days: u32) -> String {
    let mut out = String::new();
    out.push_str(&format!("  Books:       {}\n", stats.books));
    out.push_str(&format!("  Annotations: {}\n", stats.annotations));
    out.push_str(&format!(
        "  Embedded:    {} / {} ({}%)\n",
        stats.embedded,
        stats.annotations,
        if stats.annotations > 0 {
            (stats.embedded * 100) / stats.annotations
        } else {
            0
        }
    ));

    out.push('\n');
    if stats.per_day.is_empty() {
        out.push_str(&format!("  No annotations in the last {} days.\n", days));
    } else {
        out.push_str(&format!("  Last {} days:\n", days));
        let peak = stats.per_day.iter().map(|(_, n)| *n).max().unwrap_or(1).max(1);
        for (day, n) in &stats.per_day {
            let width = ((*n * 30) / peak).max(1) as usize;
            out.push_str(&format!("  {}  {:>4}  {}\n", day, n, "#".repeat(width)));
        }
    }
    out
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_render_percent_and_bars() {
        let stats = StoreStats {
            books: 2,
            annotations: 4,
            embedded: 3,
            per_day: vec![("2026-01-01".into(), 1), ("2026-01-02".into(), 3)],
        };
        let out = render_stats(&stats, 7);
        assert!(out.contains("Embedded:    3 / 4 (75%)"));
        assert!(out.contains(&format!("2026-01-02     3  {}", "#".repeat(30))));
        assert!(out.contains(&format!("2026-01-01     1  {}", "#".repeat(10))));
    }

    #[test]
    fn test_render_empty() {
        let out = render_stats(&StoreStats::default(), 30);
        assert!(out.contains("(0%)"));
        assert!(out.contains("No annotations in the last 30 days."));
    }
}

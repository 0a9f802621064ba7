//! Terminal table rendering.
//!
//! - Inspector rows are grouped by database, one line per object store
//! - Snapshot listings show id, date, database and counts

use crate::inspect::DatabaseSummary;
use crate::store::SnapshotSummary;

pub fn render_databases(rows: &[DatabaseSummary]) -> String {
    if rows.is_empty() {
        return String::from("No databases found.\n");
    }

    let mut output = String::new();
    let mut current: Option<&str> = None;

    // rows arrive ordered by database, so grouping is a run split
    for row in rows {
        if current != Some(row.db_name.as_str()) {
            current = Some(&row.db_name);
            output.push_str(&format!("\n{} (v{})\n", row.db_name, row.db_version));
            output.push_str(&"-".repeat(60));
            output.push('\n');
        }

        output.push_str(&format!(
            "  {:24} {:>10}  {}\n",
            truncate(&row.store, 24),
            row.count,
            row.indexes
        ));
    }

    let total: u64 = rows.iter().map(|r| r.count).sum();
    output.push_str(&format!("\n{:>37}\n", format!("TOTAL: {total}")));
    output
}

pub fn render_snapshots(rows: &[SnapshotSummary]) -> String {
    if rows.is_empty() {
        return String::from("No snapshots found. Run 'kvsnap snapshot <db>' to create one.\n");
    }

    let mut output = String::new();
    output.push_str(&format!(
        "{:<6} {:<20} {:<20} {:>4} {:>7} {:>9}\n",
        "ID", "Date", "Database", "Ver", "Stores", "Records"
    ));
    output.push_str(&"-".repeat(72));
    output.push('\n');

    for row in rows {
        output.push_str(&format!(
            "{:<6} {:<20} {:<20} {:>4} {:>7} {:>9}\n",
            row.id,
            format_timestamp(row.created),
            truncate(&row.db_name, 20),
            row.db_version,
            row.store_count,
            row.record_count
        ));
    }

    output
}

/// Milliseconds since the epoch as a UTC date.
pub fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{truncated}...")
    }
}

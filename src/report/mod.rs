pub mod json;
pub mod table;

use crate::inspect::DatabaseSummary;
use crate::store::SnapshotSummary;

pub fn print_databases(rows: &[DatabaseSummary], as_json: bool) {
    if as_json {
        println!("{}", json::render(rows));
    } else {
        print!("{}", table::render_databases(rows));
    }
}

pub fn print_snapshots(rows: &[SnapshotSummary], as_json: bool) {
    if as_json {
        println!("{}", json::render(rows));
    } else {
        print!("{}", table::render_snapshots(rows));
    }
}

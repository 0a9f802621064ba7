use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kvsnap")]
#[command(about = "Snapshot, restore and clear versioned key/value databases")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Data directory holding every origin's databases and the snapshot store
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Origin of the context to work in ("null" for an opaque context)
    #[arg(long, global = true)]
    pub origin: Option<String>,

    /// Full location of the context, used to tell opaque contexts apart
    #[arg(long, global = true)]
    pub location: Option<String>,

    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(long, short = 'v', global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// List every object store of every database with its record count
    List(ListArgs),

    /// Capture a database into a new snapshot
    Snapshot(SnapshotArgs),

    /// List saved snapshots, newest first
    Snapshots(SnapshotsArgs),

    /// Restore a saved snapshot into its database
    Restore(IdArgs),

    /// Delete every record of a database, keeping its stores
    Clear(DestructiveArgs),

    /// Drop a database entirely
    Delete(DestructiveArgs),

    /// Delete one saved snapshot
    Forget(IdArgs),

    /// Delete every saved snapshot of the current origin
    Purge(PurgeArgs),

    /// Print the resolved origin
    Origin,

    /// Run one JSON command message and print the JSON reply
    Send(SendArgs),
}

#[derive(Parser)]
pub struct ListArgs {
    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Parser)]
pub struct SnapshotArgs {
    /// Database to capture
    pub db: String,

    /// Expected schema version (defaults to the database's current one)
    #[arg(long)]
    pub db_version: Option<u32>,
}

#[derive(Parser)]
pub struct SnapshotsArgs {
    /// Include snapshots of every origin
    #[arg(long, default_value_t = false)]
    pub all: bool,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Parser)]
pub struct IdArgs {
    /// Snapshot ID
    pub id: u64,
}

#[derive(Parser)]
pub struct DestructiveArgs {
    /// Database name
    pub db: String,

    /// Skip the dry run and execute
    #[arg(long, default_value_t = false)]
    pub yes: bool,
}

impl DestructiveArgs {
    /// returns true if this is a dry run (show what would be removed)
    pub fn is_dry_run(&self) -> bool {
        !self.yes
    }
}

#[derive(Parser)]
pub struct PurgeArgs {
    /// Skip the dry run and execute
    #[arg(long, default_value_t = false)]
    pub yes: bool,
}

#[derive(Parser)]
pub struct SendArgs {
    /// Message such as '{"command":"get-origin"}'
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::parse_from(["kvsnap", "clear", "shop", "--origin", "https://a.example", "--yes"]);
        assert_eq!(cli.global.origin.as_deref(), Some("https://a.example"));
        match cli.command {
            Command::Clear(args) => {
                assert_eq!(args.db, "shop");
                assert!(!args.is_dry_run());
            }
            _ => panic!("expected clear"),
        }
    }

    #[test]
    fn destructive_commands_default_to_dry_run() {
        let cli = Cli::parse_from(["kvsnap", "delete", "shop"]);
        match cli.command {
            Command::Delete(args) => assert!(args.is_dry_run()),
            _ => panic!("expected delete"),
        }
    }
}

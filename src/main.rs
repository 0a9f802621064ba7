use clap::Parser;
use kvsnap::cli::{Cli, Command, DestructiveArgs};
use kvsnap::commands::{Handler, Message, Reply};
use kvsnap::config::Config;
use kvsnap::error::{Error, Result};
use kvsnap::{inspect, logging, report};

fn unexpected(reply: Reply) -> Error {
    Error::InvalidState(format!("unexpected reply: {reply:?}"))
}

fn count(reply: Reply) -> Result<u64> {
    match reply {
        Reply::Count(n) => Ok(n),
        other => Err(unexpected(other)),
    }
}

/// Stores and records a destructive command would touch.
async fn footprint(handler: &Handler, db: &str) -> Result<(usize, u64)> {
    let rows: Vec<_> = inspect::list_all(handler.factory())
        .await?
        .into_iter()
        .filter(|row| row.db_name == db)
        .collect();
    if rows.is_empty() && !handler.factory().exists(db).await? {
        return Err(Error::DatabaseNotFound(db.to_string()));
    }
    Ok((rows.len(), rows.iter().map(|r| r.count).sum()))
}

async fn destructive(handler: &Handler, args: DestructiveArgs, drop_db: bool) -> Result<()> {
    let verb = if drop_db { "delete" } else { "clear" };

    if args.is_dry_run() {
        let (stores, records) = footprint(handler, &args.db).await?;
        println!("would {verb} '{}': {stores} stores, {records} records", args.db);
        println!("\nrun with --yes to execute");
        return Ok(());
    }

    if drop_db {
        handler
            .handle(Message::Delete { db_name: args.db.clone(), db_version: 0 })
            .await?;
        println!("deleted '{}'", args.db);
    } else {
        let cleared = count(
            handler
                .handle(Message::Clear { db_name: args.db.clone(), db_version: 0 })
                .await?,
        )?;
        println!("cleared {cleared} records from '{}'", args.db);
    }
    Ok(())
}

async fn run(command: Command, handler: &Handler) -> Result<()> {
    match command {
        Command::List(args) => match handler.handle(Message::ListDatabases).await? {
            Reply::Databases(rows) => report::print_databases(&rows, args.json),
            other => return Err(unexpected(other)),
        },
        Command::Snapshot(args) => {
            let db_version = match args.db_version {
                Some(version) => version,
                None => handler
                    .factory()
                    .databases()
                    .await?
                    .into_iter()
                    .find(|info| info.name == args.db)
                    .map(|info| info.version)
                    .ok_or_else(|| Error::DatabaseNotFound(args.db.clone()))?,
            };

            match handler
                .handle(Message::Snapshot { db_name: args.db.clone(), db_version })
                .await?
            {
                Reply::Created(id) => println!("snapshot {id} saved for '{}'", args.db),
                other => return Err(unexpected(other)),
            }
        }
        Command::Snapshots(args) => {
            let rows = if args.all {
                handler.metadata().list_all().await?
            } else {
                match handler.handle(Message::ListSnapshots).await? {
                    Reply::Snapshots(rows) => rows,
                    other => return Err(unexpected(other)),
                }
            };
            report::print_snapshots(&rows, args.json);
        }
        Command::Restore(args) => {
            let written = count(
                handler
                    .handle(Message::KickoffSnapshotRestore { id: args.id })
                    .await?,
            )?;
            println!("restored {written} records from snapshot {}", args.id);
        }
        Command::Clear(args) => destructive(handler, args, false).await?,
        Command::Delete(args) => destructive(handler, args, true).await?,
        Command::Forget(args) => {
            if !handler.metadata().delete(args.id).await? {
                return Err(Error::SnapshotNotFound(args.id));
            }
            println!("snapshot {} deleted", args.id);
        }
        Command::Purge(args) => {
            if !args.yes {
                let rows = handler.metadata().list_by_origin(handler.origin()).await?;
                println!("would delete {} snapshots of {}", rows.len(), handler.origin());
                println!("\nrun with --yes to execute");
                return Ok(());
            }
            let removed = count(handler.handle(Message::SnapshotDeleteAll).await?)?;
            println!("deleted {removed} snapshots of {}", handler.origin());
        }
        Command::Origin => match handler.handle(Message::GetOrigin).await? {
            Reply::Origin(origin) => println!("{origin}"),
            other => return Err(unexpected(other)),
        },
        Command::Send(args) => println!("{}", handler.handle_json(&args.message).await?),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_args(&cli.global) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            std::process::exit(1);
        }
    };
    logging::init_with_level(&config.log_level);

    let handler = Handler::new(&config);
    if let Err(e) = run(cli.command, &handler).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

//! vibecache - inspect and exercise an object database through its cache

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser as ClapParser, Subcommand};
use std::path::PathBuf;
use vibecache::codec::{FieldValue, Format};
use vibecache::config::CacheConfig;
use vibecache::database::Database;
use vibecache::lexicon::{Key, KeyType};
use vibecache::payload::Value;

const WORKLOAD_CLASS: u8 = 1;
const WORKLOAD_TABLE: &str = "history";

/// vibecache - object cache for a key/value object database
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short = 'D', long, default_value = "./vibecache_data")]
    data_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Cache budget in payload units
    #[arg(short = 'm', long, default_value = "2048")]
    memory_limit: usize,

    /// Write-backs between block store flushes
    #[arg(long, default_value = "128")]
    flush_batch: usize,

    /// Known entries below which an overfull cache doubles its budget
    #[arg(long, default_value = "10")]
    starvation_floor: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print lexicon size and cache status
    Status,
    /// Push a synthetic read/update workload through the cache
    Load {
        /// Number of objects to touch
        #[arg(short, long, default_value = "1000")]
        objects: u32,

        /// Update every n-th object instead of reading it
        #[arg(long, default_value = "3")]
        dirty_every: u32,
    },
    /// Print a formatted array, given as Class:name
    Dump { key: String },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = CacheConfig {
        memory_limit: args.memory_limit,
        flush_batch: args.flush_batch,
        starvation_floor: args.starvation_floor,
        ..Default::default()
    };

    let database = if args.data_dir.join("objects.db").exists() {
        Database::open(&args.data_dir, config).context("Failed to open database")?
    } else {
        Database::create(&args.data_dir, config).context("Failed to create database")?
    };

    match args.command {
        Command::Status => {
            let keys = database.lexicon(|lex| lex.len());
            println!("Data directory: {}", args.data_dir.display());
            println!("Lexicon keys  : {}", keys);
            println!("{}", database.status());
        }
        Command::Load {
            objects,
            dirty_every,
        } => {
            run_workload(&database, objects, dirty_every.max(1))?;
            let stored = database.flush()?;
            println!("Flushed {} modified objects", stored);
            println!("{}", database.status());
        }
        Command::Dump { key } => {
            let resolved = database
                .lexicon(|lex| lex.lookup_qualified(&key))
                .ok_or_else(|| anyhow!("Unknown key {}", key))?;
            print!("{}", database.dump(resolved)?);
        }
    }

    Ok(())
}

fn run_workload(database: &Database, objects: u32, dirty_every: u32) -> Result<()> {
    let (keys, table) = database.lexicon(|lex| -> Result<(Vec<Key>, Key)> {
        if lex.class_by_name("Object").is_none() {
            lex.define_class(WORKLOAD_CLASS, "Object");
        }
        let keys = (0..objects)
            .map(|i| {
                let name = format!("obj{}", i);
                lex.lookup(WORKLOAD_CLASS, &name)
                    .unwrap_or_else(|| lex.add_key(WORKLOAD_CLASS, &name, KeyType::Tree))
            })
            .collect();
        let table = match lex.lookup(WORKLOAD_CLASS, WORKLOAD_TABLE) {
            Some(key) => key,
            None => lex.add_key(
                WORKLOAD_CLASS,
                WORKLOAD_TABLE,
                KeyType::Array(Format::parse("kit")?),
            ),
        };
        Ok((keys, table))
    })?;

    let touched = Key::new(2, 0);
    let mut updated = Vec::new();
    for (i, &key) in keys.iter().enumerate() {
        if i as u32 % dirty_every == 0 {
            let Some(mut guard) = database.update(key)? else {
                continue;
            };
            guard.with_mut(|payload| {
                if let Some(tree) = payload.as_tree_mut() {
                    tree.set(touched, vec![Value::Int(i as i32)]);
                }
            });
            guard.commit()?;
            updated.push((key, i as i32));
        } else {
            drop(database.read(key)?);
        }
    }

    if let Some(mut guard) = database.update(table)? {
        let now = Utc::now().timestamp() as u32;
        guard.with_mut(|payload| {
            if let Some(array) = payload.as_array_mut() {
                for &(key, i) in &updated {
                    array.push(&[FieldValue::Key(key), FieldValue::Int(i), FieldValue::Time(now)]);
                }
            }
        });
        guard.commit()?;
    }

    Ok(())
}

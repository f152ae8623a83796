//! vibestore - buffer pool and hash index workload driver

use anyhow::{anyhow, Context, Result};
use clap::Parser as ClapParser;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use vibestore::index::{ExtendibleHashTable, OrdComparator, TupleId, XxKeyHasher};
use vibestore::storage::{
    BufferPoolConfig, DiskManager, MemoryPageManager, PageId, PageManager,
    ParallelBufferPoolManager,
};

type WorkloadIndex =
    ExtendibleHashTable<i64, TupleId, OrdComparator, XxKeyHasher, ParallelBufferPoolManager>;

/// vibestore - runs a concurrent hash index workload over a sharded buffer pool
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Frames per buffer pool instance
    #[arg(short, long, default_value = "64")]
    pool_size: usize,

    /// Number of buffer pool instances
    #[arg(short, long, default_value = "4")]
    instances: u32,

    /// Number of distinct keys to insert
    #[arg(short, long, default_value = "10000")]
    keys: usize,

    /// Worker threads
    #[arg(short, long, default_value = "4")]
    threads: usize,

    /// Entries per hash bucket (defaults to what fits a page)
    #[arg(short, long)]
    bucket_capacity: Option<usize>,

    /// Page file; an in-memory store is used when omitted
    #[arg(short = 'f', long)]
    data_file: Option<PathBuf>,

    /// Seed for key generation
    #[arg(short, long)]
    seed: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if args.threads == 0 {
        return Err(anyhow!("--threads must be at least 1"));
    }

    let disk: Arc<dyn DiskManager> = match &args.data_file {
        Some(path) => {
            println!("📂 Page file: {}", path.display());
            Arc::new(PageManager::create(path).context("Failed to create page file")?)
        }
        None => {
            println!("🧠 Using in-memory page store");
            Arc::new(MemoryPageManager::new())
        }
    };

    let config = BufferPoolConfig {
        pool_size: args.pool_size,
        num_instances: args.instances,
    };
    let pool = Arc::new(config.build(disk).context("Failed to build buffer pool")?);
    println!(
        "🔧 Buffer pool: {} instances × {} frames",
        args.instances, args.pool_size
    );

    let index: Arc<WorkloadIndex> = Arc::new(
        ExtendibleHashTable::new(
            "workload",
            pool.clone(),
            OrdComparator,
            XxKeyHasher::default(),
            args.bucket_capacity,
        )
        .context("Failed to create hash index")?,
    );
    println!(
        "🗂  Hash index: directory page {}, bucket capacity {}",
        index.directory_page_id(),
        index.bucket_capacity()
    );

    let seed = args.seed.unwrap_or_else(rand::random);
    let keys = generate_keys(args.keys, seed);
    println!("🎲 {} keys from seed {}", keys.len(), seed);

    let started = Instant::now();
    let inserted = run_workers(&keys, args.threads, |key, slot| {
        match index.insert(key, &tuple_id_for(slot)) {
            Ok(inserted) => Ok(inserted as usize),
            Err(e) if e.is_resource_exhausted() => Err(anyhow::Error::new(e).context(format!(
                "key {} did not fit; try a larger --pool-size or --bucket-capacity",
                key
            ))),
            Err(e) => Err(e.into()),
        }
    })
    .context("Insert phase failed")?;
    println!("➕ Inserted {} entries in {:?}", inserted, started.elapsed());

    let started = Instant::now();
    let found = run_workers(&keys, args.threads, |key, slot| {
        let values = index.get_value(key)?;
        if values != vec![tuple_id_for(slot)] {
            return Err(anyhow!("key {} returned {:?}", key, values));
        }
        Ok(1)
    })
    .context("Lookup phase failed")?;
    println!("🔍 Found {} entries in {:?}", found, started.elapsed());

    // Remove every other key
    let started = Instant::now();
    let removed = run_workers(&keys, args.threads, |key, slot| {
        if slot % 2 == 1 {
            return Ok(0);
        }
        if index.remove(key, &tuple_id_for(slot))? {
            Ok(1)
        } else {
            Err(anyhow!("key {} vanished before removal", key))
        }
    })
    .context("Remove phase failed")?;
    println!("➖ Removed {} entries in {:?}", removed, started.elapsed());

    index
        .verify_integrity()
        .context("Index failed integrity check")?;
    index.print_directory()?;
    pool.flush_all().context("Failed to flush buffer pool")?;

    println!();
    println!("✅ Workload complete");
    println!("   - Live entries: {}", inserted - removed);
    println!("   - Global depth: {}", index.global_depth()?);
    println!("   - Buckets: {}", index.num_buckets()?);
    Ok(())
}

/// Distinct keys in random order.
fn generate_keys(count: usize, seed: u64) -> Vec<i64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let base: i64 = rng.gen_range(-1_000_000..1_000_000);
    let mut keys: Vec<i64> = (0..count as i64).map(|i| base + i * 7).collect();
    keys.shuffle(&mut rng);
    keys
}

fn tuple_id_for(slot: usize) -> TupleId {
    TupleId::new(PageId((slot / 64) as u32), (slot % 64) as u16)
}

/// Run `op` over `keys` split into contiguous chunks, one per thread. `op`
/// receives each key with its position in `keys` and returns a count.
fn run_workers<F>(keys: &[i64], threads: usize, op: F) -> Result<usize>
where
    F: Fn(&i64, usize) -> Result<usize> + Sync,
{
    let chunk_size = keys.len().div_ceil(threads).max(1);
    let op = &op;

    thread::scope(|scope| {
        let handles: Vec<_> = keys
            .chunks(chunk_size)
            .enumerate()
            .map(|(chunk, slice)| {
                scope.spawn(move || -> Result<usize> {
                    let mut total = 0;
                    for (offset, key) in slice.iter().enumerate() {
                        total += op(key, chunk * chunk_size + offset)?;
                    }
                    Ok(total)
                })
            })
            .collect();

        let mut total = 0;
        for handle in handles {
            total += handle
                .join()
                .map_err(|_| anyhow!("worker thread panicked"))??;
        }
        Ok(total)
    })
}

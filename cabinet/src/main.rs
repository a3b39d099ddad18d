use clap::{ArgAction, Parser, Subcommand};
use std::{path::PathBuf, process, thread, time::Instant};

use cabinet::{Cabinet, CabinetSettings, CabinetStats, LockFreeQueue, Residency, Result};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Arena size in bytes
    #[arg(long, global = true)]
    heap_size: Option<usize>,

    /// Drawer size in bytes
    #[arg(long, global = true)]
    drawer_size: Option<usize>,

    /// Upper bound of the virtual drawer table
    #[arg(long, global = true)]
    max_drawers: Option<usize>,

    /// Swap file location
    #[arg(long, global = true)]
    swap: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push integers through the heap-resident queue from several threads
    Stress {
        #[arg(long, default_value_t = 4)]
        threads: usize,

        #[arg(long, default_value_t = 10_000)]
        items: usize,

        /// Save a snapshot of the heap afterwards
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Restore a snapshot and print its drawer table
    Inspect { file: PathBuf },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut settings = CabinetSettings::from_env();
    if let Some(size) = cli.heap_size {
        settings.heap_size = size;
    }
    if let Some(size) = cli.drawer_size {
        settings.drawer_size = size;
    }
    if let Some(max) = cli.max_drawers {
        settings.max_virtual_drawers = max;
    }
    if cli.swap.is_some() {
        settings.swap_path = cli.swap;
    }

    let result = match cli.command {
        Command::Stress {
            threads,
            items,
            snapshot,
        } => stress(settings, threads.max(1), items, snapshot),
        Command::Inspect { file } => inspect(settings, file),
    };

    if let Err(err) = result {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn stress(
    settings: CabinetSettings,
    threads: usize,
    items: usize,
    snapshot: Option<PathBuf>,
) -> Result<()> {
    let cabinet = Cabinet::new(settings)?;
    cabinet.start_gc_daemon()?;
    let queue = LockFreeQueue::new(cabinet.clone())?;
    let started = Instant::now();

    // every worker enqueues its share, then dequeues as many items as it put in
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let share = items / threads + usize::from(t < items % threads);
            let first = t * (items / threads) + t.min(items % threads);
            let (cabinet, queue) = (cabinet.clone(), queue.clone());
            thread::spawn(move || -> Result<i64> {
                for v in first..first + share {
                    queue.enqueue(cabinet.alloc_integer(v as i64)?)?;
                }
                let mut sum = 0;
                let mut taken = 0;
                while taken < share {
                    match queue.dequeue()? {
                        Some(p) => {
                            sum += cabinet.read_integer(p)?;
                            taken += 1;
                        }
                        None => thread::yield_now(),
                    }
                }
                Ok(sum)
            })
        })
        .collect();

    let mut total = 0;
    for handle in handles {
        match handle.join() {
            Ok(sum) => total += sum?,
            Err(_) => {
                eprintln!("Error: stress worker panicked");
                process::exit(1);
            }
        }
    }
    let elapsed = started.elapsed();
    cabinet.stop_gc_daemon();

    let expected = (items as i64) * (items as i64 - 1) / 2;
    println!(
        "{items} items through {threads} threads in {elapsed:.2?}: checksum {}",
        if total == expected { "ok" } else { "MISMATCH" }
    );
    print_stats(&cabinet.stats());

    if let Some(path) = snapshot {
        cabinet.save_snapshot(&path)?;
        println!("snapshot written to {}", path.display());
    }
    if total != expected {
        process::exit(2);
    }
    Ok(())
}

fn inspect(settings: CabinetSettings, file: PathBuf) -> Result<()> {
    let cabinet = Cabinet::new(settings)?;
    cabinet.restore_snapshot(&file)?;

    println!("{:>6}  {:<18}  {:>8}  {:>8}  {:>8}", "drawer", "residency", "score", "used", "free");
    for info in cabinet.drawers() {
        let residency = match info.residency {
            Residency::Resident(slot) => format!("slot {slot}"),
            Residency::Swapped(offset) => format!("swap @{offset}"),
            Residency::Fresh => "fresh".to_string(),
        };
        println!(
            "{:>6}  {:<18}  {:>8}  {:>8}  {:>8}",
            info.id, residency, info.access_count, info.used_bytes, info.free_bytes
        );
    }
    print_stats(&cabinet.stats());
    Ok(())
}

fn print_stats(stats: &CabinetStats) {
    println!(
        "drawers: {} ({} resident, {} swapped, {} fresh, {} leased)",
        stats.drawers, stats.resident, stats.swapped, stats.fresh, stats.leased
    );
    println!(
        "slots: {}/{} free, {} bytes allocated, {} bytes of swap",
        stats.free_slots, stats.physical_slots, stats.allocated_bytes, stats.swap_bytes
    );
}

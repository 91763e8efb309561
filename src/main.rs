//! ringsync CLI - parallel file replication over io_uring
//!
//! Local mode scans the source, auto-tunes the chunk size, and fans the
//! jobs out to ring workers. Network mode dispatches to the sender or
//! receiver endpoints.

use clap::Parser;
use ringsync::config::{CliArgs, Commands, CopyConfig};
use ringsync::core::{run_sync_worker, CopyTuning, Stats, WorkQueue, Worker, DEFAULT_CHUNK_SIZE};
use ringsync::error::{Result, RingSyncError};
use ringsync::fs::{scan_tree, sort_by_locality};
use ringsync::net::{
    parse_host_port, run_receiver, run_receiver_uring, run_sender, run_sender_uring,
    ReceiverOptions, SenderOptions,
};
use ringsync::progress::ProgressReporter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Queue depth for the network endpoints' rings
const NET_QUEUE_DEPTH: u32 = 64;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(args: CliArgs) -> Result<()> {
    if let Some(command) = &args.command {
        return run_network(command);
    }

    if args.source.is_none() || args.destination.is_none() {
        eprintln!("Usage: ringsync <SOURCE> <DESTINATION> [OPTIONS]");
        eprintln!("       ringsync send <SOURCE> <HOST:PORT> [OPTIONS]");
        eprintln!("       ringsync recv <DEST> --listen <PORT> [OPTIONS]");
        eprintln!("       ringsync --help for more information");
        std::process::exit(1);
    }

    let config = CopyConfig::from_cli(&args)?;
    run_local(config)
}

fn run_local(config: CopyConfig) -> Result<()> {
    println!("Scanning files...");
    let mut outcome = scan_tree(&config.source, &config.destination)?;
    sort_by_locality(&mut outcome.jobs);

    if outcome.jobs.is_empty() {
        return Err(RingSyncError::Scan("no files to copy".to_string()));
    }

    let chunk_size = match config.chunk_size {
        Some(size) => size,
        None => {
            let size = outcome.size_stats.pick_chunk_size();
            if config.verbose {
                outcome.size_stats.log_summary();
                tracing::info!(chunk_size = size, "auto-tuned chunk size");
            }
            size
        }
    };

    if config.sync_mode {
        println!(
            "Found {} files, using {} workers (SYNC mode)",
            outcome.jobs.len(),
            config.workers
        );
    } else {
        println!(
            "Found {} files, using {} workers (queue_depth={}, chunk_size={})",
            outcome.jobs.len(),
            config.workers,
            config.queue_depth,
            chunk_size
        );
    }

    // The byte denominator grows as workers stat files; only the file
    // count is known up front.
    let stats = Arc::new(Stats::new());
    stats.set_files_total(outcome.jobs.len() as u64);

    let queue = Arc::new(WorkQueue::new());
    queue.push_bulk(outcome.jobs);
    queue.set_done();

    let tuning = CopyTuning {
        chunk_size,
        use_splice: config.use_splice,
    };

    let start_time = Instant::now();
    let mut workers = Vec::with_capacity(config.workers);
    for worker_id in 0..config.workers {
        let queue = Arc::clone(&queue);
        let stats = Arc::clone(&stats);
        let config = config.clone();
        workers.push(std::thread::spawn(move || -> Result<()> {
            if config.sync_mode {
                run_sync_worker(&queue, &stats);
                Ok(())
            } else {
                let mut worker = Worker::new(config.queue_depth, tuning)?;
                worker.run(&queue, &stats).map_err(|e| {
                    tracing::error!(worker_id, error = %e, "worker failed");
                    e
                })
            }
        }));
    }

    let reporter = if config.quiet {
        ProgressReporter::disabled()
    } else {
        ProgressReporter::new()
    };
    reporter.set_totals(stats.snapshot().files_total, 0);

    loop {
        std::thread::sleep(Duration::from_millis(100));
        let snapshot = stats.snapshot();
        reporter.update(&snapshot);
        if snapshot.is_complete() && queue.is_done() {
            break;
        }
        // A worker that errored out leaves its files short of terminal.
        if workers.iter().all(|w| w.is_finished()) {
            break;
        }
    }

    let mut worker_error = None;
    for handle in workers {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => worker_error = Some(e),
            Err(_) => worker_error = Some(RingSyncError::Scan("worker panicked".to_string())),
        }
    }

    let snapshot = stats.snapshot();
    if snapshot.files_failed > 0 {
        reporter.abandon();
    } else {
        reporter.finish();
    }

    let elapsed = start_time.elapsed().as_secs_f64();
    let throughput = if elapsed > 0.0 {
        snapshot.bytes_copied as f64 / elapsed
    } else {
        0.0
    };
    println!(
        "Completed: {} files, {} in {:.2}s",
        snapshot.files_completed,
        humansize::format_size(snapshot.bytes_copied, humansize::BINARY),
        elapsed
    );
    println!(
        "Throughput: {}/s, {:.0} files/s",
        humansize::format_size(throughput as u64, humansize::BINARY),
        if elapsed > 0.0 {
            snapshot.files_completed as f64 / elapsed
        } else {
            0.0
        }
    );

    if let Some(e) = worker_error {
        return Err(e);
    }
    if snapshot.files_failed > 0 {
        println!("Failed: {} files", snapshot.files_failed);
        std::process::exit(1);
    }
    Ok(())
}

fn run_network(command: &Commands) -> Result<()> {
    match command {
        Commands::Send {
            source,
            target,
            secret,
            splice,
            uring,
            tls,
        } => {
            if *tls && secret.is_none() {
                return Err(RingSyncError::config("--tls requires --secret"));
            }
            if *tls && *uring {
                return Err(RingSyncError::config(
                    "--tls is not supported with --uring; use --tls without --uring",
                ));
            }
            if *tls && !ringsync::net::ktls::is_available() {
                return Err(RingSyncError::UnsupportedOperation(
                    "kernel TLS is not available (is the tls module loaded?)".to_string(),
                ));
            }
            let (host, port) = parse_host_port(target)?;

            if *uring {
                run_sender_uring(
                    source,
                    &host,
                    port,
                    secret.as_deref(),
                    NET_QUEUE_DEPTH,
                    net_chunk_size(),
                )?;
            } else {
                run_sender(
                    source,
                    &host,
                    port,
                    &SenderOptions {
                        secret: secret.clone(),
                        use_splice: *splice,
                        use_tls: *tls,
                        chunk_size: net_chunk_size(),
                    },
                )?;
            }
            Ok(())
        }

        Commands::Recv {
            dest,
            listen,
            secret,
            uring,
            tls,
        } => {
            if *tls && secret.is_none() {
                return Err(RingSyncError::config("--tls requires --secret"));
            }
            if *tls && *uring {
                return Err(RingSyncError::config(
                    "--tls is not supported with --uring; use --tls without --uring",
                ));
            }
            if *tls && !ringsync::net::ktls::is_available() {
                return Err(RingSyncError::UnsupportedOperation(
                    "kernel TLS is not available (is the tls module loaded?)".to_string(),
                ));
            }

            if *uring {
                run_receiver_uring(
                    dest,
                    *listen,
                    secret.as_deref(),
                    NET_QUEUE_DEPTH,
                    net_chunk_size(),
                )?;
            } else {
                run_receiver(
                    dest,
                    *listen,
                    ReceiverOptions {
                        secret: secret.clone(),
                        use_tls: *tls,
                        chunk_size: net_chunk_size(),
                    },
                )?;
            }
            Ok(())
        }
    }
}

fn net_chunk_size() -> usize {
    // The network endpoints have no scan phase to auto-tune from.
    DEFAULT_CHUNK_SIZE
}

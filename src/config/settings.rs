//! Configuration settings for ringsync
//!
//! Defines all configuration options, CLI arguments, and defaults for the
//! local copy pipeline and the network modes.

use crate::error::{Result, RingSyncError};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// ringsync - high-throughput file-tree replicator on io_uring
#[derive(Parser, Debug, Clone)]
#[command(name = "ringsync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Parallel file replicator using io_uring with zero-copy splice")]
#[command(long_about = r#"
ringsync reproduces a source tree's regular files at a destination with
matching content and permission bits, driving all file I/O through
io_uring with zero-copy splice where possible.

Network mode transports the same tree over TCP, with optional in-kernel
transport encryption (kTLS) derived from a pre-shared secret.

Examples:
  ringsync src_dir/ dst_dir/                 # local copy
  ringsync -c 256K src/ dst/                 # fixed 256 KiB chunks
  ringsync --sync nfs_src/ nfs_dst/          # copy_file_range fallback
  ringsync recv /backup --listen 9999 --secret abc123 --tls
  ringsync send /data 192.168.1.100:9999 --secret abc123 --tls
"#)]
pub struct CliArgs {
    /// Source path (file or directory)
    #[arg(value_name = "SOURCE")]
    pub source: Option<PathBuf>,

    /// Destination path
    #[arg(value_name = "DESTINATION")]
    pub destination: Option<PathBuf>,

    /// Number of worker threads (0 = auto-detect)
    #[arg(short = 'j', long = "jobs", default_value = "0", value_name = "NUM")]
    pub jobs: usize,

    /// Chunk size, e.g. 128K or 1M (default: auto-tuned from file sizes)
    #[arg(short = 'c', long = "chunk-size", value_name = "SIZE")]
    pub chunk_size: Option<String>,

    /// io_uring queue depth per worker
    #[arg(short = 'q', long = "queue-depth", default_value = "64", value_name = "NUM")]
    pub queue_depth: u32,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Disable progress output
    #[arg(long)]
    pub quiet: bool,

    /// Use read/write instead of splice
    #[arg(long = "no-splice")]
    pub no_splice: bool,

    /// Use synchronous copy_file_range (better for network storage)
    #[arg(long = "sync")]
    pub sync_mode: bool,

    /// Network mode
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Network subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Stream a tree to a listening receiver
    Send {
        /// Source path (file or directory)
        source: PathBuf,
        /// Receiver address as host:port
        target: String,
        /// Pre-shared secret for authentication
        #[arg(long, value_name = "SECRET")]
        secret: Option<String>,
        /// Use zero-copy splice for file content
        #[arg(long)]
        splice: bool,
        /// Use io_uring async batching
        #[arg(long)]
        uring: bool,
        /// Enable kTLS encryption (requires --secret)
        #[arg(long)]
        tls: bool,
    },
    /// Receive a tree from a sender
    Recv {
        /// Destination directory
        dest: PathBuf,
        /// Port to listen on
        #[arg(short = 'l', long, value_name = "PORT")]
        listen: u16,
        /// Pre-shared secret senders must present
        #[arg(long, value_name = "SECRET")]
        secret: Option<String>,
        /// Use io_uring async batching
        #[arg(long)]
        uring: bool,
        /// Enable kTLS encryption (requires --secret)
        #[arg(long)]
        tls: bool,
    },
}

/// Resolved configuration for a local copy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Source path
    pub source: PathBuf,
    /// Destination path
    pub destination: PathBuf,
    /// Worker thread count
    pub workers: usize,
    /// Ring depth (and pool sizes) per worker
    pub queue_depth: u32,
    /// Fixed chunk size; `None` auto-tunes from the scanned distribution
    pub chunk_size: Option<usize>,
    /// Prefer splice over read/write
    pub use_splice: bool,
    /// Use the synchronous copy_file_range path instead of the ring
    pub sync_mode: bool,
    /// Verbose diagnostics
    pub verbose: bool,
    /// Suppress progress output
    pub quiet: bool,
}

impl CopyConfig {
    /// Build and validate a config from parsed CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let source = args
            .source
            .clone()
            .ok_or_else(|| RingSyncError::config("missing source path"))?;
        let destination = args
            .destination
            .clone()
            .ok_or_else(|| RingSyncError::config("missing destination path"))?;

        if args.queue_depth == 0 {
            return Err(RingSyncError::config("queue-depth must be positive"));
        }

        let chunk_size = match &args.chunk_size {
            Some(raw) => Some(parse_size(raw)?),
            None => None,
        };

        // One ring-driven worker saturates most disks; the sync fallback
        // has no in-worker parallelism, so it defaults to one per CPU.
        let workers = match args.jobs {
            0 if args.sync_mode => num_cpus::get(),
            0 => 1,
            n => n,
        };

        Ok(Self {
            source,
            destination,
            workers,
            queue_depth: args.queue_depth,
            chunk_size,
            use_splice: !args.no_splice,
            sync_mode: args.sync_mode,
            verbose: args.verbose,
            quiet: args.quiet,
        })
    }
}

/// Parse a byte count with an optional K/M/G suffix (binary units)
pub fn parse_size(s: &str) -> Result<usize> {
    let s = s.trim();
    let (digits, multiplier) = match s
        .find(|c: char| !c.is_ascii_digit())
        .map(|idx| s.split_at(idx))
    {
        None => (s, 1usize),
        Some((digits, suffix)) => {
            let multiplier = match suffix.to_ascii_uppercase().as_str() {
                "K" | "KB" | "KIB" => 1024,
                "M" | "MB" | "MIB" => 1024 * 1024,
                "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
                _ => {
                    return Err(RingSyncError::config(format!(
                        "invalid size suffix '{suffix}'"
                    )))
                }
            };
            (digits, multiplier)
        }
    };

    let value: usize = digits
        .parse()
        .map_err(|_| RingSyncError::config(format!("invalid size '{s}'")))?;
    if value == 0 {
        return Err(RingSyncError::config("size must be positive"));
    }
    Ok(value * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> CliArgs {
        CliArgs::parse_from(["ringsync", "/src", "/dst"])
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096").expect("plain"), 4096);
        assert_eq!(parse_size("128K").expect("kib"), 128 * 1024);
        assert_eq!(parse_size("128k").expect("lowercase"), 128 * 1024);
        assert_eq!(parse_size("1M").expect("mib"), 1024 * 1024);
        assert_eq!(parse_size("2GiB").expect("gib"), 2 * 1024 * 1024 * 1024);
        assert!(parse_size("0").is_err());
        assert!(parse_size("12X").is_err());
        assert!(parse_size("chunky").is_err());
    }

    #[test]
    fn test_config_defaults() {
        let cfg = CopyConfig::from_cli(&base_args()).expect("config");
        assert_eq!(cfg.workers, 1);
        assert_eq!(cfg.queue_depth, 64);
        assert_eq!(cfg.chunk_size, None);
        assert!(cfg.use_splice);
        assert!(!cfg.sync_mode);
    }

    #[test]
    fn test_sync_mode_auto_workers() {
        let args = CliArgs::parse_from(["ringsync", "--sync", "/src", "/dst"]);
        let cfg = CopyConfig::from_cli(&args).expect("config");
        assert!(cfg.sync_mode);
        assert_eq!(cfg.workers, num_cpus::get());
    }

    #[test]
    fn test_explicit_options() {
        let args = CliArgs::parse_from([
            "ringsync",
            "-j",
            "4",
            "-c",
            "256K",
            "-q",
            "32",
            "--no-splice",
            "/src",
            "/dst",
        ]);
        let cfg = CopyConfig::from_cli(&args).expect("config");
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.chunk_size, Some(256 * 1024));
        assert_eq!(cfg.queue_depth, 32);
        assert!(!cfg.use_splice);
    }

    #[test]
    fn test_missing_paths_rejected() {
        let args = CliArgs::parse_from(["ringsync"]);
        assert!(CopyConfig::from_cli(&args).is_err());
    }

    #[test]
    fn test_send_subcommand_parses() {
        let args = CliArgs::parse_from([
            "ringsync", "send", "/data", "host:9999", "--secret", "abc123", "--tls",
        ]);
        match args.command {
            Some(Commands::Send {
                ref target,
                ref secret,
                tls,
                uring,
                ..
            }) => {
                assert_eq!(target, "host:9999");
                assert_eq!(secret.as_deref(), Some("abc123"));
                assert!(tls);
                assert!(!uring);
            }
            _ => panic!("expected send subcommand"),
        }
    }

    #[test]
    fn test_recv_subcommand_parses() {
        let args =
            CliArgs::parse_from(["ringsync", "recv", "/backup", "--listen", "9999", "--uring"]);
        match args.command {
            Some(Commands::Recv {
                listen, uring, tls, ..
            }) => {
                assert_eq!(listen, 9999);
                assert!(uring);
                assert!(!tls);
            }
            _ => panic!("expected recv subcommand"),
        }
    }
}

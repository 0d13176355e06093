//! chainrouter CLI — inspect router defaults and run a simulated ledger.
//!
//! Usage:
//! ```bash
//! chainrouter info
//! chainrouter simulate --blocks 50 --txs 3 --ticks 4 --poll-ms 500
//! RUST_LOG=chainrouter_core=debug chainrouter simulate
//! ```

use std::env;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chainrouter_core::{
    handler_fn, Batch, BlockRangeSync, EventRouter, MemoryChain, RouterBuilder, RouterConfig,
    StartParams,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "info" => {
            cmd_info();
            Ok(())
        }
        "simulate" => cmd_simulate(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("chainrouter {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainrouter {}", env!("CARGO_PKG_VERSION"));
    println!("Catch-up then live event routing through a handler pipeline\n");
    println!("USAGE:");
    println!("    chainrouter <COMMAND>\n");
    println!("COMMANDS:");
    println!("    info      Show default router configuration");
    println!("    simulate  Route events from an in-memory ledger");
    println!("    version   Print version");
    println!("    help      Print this help\n");
    println!("SIMULATE FLAGS:");
    println!("    --blocks <N>    Blocks mined before start      [default: 20]");
    println!("    --txs <N>       Transactions per block         [default: 2]");
    println!("    --ticks <N>     Live blocks mined after start  [default: 3]");
    println!("    --poll-ms <N>   Poll interval in milliseconds  [default: 1000]");
    println!("    --batch <N>     Blocks per sync window         [default: 10]");
}

fn cmd_info() {
    let config = RouterConfig::default();
    println!("ChainRouter v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default chain: {}", config.chain);
    println!("  Default poll interval: {} ms", config.poll_interval_ms);
    println!(
        "  Default live watermark policy: {}",
        serde_json::to_string(&config.live_watermark).unwrap_or_default()
    );
    println!("  Phases: catch-up (head at start) → live polling (skip-if-busy)");
}

async fn cmd_simulate(args: &[String]) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let blocks = parse_flag(args, "--blocks", 20)?;
    let txs = parse_flag(args, "--txs", 2)?;
    let ticks = parse_flag(args, "--ticks", 3)?;
    let poll_ms = parse_flag(args, "--poll-ms", 1000)?;
    let batch = parse_flag(args, "--batch", 10)?;
    if blocks == 0 {
        bail!("--blocks must be at least 1");
    }

    let chain = Arc::new(MemoryChain::new());
    for _ in 0..blocks {
        chain.push_block(txs as u32);
    }

    let config = RouterBuilder::new()
        .chain("memory")
        .poll_interval_ms(poll_ms)
        .build_config();
    let sync = BlockRangeSync::new(Arc::clone(&chain), batch)?;
    let router = EventRouter::new(config, chain.factory(), Arc::new(sync));

    let routed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&routed);
    router.register(handler_fn(move |txns: Arc<Batch>, next, _end| {
        counter.fetch_add(txns.len(), Ordering::SeqCst);
        let first = txns.first().map(|t| t.block_number);
        let last = txns.last().map(|t| t.block_number);
        async move {
            tracing::info!(records = txns.len(), ?first, ?last, "Batch routed");
            Ok(next.call())
        }
    }));

    router
        .start(StartParams::from_block(1))
        .await
        .context("catch-up failed")?;
    println!(
        "Caught up: {} records, watermark {}",
        routed.load(Ordering::SeqCst),
        router.watermark()
    );

    for _ in 0..ticks {
        let number = chain.push_block(txs as u32);
        tracing::info!(number, "Mined block");
        tokio::time::sleep(Duration::from_millis(poll_ms + poll_ms / 2)).await;
    }

    router.stop().await;
    println!(
        "Stopped: {} records routed, watermark {}, state {}",
        routed.load(Ordering::SeqCst),
        router.watermark(),
        router.state()
    );
    Ok(())
}

fn parse_flag(args: &[String], flag: &str, default: u64) -> anyhow::Result<u64> {
    match args.iter().position(|a| a == flag) {
        Some(i) => {
            let raw = args
                .get(i + 1)
                .with_context(|| format!("{flag} requires a value"))?;
            raw.parse()
                .with_context(|| format!("invalid value for {flag}: {raw}"))
        }
        None => Ok(default),
    }
}

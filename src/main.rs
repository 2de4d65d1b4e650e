use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use tokio_util::sync::CancellationToken;

use hoptrace::cli::Args;
use hoptrace::config::Config;
use hoptrace::output::{Formatter, PlainFormatter, ReportFormatter};
use hoptrace::trace::Tracer;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let config = Config::try_from(&args).context("invalid configuration")?;

    let continuous = config.continuous();
    let retries = config.retries;
    // Streaming output unless report mode asked for the summary alone
    let streaming = config.realtime || !config.report;

    let tracer = Tracer::new(&args.target, config)
        .with_context(|| format!("cannot trace {}", args.target))?;

    println!(
        "trace route to {} ({}), {} hops max",
        tracer.target_host, tracer.dest_ip, tracer.config.max_ttl
    );

    // SIGINT stops consuming; the producer sees the closed channel on its
    // next send and releases the socket
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        interrupt.cancel();
    });

    if continuous {
        let mut results = tracer.run_continuous()?;
        let mut formatter = ReportFormatter::new(std::io::stdout(), streaming);
        loop {
            tokio::select! {
                hop = results.recv() => match hop {
                    Some(hop) => {
                        let err = hop.err.clone();
                        formatter.hop(&hop);
                        if let Some(err) = err {
                            eprintln!("{err}");
                            break;
                        }
                    }
                    None => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
        formatter.finish();
    } else {
        let mut results = tracer.run(retries)?;
        let mut formatter = PlainFormatter::new(std::io::stdout());
        loop {
            tokio::select! {
                batch = results.recv() => match batch {
                    Some(batch) => {
                        formatter.batch(&batch);
                        if let Some(err) = batch.iter().find_map(|r| r.err.clone()) {
                            eprintln!("{err}");
                            break;
                        }
                    }
                    None => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
        formatter.finish();
    }

    Ok(())
}

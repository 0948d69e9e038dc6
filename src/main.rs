use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::info;

use logtap_exchange::{
    AtomicMetric, Consumer, ExchangeError, Expectation, MessageCondition, MessageExchangeManager,
    MetricCondition, MetricExchangeManager, Producer, ProducerInfo, WorkerPool,
};
use logtap_logs::{AcceptancePolicy, LogSource, MessageIds, Segmenter};
use logtap_types::{DeliveryStatus, Message};

mod config;

use config::{CliOverrides, FileConfig, Settings};

/// Logtap - segment multi-line application logs and wait for entries
#[derive(Parser, Debug)]
#[command(name = "logtap")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log file to read (stdin when omitted)
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// TOML config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Reject entries below this level
    #[arg(long, value_name = "LEVEL")]
    min_level: Option<String>,

    /// Exit once an accepted entry matches this regex
    #[arg(long, value_name = "REGEX")]
    expect: Option<String>,

    /// Exit once N accepted entries at LEVEL or above were seen (LEVEL:N)
    #[arg(long, value_name = "LEVEL:N")]
    expect_count: Option<String>,

    /// Give up waiting on the expectation after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Only log errors
    #[arg(long, short)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let settings = match load_settings(args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(settings).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn load_settings(args: Args) -> Result<Settings> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let cli = CliOverrides {
        input: args.file,
        min_level: args.min_level,
        expect: args.expect,
        expect_count: args.expect_count,
        timeout_secs: args.timeout,
        quiet: args.quiet,
    };
    Settings::resolve(cli, file)
}

/// Prints accepted entries to stdout
#[derive(Default)]
struct Printer {
    stopped: AtomicBool,
}

impl Consumer for Printer {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    fn message_received(
        &self,
        message: &Message,
        status: DeliveryStatus,
        _producer: &ProducerInfo,
    ) -> Result<(), ExchangeError> {
        if self.is_stopped() {
            return Err(ExchangeError::Stopped { what: "printer" });
        }
        if status != DeliveryStatus::Accepted {
            return Ok(());
        }

        let mut out = std::io::stdout().lock();
        for line in message.lines() {
            // Broken pipe: nothing sensible left to do with the output
            if writeln!(out, "{line}").is_err() {
                self.stop();
                return Ok(());
            }
        }

        if let Some(exception) = message.exception() {
            info!(
                entry = %message.id(),
                exception = %exception.type_name,
                root_cause = %exception.root_cause().type_name,
                "entry carries an exception"
            );
        }
        Ok(())
    }
}

/// Waiting side of the run, when an expectation was requested
struct Waiter {
    expectation: Expectation,
    manager: Arc<dyn Consumer>,
}

fn set_up_waiter(settings: &Settings, producer: &Producer) -> Result<Option<Waiter>> {
    let pool = WorkerPool::default();

    if let Some(pattern) = &settings.expect {
        let manager = Arc::new(MessageExchangeManager::for_messages(pool));
        let condition = MessageCondition::with_status(DeliveryStatus::Accepted)
            .and(MessageCondition::matching(pattern.clone()));
        let expectation = manager.set_expectation(condition)?;
        producer.register(manager.clone());
        return Ok(Some(Waiter {
            expectation,
            manager,
        }));
    }

    if let Some(expected) = settings.expect_count {
        let metric = Arc::new(AtomicMetric::counter(
            format!("accepted >= {}", expected.level),
            move |message, status| {
                status == DeliveryStatus::Accepted
                    && message.level().is_some_and(|l| l >= expected.level)
            },
        ));
        let manager = Arc::new(MetricExchangeManager::for_metric(metric.clone(), pool));
        let expectation = manager.set_expectation(MetricCondition::at_least(expected.count))?;
        // Metric first, so the manager evaluates the updated value
        producer.register(metric);
        producer.register(manager.clone());
        return Ok(Some(Waiter {
            expectation,
            manager,
        }));
    }

    Ok(None)
}

async fn open_input(settings: &Settings) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &settings.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    Ok(reader)
}

/// Returns whether the run succeeded (expectation met, or none requested)
async fn run(settings: Settings) -> Result<bool> {
    let name = settings
        .input
        .as_ref()
        .map_or_else(|| "stdin".to_string(), |p| p.display().to_string());
    let producer = Arc::new(Producer::new(&name));
    producer.register(Arc::new(Printer::default()));

    let waiter = set_up_waiter(&settings, &producer)?;
    let policy = settings
        .min_level
        .map_or(AcceptancePolicy::AcceptAll, AcceptancePolicy::MinLevel);
    let reader = open_input(&settings).await?;
    let source = LogSource::spawn(
        reader,
        Segmenter::new(MessageIds::new()),
        Arc::clone(&producer),
        policy,
    );

    let Some(Waiter {
        mut expectation,
        manager,
    }) = waiter
    else {
        let stats = source.join().await;
        info!(?stats, messages = stats.messages(), "input finished");
        return Ok(true);
    };

    let cancel = source.cancel_token();
    let join = source.join();
    tokio::pin!(join);
    let deadline = async {
        match settings.timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let found = tokio::select! {
        found = &mut expectation => found,
        stats = &mut join => {
            info!(?stats, messages = stats.messages(), "input finished before the expectation resolved");
            // Any handoff already completed; stopping only releases an empty wait
            manager.stop();
            (&mut expectation).await
        }
        _ = &mut deadline => {
            info!(timeout = ?settings.timeout, "expectation timed out");
            None
        }
    };

    cancel.cancel();
    manager.stop();
    producer.stop_all();

    match found {
        Some(message) => {
            info!(entry = %message.id(), "expectation met");
            Ok(true)
        }
        None => Ok(false),
    }
}

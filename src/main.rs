// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use stressmonkey::config::{MonkeyConfig, SourceKind};
use stressmonkey::context::RunContext;
use stressmonkey::driver::{Driver, DriverOptions, RunSummary};
use stressmonkey::fault::{FaultMonitor, LogReporter};
use stressmonkey::inject::{DryRunInjector, Interrupt, LogDevice};
use stressmonkey::source::network::{NetworkSource, VarTable, ViewTree};
use stressmonkey::source::random::PermissionCatalog;
use stressmonkey::source::{EventSource, RandomSource, ScriptSource};

#[derive(Parser, Debug)]
#[command(name = "stressmonkey")]
#[command(version)]
#[command(about = "Stress-test event generator: random, scripted or remote-driven", long_about = None)]
struct Args {
    /// Number of events (or cycles with --count-cycles) to run
    count: Option<u64>,

    /// Configuration file path
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Seed for the random generator
    #[arg(short = 's', long)]
    seed: Option<u64>,

    /// Pause after each event, in milliseconds
    #[arg(long)]
    throttle: Option<u64>,

    /// Draw each pause from 1..=throttle
    #[arg(long)]
    randomize_throttle: bool,

    /// Increase narration; repeat for more
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Replay a script file
    #[arg(short = 'f', long)]
    script: Option<PathBuf>,

    /// Serve the line protocol on this loopback port
    #[arg(long)]
    port: Option<u16>,

    /// Category percentage, e.g. --pct touch=40
    #[arg(long = "pct", value_parser = parse_pct)]
    pct: Vec<(String, f32)>,

    /// Count source cycles instead of injected events
    #[arg(long)]
    count_cycles: bool,

    /// Pull events without injecting them
    #[arg(long)]
    dbg_no_events: bool,

    #[arg(long)]
    ignore_crashes: bool,

    #[arg(long)]
    ignore_timeouts: bool,

    #[arg(long)]
    ignore_security_exceptions: bool,

    #[arg(long)]
    kill_process_after_error: bool,

    /// Request bug reports on crashes and hangs
    #[arg(long)]
    bugreport: bool,

    /// Request a bug report every N cycles
    #[arg(long)]
    periodic_bugreport: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Write the default configuration to this path and exit
    #[arg(long)]
    generate_config: Option<PathBuf>,
}

fn parse_pct(value: &str) -> Result<(String, f32), String> {
    let (name, percent) = value
        .split_once('=')
        .ok_or_else(|| format!("expected CATEGORY=PERCENT, got '{}'", value))?;
    let percent = percent
        .parse::<f32>()
        .map_err(|e| format!("bad percentage '{}': {}", percent, e))?;
    Ok((name.to_string(), percent))
}

impl Args {
    fn apply(&self, config: &mut MonkeyConfig) {
        if let Some(count) = self.count {
            config.count = count;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(throttle) = self.throttle {
            config.throttle_ms = throttle;
        }
        config.randomize_throttle |= self.randomize_throttle;
        config.verbosity = config.verbosity.max(self.verbose);
        if self.script.is_some() {
            config.script = self.script.clone();
        }
        if self.port.is_some() {
            config.port = self.port;
        }
        for (name, percent) in &self.pct {
            config.pct.insert(name.clone(), *percent);
        }
        if self.count_cycles {
            config.count_events = false;
        }
        config.dbg_no_events |= self.dbg_no_events;

        let faults = &mut config.faults;
        faults.ignore_crashes |= self.ignore_crashes;
        faults.ignore_timeouts |= self.ignore_timeouts;
        faults.ignore_security_errors |= self.ignore_security_exceptions;
        faults.kill_process_after_error |= self.kill_process_after_error;
        faults.request_bugreport |= self.bugreport;

        if let Some(frequency) = self.periodic_bugreport {
            config.periodic_bugreport = true;
            config.bugreport_frequency = frequency;
        }
    }

    fn level(&self) -> Level {
        match self.log_level.as_deref().map(str::to_lowercase).as_deref() {
            Some("trace") => Level::TRACE,
            Some("debug") => Level::DEBUG,
            Some("info") => Level::INFO,
            Some("warn") => Level::WARN,
            Some("error") => Level::ERROR,
            _ => match self.verbose {
                0 | 1 => Level::INFO,
                2 => Level::DEBUG,
                _ => Level::TRACE,
            },
        }
    }
}

struct RunParts {
    monitor: FaultMonitor,
    context: RunContext,
    interrupt: Interrupt,
    options: DriverOptions,
    verbosity: u8,
}

async fn run_source<S: EventSource>(mut source: S, parts: RunParts) -> Result<RunSummary> {
    source.set_verbosity(parts.verbosity);
    if !source.validate() {
        bail!("Event source failed validation");
    }

    let mut driver = Driver::new(
        source,
        DryRunInjector::new(parts.verbosity),
        LogReporter,
        parts.monitor,
        parts.options,
    )
    .with_context(parts.context)
    .with_interrupt(parts.interrupt);
    Ok(driver.run().await)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    FmtSubscriber::builder()
        .with_max_level(args.level())
        .with_target(false)
        .compact()
        .init();

    if let Some(path) = &args.generate_config {
        MonkeyConfig::default()
            .save_to_file(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Generated default configuration at {}", path.display());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => MonkeyConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => MonkeyConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let seed = config.seed.unwrap_or_else(rand::random);
    info!(":Monkey: seed={} count={}", seed, config.count);

    let interrupt = Interrupt::new();
    let monitor = FaultMonitor::new(config.faults.clone());
    let context = RunContext::new();

    let handler_interrupt = interrupt.clone();
    let handler_monitor = monitor.clone();
    ctrlc::set_handler(move || {
        warn!("Received Ctrl-C, stopping run...");
        handler_interrupt.trigger();
        handler_monitor.request_abort();
    })?;

    let parts = RunParts {
        monitor,
        context: context.clone(),
        interrupt: interrupt.clone(),
        options: DriverOptions::from_config(&config),
        verbosity: config.verbosity,
    };
    let rng = StdRng::seed_from_u64(seed);

    let summary = match config.source_kind() {
        SourceKind::Random => {
            let mut source = RandomSource::new(config.apps.clone(), config.pacing(), rng)
                .with_display(config.display.width, config.display.height)
                .with_keys(config.key_presence()?)
                .with_permissions(PermissionCatalog::new(config.permissions.clone()));
            for (category, percent) in config.factor_overrides()? {
                source.set_factor(category, percent);
            }
            source.generate_activity();
            run_source(source, parts).await?
        }
        SourceKind::Script(path) => {
            let source = ScriptSource::new(path, config.pacing(), rng)
                .with_waits(config.profile_wait_ms, config.device_sleep_ms)
                .with_interrupt(interrupt);
            run_source(source, parts).await?
        }
        SourceKind::Network(port) => {
            let vars = VarTable::new(&config.build, &config.display, context);
            let source =
                NetworkSource::bind(port, Box::new(LogDevice), Box::new(ViewTree::new()), vars)
                    .await
                    .with_context(|| format!("Failed to start protocol server on port {}", port))?;
            info!("Listening for protocol clients on {}", source.local_addr()?);
            run_source(source, parts).await?
        }
    };

    summary.log();
    if summary.system_crashed {
        bail!(
            "** System appears to have crashed at event {} of {}",
            summary.events_injected,
            config.count
        );
    }
    if summary.aborted {
        bail!("** Monkey aborted");
    }
    Ok(())
}

//! Demo daemon: drives the governor over a simulated platform with a
//! synthetic workload so the whole control loop can be watched from a
//! terminal. Real deployments embed [`pulsegov::FreqGovernor`] instead.

use anyhow::{Context, Result};
use clap::Parser;
use pulsegov::{CoreId, FreqGovernor, GovernorConfig, SimulatedPlatform, TickSample};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "pulsegov", about = "per-core frequency governor demo")]
struct Args {
    /// Number of simulated cores; defaults to the host's logical CPU count.
    #[arg(long, default_value_t = num_cpus::get())]
    cores: usize,

    /// TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tick interval in milliseconds.
    #[arg(long, default_value_t = 20)]
    interval_ms: u64,

    /// How long to run, in seconds.
    #[arg(long, default_value_t = 10)]
    duration_s: u64,
}

fn load_config(path: Option<&PathBuf>) -> Result<GovernorConfig> {
    match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p)
                .with_context(|| format!("reading config {}", p.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing config {}", p.display()))
        }
        None => Ok(GovernorConfig::default()),
    }
}

/// Synthetic per-core load: phases of idle, steady work, and I/O-heavy
/// bursts, with enough randomness that cores drift apart.
struct WorkloadSim {
    io_wait_us: u64,
    phase: u32,
}

impl WorkloadSim {
    fn new() -> Self {
        Self { io_wait_us: 0, phase: fastrand::u32(0..3) }
    }

    fn sample(&mut self, now: Instant) -> TickSample {
        if fastrand::u32(0..50) == 0 {
            self.phase = fastrand::u32(0..3);
        }

        let util_pct = match self.phase {
            0 => fastrand::u32(0..8),    // idle
            1 => fastrand::u32(30..70),  // steady
            _ => fastrand::u32(85..100), // busy
        };

        // I/O bursts mostly accompany the busy phase
        if self.phase == 2 && fastrand::u32(0..4) == 0 {
            self.io_wait_us += fastrand::u64(150..400);
        } else {
            self.io_wait_us += fastrand::u64(0..40);
        }

        TickSample { io_wait_us: self.io_wait_us, util_pct, now }
    }
}

/// Crude thermal model: temperature chases a setpoint derived from the
/// core's running frequency.
fn drift_temp(platform: &SimulatedPlatform, core: CoreId, freq_khz: u32) {
    let setpoint = 40 + (freq_khz / 25_000); // 1.45 GHz ~ 98 °C
    let current = platform.temp(core);
    let next = if current < setpoint {
        current + fastrand::u32(0..3)
    } else {
        current.saturating_sub(fastrand::u32(0..3))
    };
    platform.set_temp(core, next);
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = load_config(args.config.as_ref())?;
    let platform = Arc::new(SimulatedPlatform::with_defaults(args.cores.max(1)));
    let governor = FreqGovernor::new(platform.clone(), config)?;
    governor.init_all_cores()?;
    governor.start()?;

    let mut workloads: Vec<WorkloadSim> = (0..args.cores).map(|_| WorkloadSim::new()).collect();
    let interval = Duration::from_millis(args.interval_ms.max(1));
    let deadline = Instant::now() + Duration::from_secs(args.duration_s);
    let mut last_report = Instant::now();

    while Instant::now() < deadline {
        let now = Instant::now();

        for (i, workload) in workloads.iter_mut().enumerate() {
            let core = CoreId(i);
            let sample = workload.sample(now);
            match governor.on_tick(core, sample) {
                Ok(freq_khz) => drift_temp(&platform, core, freq_khz),
                Err(e) => log::warn!("core {}: tick failed: {}", core, e),
            }
        }

        if now.duration_since(last_report) >= Duration::from_secs(1) {
            last_report = now;
            for id in governor.core_ids() {
                if let Ok(s) = governor.core_status(id) {
                    log::info!(
                        "core {}: {:>7} kHz p{} {} {:>2} °C epp={:#04x}{} transitions={} io_boosts={} thermal_events={}",
                        s.core,
                        s.freq_khz,
                        s.hw_pstate,
                        s.thermal_state,
                        s.temp_c,
                        s.dynamic_epp,
                        if s.io_boost_active { " io-boost" } else { "" },
                        s.stats.transitions,
                        s.stats.io_boosts,
                        s.stats.thermal_events,
                    );
                }
            }
        }

        std::thread::sleep(interval);
    }

    governor.shutdown();
    Ok(())
}

use std::{
    os::unix::process::CommandExt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::{bail, Context, Error};
use log::{error, info};
use pool_controller::{
    config::Config,
    controller::{Flow, PoolController},
    logging,
    platform::{host, sim::SimBoard},
};

/// Pause between loop passes
const LOOP_PERIOD: Duration = Duration::from_millis(10);
/// Grace before re-executing, so log lines and broker packets get out
const RESTART_DELAY: Duration = Duration::from_secs(2);

struct Args {
    config: String,
    simulate: bool,
}

impl Args {
    fn parse() -> Result<Self, Error> {
        let mut args = Args {
            config: "config.ron".to_string(),
            simulate: false,
        };
        let mut positional = false;

        for arg in std::env::args().skip(1) {
            match arg.as_str() {
                "--simulate" => args.simulate = true,
                flag if flag.starts_with('-') => bail!("unknown flag {}", flag),
                path if !positional => {
                    args.config = path.to_string();
                    positional = true;
                }
                extra => bail!("unexpected argument {}", extra),
            }
        }

        Ok(args)
    }
}

enum Exit {
    Shutdown,
    Restart,
}

fn run(config: Config, simulate: bool, stop: Arc<AtomicBool>) -> Result<Exit, Error> {
    let platform = if simulate {
        info!("Running against the simulated board");
        let mut platform = SimBoard::demo().platform();
        platform.clock = Box::new(host::SystemClock::new());
        platform
    } else {
        host::platform(&config)?
    };

    let mut controller = PoolController::new(platform, &config);

    let mut flow = controller.boot();
    while flow == Flow::Continue {
        if stop.load(Ordering::Relaxed) {
            controller.shutdown();
            return Ok(Exit::Shutdown);
        }
        flow = controller.poll();
        thread::sleep(LOOP_PERIOD);
    }

    controller.shutdown();
    Ok(Exit::Restart)
}

fn restart() -> Error {
    info!("Restarting in {}s", RESTART_DELAY.as_secs());
    thread::sleep(RESTART_DELAY);

    match std::env::current_exe() {
        // Only returns on failure
        Ok(exe) => std::process::Command::new(exe)
            .args(std::env::args_os().skip(1))
            .exec()
            .into(),
        Err(e) => e.into(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse()?;
    let config = if args.simulate && !std::path::Path::new(&args.config).exists() {
        Config::default()
    } else {
        Config::load(&args.config).context("loading config")?
    };

    logging::init(&config.log_level);
    info!(
        "pool-controller {} starting as {}",
        env!("CARGO_PKG_VERSION"),
        config.device.id
    );

    let stop = Arc::new(AtomicBool::new(false));
    let mut control = tokio::task::spawn_blocking({
        let stop = stop.clone();
        move || run(config, args.simulate, stop)
    });

    let outcome = tokio::select! {
        outcome = &mut control => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            stop.store(true, Ordering::Relaxed);
            control.await
        }
    };

    match outcome.context("control loop panicked")? {
        Ok(Exit::Shutdown) => Ok(()),
        Ok(Exit::Restart) => Err(restart()),
        Err(e) => {
            error!("Control loop failed: {:#}", e);
            Err(e)
        }
    }
}

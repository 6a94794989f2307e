use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use linux_embedded_hal::{Delay, I2cdev};
use log::{error, info, warn};

use bme680_monitor::cli::Args;
use bme680_monitor::device::{Bme680, Ready};
use bme680_monitor::output::{Report, Sink, Template};
use bme680_monitor::session::Session;
use bme680_monitor::settings::Channel;
use bme680_monitor::transport::I2cTransport;
use bme680_monitor::MonotonicClock;

type Monitor = Session<Bme680<I2cTransport<I2cdev>, Delay, Ready>, Delay, MonotonicClock>;

/// Granularity of the shutdown check while waiting between measurements.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    let args = Args::parse();

    Builder::new()
        .filter_level(args.log_level())
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "{} - {}", record.level(), record.args()))
        .init();

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("failed to install signal handler")?;

    let template = match args.format.as_deref() {
        Some(format) => Template::parse(format).unwrap_or_else(|e| {
            warn!("output format {:?}: {}, using the default line", format, e);
            Template::default()
        }),
        None => Template::default(),
    };
    let sink = Sink::new(!args.no_color, args.write.clone());

    let bus = I2cdev::new(&args.bus)
        .with_context(|| format!("failed to open {}", args.bus.display()))?;
    let transport = I2cTransport::new(bus, args.address);
    let device = Bme680::new(transport, Delay)
        .init()
        .context("failed to initialise the BME680")?;
    info!("BME680 ready at {:#04x}", args.address as u8);

    let mut session = Session::new(device, Delay, MonotonicClock::new());
    configure(&mut session, &args)?;

    let result = run(&mut session, &args, &template, &sink, &shutdown);

    info!("resetting sensor");
    if let Err(e) = session.reset() {
        error!("{}", e);
    }
    result
}

fn configure(session: &mut Monitor, args: &Args) -> Result<()> {
    session
        .set_oversampling(Channel::Temperature, args.temp_oversampling)
        .with_context(|| format!("invalid temperature oversampling {}", args.temp_oversampling))?;
    session
        .set_oversampling(Channel::Humidity, args.hum_oversampling)
        .with_context(|| format!("invalid humidity oversampling {}", args.hum_oversampling))?;
    session
        .set_oversampling(Channel::Pressure, args.pres_oversampling)
        .with_context(|| format!("invalid pressure oversampling {}", args.pres_oversampling))?;
    session
        .set_filter(args.filter)
        .with_context(|| format!("invalid filter size {}", args.filter))?;
    session.set_heater(args.heater_temp, args.heater_time);

    info!("settings: {:?}", session.settings());
    Ok(())
}

fn run(
    session: &mut Monitor,
    args: &Args,
    template: &Template,
    sink: &Sink,
    shutdown: &AtomicBool,
) -> Result<()> {
    let mut remaining = args.loop_count;
    info!("starting main loop");

    loop {
        if shutdown.load(Ordering::SeqCst) {
            info!("shutdown requested");
            return Ok(());
        }

        let reading = session.fetch_result().context("measurement failed")?;

        if !session.last_sample_fresh() {
            warn!("no new sample, skipping output");
        } else if session.enabled().gas && reading.gas_resistance == 0 {
            warn!("no valid gas resistance, skipping output");
        } else {
            let report = Report::new(&reading, args.sea_level);
            sink.emit(&template.render(&report))
                .context("failed to write output")?;
        }

        if args.loop_count > 0 {
            remaining -= 1;
            if remaining == 0 {
                return Ok(());
            }
        }

        info!("waiting {} seconds", args.delay);
        if !sleep_unless_shutdown(Duration::from_secs(args.delay), shutdown) {
            info!("shutdown requested");
            return Ok(());
        }
    }
}

/// Sleeps for `duration`, returning `false` early if `shutdown` gets set.
fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

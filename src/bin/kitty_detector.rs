//! kitty_detector - PIR motion to camera capture, S3 upload and AWS IoT alert.
//!
//! Each motion event on the PIR line takes one photo, uploads it publicly
//! readable to S3 and announces it on the `kitty-detection` topic. Without a
//! working camera the bridge still announces bare motion events.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use kitty_detector::capture::{CaptureDevice, RaspistillCamera};
use kitty_detector::config::BridgeConfig;
use kitty_detector::sensor::GpioMotionSensor;
use kitty_detector::storage::{AwsCredentials, S3Client};
use kitty_detector::transport::{MqttChannel, TlsMaterials};
use kitty_detector::{DetectionWorkflow, Signal, Supervisor, SystemClock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Photograph motion on a PIR sensor and announce it over AWS IoT"
)]
struct Args {
    /// Path to the JSON config file.
    #[arg(long, env = "KITTY_CONFIG")]
    config: Option<PathBuf>,

    /// Publish motion-only events even if a camera is available.
    #[arg(long)]
    no_camera: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = BridgeConfig::load_from(args.config.as_deref())?;

    let tls = TlsMaterials::load(&cfg.mqtt.ca_path, &cfg.mqtt.cert_path, &cfg.mqtt.key_path)
        .context("failed to load AWS IoT device certificates")?;
    let channel = MqttChannel::connect(&cfg.mqtt_settings()?, &tls)?;

    let credentials = AwsCredentials::from_env().context("S3 credentials unavailable")?;
    let store = S3Client::new(cfg.s3_settings(), credentials)?;
    log::info!(
        "Uploading captures to bucket {} on {}",
        cfg.storage.bucket,
        store.host()
    );

    let (tx, rx) = mpsc::channel();

    let camera_settings = cfg.camera_settings();
    let camera: Option<Box<dyn CaptureDevice>> = if args.no_camera || !cfg.camera.enabled {
        log::info!("Camera disabled; publishing motion-only events");
        None
    } else if RaspistillCamera::probe(&camera_settings) {
        std::fs::create_dir_all(&camera_settings.output_dir).with_context(|| {
            format!(
                "failed to create capture directory {}",
                camera_settings.output_dir.display()
            )
        })?;
        Some(Box::new(RaspistillCamera::new(camera_settings, tx.clone())))
    } else {
        log::warn!(
            "Camera command '{}' not found; publishing motion-only events",
            camera_settings.command
        );
        None
    };

    let sensor = GpioMotionSensor::open(cfg.gpio_settings())
        .with_context(|| format!("failed to open PIR sensor on GPIO {}", cfg.sensor.gpio_pin))?;
    let sensor_stop = Arc::new(AtomicBool::new(false));
    let sensor_handle = sensor.spawn(tx.clone(), Arc::clone(&sensor_stop));

    let shutdown_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(Signal::Shutdown);
    })
    .context("error setting Ctrl-C handler")?;

    let workflow = DetectionWorkflow::new(
        cfg.workflow_settings(),
        camera,
        Arc::new(store),
        Box::new(channel),
        Arc::new(SystemClock),
        tx,
    );
    let outcome = Supervisor::new(workflow, rx).run();

    sensor_stop.store(true, Ordering::SeqCst);
    if sensor_handle.join().is_err() {
        log::warn!("PIR sensor thread panicked");
    }

    let summary = outcome.map_err(|e| anyhow!("detection stopped: {}", e))?;
    log::info!(
        "Handled {} motion event(s), published {}, aborted {}, recovered from {} error(s)",
        summary.stats.motions_handled,
        summary.stats.published,
        summary.stats.aborted,
        summary.recovered_errors
    );
    Ok(())
}

//! waste-sorter - photograph an item of waste and print how to dispose of it
//!
//! Commands:
//! - `camera`: take one still from the configured camera and classify it
//! - `file <PATH>`: classify an image file
//! - `table`: print the disposal lookup table in use

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use waste_sorter::capture::{CameraBackend, CaptureError, SyntheticCamera, SyntheticConfig};
use waste_sorter::config::SorterConfig;
use waste_sorter::{HttpClassifier, HttpResultSink, Workflow};

#[path = "../ui.rs"]
mod ui;

const WARM_UP_ATTEMPTS: u32 = 30;
const WARM_UP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE", global = true)]
    ui: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture one still from the camera and classify it.
    Camera,
    /// Classify an image file.
    File {
        /// Image to classify.
        path: PathBuf,
    },
    /// Print the disposal lookup table.
    Table,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());
    let cfg = SorterConfig::load()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args.command, cfg, ui))
}

async fn run(command: Command, cfg: SorterConfig, ui: ui::Ui) -> Result<()> {
    match command {
        Command::Table => print_table(&cfg),
        Command::File { path } => {
            let mut workflow = build_workflow(&cfg, open_camera(&cfg)?)?;
            let result = classify_file(&mut workflow, &path, &ui).await;
            workflow.reset();
            result
        }
        Command::Camera => {
            if cfg.camera.device.starts_with("stub://") {
                let mut workflow = build_workflow(&cfg, open_camera(&cfg)?)?;
                let result = classify_from_camera(&mut workflow, &ui).await;
                workflow.reset();
                result
            } else {
                run_device_camera(&cfg, &ui).await
            }
        }
    }
}

#[cfg(feature = "camera-v4l2")]
async fn run_device_camera(cfg: &SorterConfig, ui: &ui::Ui) -> Result<()> {
    use waste_sorter::capture::{V4l2Camera, V4l2Config};

    let camera = V4l2Camera::new(V4l2Config {
        device: cfg.camera.device.clone(),
        width: cfg.camera.width,
        height: cfg.camera.height,
    });
    let mut workflow = build_workflow(cfg, camera)?;
    let result = classify_from_camera(&mut workflow, ui).await;
    workflow.reset();
    result
}

#[cfg(not(feature = "camera-v4l2"))]
async fn run_device_camera(cfg: &SorterConfig, _ui: &ui::Ui) -> Result<()> {
    Err(anyhow!(
        "camera {} requires the camera-v4l2 feature (or use a stub:// device)",
        cfg.camera.device
    ))
}

fn open_camera(cfg: &SorterConfig) -> Result<SyntheticCamera> {
    let device = if cfg.camera.device.starts_with("stub://") {
        cfg.camera.device.clone()
    } else {
        // File classification never touches the camera.
        "stub://unused".to_string()
    };
    SyntheticCamera::new(SyntheticConfig {
        device,
        width: cfg.camera.width,
        height: cfg.camera.height,
        ..SyntheticConfig::default()
    })
}

fn build_workflow<B: CameraBackend>(cfg: &SorterConfig, camera: B) -> Result<Workflow<B>> {
    let table = cfg.disposal_table()?;
    let classifier = HttpClassifier::new(&cfg.classifier_url()?, cfg.request_timeout)?;
    let sink = HttpResultSink::new(&cfg.persistence_url()?, cfg.request_timeout)?;
    log::info!(
        "classifier {} / persistence {} / {} table entries",
        classifier.endpoint(),
        sink.endpoint(),
        table.len()
    );
    Ok(Workflow::new(
        camera,
        cfg.camera.facing,
        table,
        Arc::new(classifier),
        Arc::new(sink),
    ))
}

async fn classify_from_camera<B: CameraBackend>(
    workflow: &mut Workflow<B>,
    ui: &ui::Ui,
) -> Result<()> {
    {
        let _stage = ui.stage("Waiting for camera");
        if let Err(err) = workflow.request_camera().await {
            return Err(describe(err));
        }
    }

    let mut attempts = 0;
    loop {
        match workflow.capture_frame() {
            Ok(id) => {
                log::debug!("camera still submitted as {}", id);
                break;
            }
            Err(CaptureError::NoActiveStream) if attempts < WARM_UP_ATTEMPTS => {
                attempts += 1;
                tokio::time::sleep(WARM_UP_INTERVAL).await;
            }
            Err(err) => return Err(describe(err)),
        }
    }
    finish(workflow, ui).await
}

async fn classify_file<B: CameraBackend>(
    workflow: &mut Workflow<B>,
    path: &std::path::Path,
    ui: &ui::Ui,
) -> Result<()> {
    workflow.select_file(Some(path)).map_err(describe)?;
    finish(workflow, ui).await
}

async fn finish<B: CameraBackend>(workflow: &mut Workflow<B>, ui: &ui::Ui) -> Result<()> {
    let result = {
        let _stage = ui.stage("Analyzing");
        workflow.settle().await.cloned()
    };
    let result = result.ok_or_else(|| anyhow!("classification ended without a result"))?;
    ui.show_result(&result);
    workflow.flush_reports().await;
    Ok(())
}

fn describe(err: CaptureError) -> anyhow::Error {
    match err {
        CaptureError::Camera(reason) => anyhow!("{} ({})", reason.user_message(), reason),
        other => anyhow!(other),
    }
}

fn print_table(cfg: &SorterConfig) -> Result<()> {
    let table = cfg.disposal_table()?;
    for class_id in table.class_ids() {
        println!("class {}:\n{}\n", class_id, table.result_for(class_id));
    }
    println!("unrecognized:\n{}", table.unrecognized());
    Ok(())
}

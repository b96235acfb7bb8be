// Drives one recording end to end against the in-process collaborators.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use geocam_lib::capture::{CameraDescriptor, UsbDescriptor};
use geocam_lib::testing::{MockCamera, MockPositionProvider, MockUploadPipeline, MockUsbBus};
use geocam_lib::{init_tracing, Collaborators, RecorderConfig, RecordingCoordinator, StopOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let workdir = tempfile::tempdir().context("failed to create working directory")?;
    let mut config = RecorderConfig::from_env().context("failed to load configuration")?;
    if config.journal_dir.is_none() {
        config.journal_dir = Some(workdir.path().join("journal"));
    }

    let camera = Arc::new(MockCamera::new().with_output_dir(workdir.path()));
    camera.set_devices(vec![CameraDescriptor {
        id: "builtin-0".into(),
        name: "FaceTime HD Camera".into(),
    }]);
    let usb = Arc::new(MockUsbBus::new());
    usb.set_devices(vec![UsbDescriptor {
        device_id: "1".into(),
        class_code: geocam_lib::capture::USB_CLASS_IMAGING,
        product_name: Some("Dash Cam".into()),
        vendor_id: 0x1234,
        product_id: 0x0001,
    }]);
    let positions = Arc::new(MockPositionProvider::new());
    for step in 0..3 {
        let offset = f64::from(step) * 0.0001;
        positions.push_fix(52.5200 + offset, 13.4050 + offset, Some(5.0));
    }

    let coordinator = RecordingCoordinator::new(
        &config,
        Collaborators {
            camera,
            usb,
            positions,
            uploader: Arc::new(MockUploadPipeline::new()),
        },
    );

    let report = coordinator.registry().scan().await?;
    for device in &report.devices {
        println!("found {} ({})", device.display_name, device.id);
    }
    let device = report.devices.first().context("no capture devices found")?;
    coordinator.registry().select(&device.id)?;

    let session_id = coordinator.start().await?;
    println!("recording session {session_id}");
    tokio::time::sleep(Duration::from_millis(3500)).await;

    match coordinator.stop().await? {
        StopOutcome::Finished {
            artifact,
            fix_count,
            upload,
            ..
        } => {
            println!(
                "recorded {}s to {} with {} GPS fixes",
                artifact.duration_seconds(),
                artifact.path.display(),
                fix_count
            );
            println!("{}", serde_json::to_string_pretty(&upload)?);
        }
        StopOutcome::NothingToStop => println!("nothing was recording"),
    }

    Ok(())
}

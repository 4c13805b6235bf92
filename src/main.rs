use anyhow::Context;
use clap::{Parser, ValueEnum};
use screen_composer_lib::capture::synthetic::{
    FixedPermissions, MemoryEncoder, StaticDevices, TestPatternDevices, TestPatternScreens,
};
use screen_composer_lib::capture::CaptureError;
use screen_composer_lib::compose::CameraPosition;
use screen_composer_lib::config::{RecorderSettings, SETTINGS_FILE};
use screen_composer_lib::device::{probe_permissions, DeviceCatalog, DeviceClass, DeviceCoordinator};
use screen_composer_lib::recorder::{
    RecorderDeps, RecordingController, RecordingOutcome, SessionEvent,
};
use screen_composer_lib::utils::{AppError, ErrorResponse, Notifier};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "screen-composer")]
#[command(about = "Record a test-pattern screen with a camera overlay")]
#[command(long_about = None)]
struct Cli {
    /// Settings file (created with defaults when missing)
    #[arg(short, long, value_name = "PATH", default_value = SETTINGS_FILE)]
    settings: PathBuf,

    /// Capture source ID (defaults to the first source)
    #[arg(short = 'S', long, value_name = "ID")]
    source: Option<String>,

    /// Recording length in seconds
    #[arg(short, long, default_value_t = 3)]
    duration: u64,

    /// Move the camera to this corner halfway through
    #[arg(short, long, value_name = "CORNER")]
    move_to: Option<Corner>,

    /// Enable the camera overlay
    #[arg(long)]
    camera: bool,

    /// Record microphone audio
    #[arg(long)]
    microphone: bool,

    /// List capture sources and exit
    #[arg(long)]
    list_sources: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl From<Corner> for CameraPosition {
    fn from(corner: Corner) -> Self {
        match corner {
            Corner::TopLeft => CameraPosition::TopLeft,
            Corner::TopRight => CameraPosition::TopRight,
            Corner::BottomLeft => CameraPosition::BottomLeft,
            Corner::BottomRight => CameraPosition::BottomRight,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    screen_composer_lib::init_tracing();
    let cli = Cli::parse();
    tracing::info!("Starting Screen Composer v{}", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(Some(outcome)) => {
            let json = serde_json::to_string_pretty(&outcome).context("Failed to serialize recording outcome")?;
            println!("{}", json);
            tracing::info!(
                "Recorded {} chunks ({} bytes)",
                outcome.recording.chunks.len(),
                outcome.recording.total_bytes()
            );
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            let response = ErrorResponse::from(e);
            println!("{}", serde_json::to_string_pretty(&response)?);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<Option<RecordingOutcome>, AppError> {
    let mut settings = RecorderSettings::load(&cli.settings)?;
    settings.camera.enabled |= cli.camera;
    settings.microphone.enabled |= cli.microphone;

    let notifier = Notifier::new()
        .with_success(|m| tracing::info!("[success] {}", m))
        .with_error(|m| tracing::error!("[error] {}", m))
        .with_warning(|m| tracing::warn!("[warning] {}", m))
        .with_info(|m| tracing::info!("[info] {}", m));

    let screens = Arc::new(TestPatternScreens::new());
    let permissions = Arc::new(FixedPermissions::granted());
    let catalog = DeviceCatalog::new(Arc::new(StaticDevices::demo()));

    probe_permissions(permissions.as_ref(), settings.timing.permission_probe_gap()).await;

    let devices = Arc::new(DeviceCoordinator::from_settings(
        Arc::new(TestPatternDevices::new()),
        notifier.clone(),
        &settings,
    ));
    for class in DeviceClass::ALL {
        let manager = devices.manager(class);
        if let Some(selected) = catalog.refresh_selection(manager).await? {
            let label = catalog
                .devices(class.kind())
                .into_iter()
                .find(|d| d.device_id == selected)
                .map(|d| d.label)
                .unwrap_or_default();
            tracing::info!("Using {} {} ({})", class, label, selected);
            match class {
                DeviceClass::Camera => settings.camera.device_id = Some(selected),
                DeviceClass::Microphone => settings.microphone.device_id = Some(selected),
            }
        }
    }
    let _polling = devices.start_polling();
    devices.auto_initialize().await;

    let controller = Arc::new(RecordingController::new(
        RecorderDeps {
            capture: screens,
            permissions,
            encoder: Arc::new(MemoryEncoder::new()),
            devices,
            notifier,
        },
        settings.clone(),
    ));
    let _watch = controller.watch_devices();

    let sources = controller.list_sources().await?;
    if cli.list_sources {
        for source in &sources {
            println!("{}\t{}", source.id, source.name);
        }
        return Ok(None);
    }

    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let SessionEvent::Error(message) = &event {
                tracing::error!("Session error: {}", message);
            } else {
                tracing::debug!("Session event: {:?}", event);
            }
        }
    });

    let source_id = match cli.source {
        Some(id) => id,
        None => sources
            .first()
            .map(|s| s.id.clone())
            .ok_or_else(|| CaptureError::SourceUnavailable("no capture sources".to_string()))?,
    };

    controller.select_source(&source_id).await?;
    controller.start_recording().await?;

    let total = Duration::from_secs(cli.duration.max(1));
    if let Some(corner) = cli.move_to {
        tokio::time::sleep(total / 2).await;
        let config = controller.composition_config().with_position(corner.into());
        controller.update_composition(config).await?;
        settings.composition = config;
        tokio::time::sleep(total - total / 2).await;
    } else {
        tokio::time::sleep(total).await;
    }

    let outcome = controller.stop_recording().await?;
    settings.save(&cli.settings)?;
    Ok(Some(outcome))
}

//! cam-diag command-line tool.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use cam_diag::classifier::{preferred_camera, CameraDescriptor, Classifier};
use cam_diag::config::{EngineConfig, ProbeTimings, Resolution};
use cam_diag::logging::{self, LogFormat};
use cam_diag::mock::{SimulatedBackend, SimulatedCamera};
use cam_diag::ports::{CommandProcessInfo, DirectoryImageSink, ImageEncoding, ProcessInfo, ReportSink};
use cam_diag::report::{ConsoleReport, JsonReport};
use cam_diag::survey::{log_survey, survey_properties};
use cam_diag::{CameraBackend, CameraDevice, Error, ProbeKind, ProbeSession, Result, V4L2Backend};

#[derive(Debug, Parser)]
#[command(name = "cam-diag", version, about = "Empirical capability diagnostics for USB camera modules")]
struct Cli {
    /// TOML configuration file layered over the defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Drive built-in simulated cameras instead of V4L2 devices.
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Enumerate and classify attached cameras.
    Scan,
    /// Run capability probes against one camera.
    Run(RunArgs),
    /// Report which control properties accept writes.
    Properties {
        /// Camera index; defaults to the preferred camera.
        #[arg(long)]
        index: Option<u32>,
    },
    /// List the available probes.
    Probes,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Camera index; defaults to the first USB camera found.
    #[arg(long)]
    index: Option<u32>,

    /// Probe to run, by name or slug. Repeatable; all probes when omitted.
    #[arg(long = "probe", value_name = "PROBE")]
    probes: Vec<String>,

    /// Write a JSON report to this file.
    #[arg(long)]
    json: Option<PathBuf>,

    /// Directory for the test image.
    #[arg(long, default_value = "captures")]
    image_dir: PathBuf,

    /// Save the test image as JPEG instead of PNG.
    #[arg(long)]
    jpeg: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = logging::init(&cli.log_level, cli.log_format) {
        eprintln!("Error: {err}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "cam-diag failed");
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if cli.simulate {
        config.probes.timings = ProbeTimings::immediate();
        execute(&cli.command, config, &simulated_bench())
    } else {
        execute(&cli.command, config, &V4L2Backend)
    }
}

/// A laptop with a built-in 720p camera at index 0 and a USB module at 1.
fn simulated_bench() -> SimulatedBackend {
    let builtin = SimulatedCamera::new()
        .with_supported_resolutions(vec![Resolution::new(1280, 720)])
        .with_resolution(1280, 720);
    SimulatedBackend::new()
        .with_camera(0, builtin)
        .with_camera(1, SimulatedCamera::new())
}

fn execute<B>(command: &Command, config: EngineConfig, backend: &B) -> Result<ExitCode>
where
    B: CameraBackend,
    B::Device: Send + 'static,
{
    let classifier = Classifier::new(config.classifier.clone());
    let listing = CommandProcessInfo::usb_listing().with_timeout(config.probes.timings.process_info_timeout());

    match command {
        Command::Probes => {
            for kind in ProbeKind::ALL {
                println!("{:<16} {}", kind.slug(), kind.name());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Scan => {
            let cameras = scan(&classifier, backend, &listing);
            if cameras.is_empty() {
                println!("No cameras found");
            }
            for camera in &cameras {
                println!("{camera} @ {:.1} FPS", camera.reported_fps());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Properties { index } => {
            let (label, mut device) = open_camera(&classifier, backend, &listing, *index)?;
            let settle = Duration::from_millis(config.probes.timings.property_settle_ms);
            let reports = survey_properties(&mut device, settle);
            device.close();
            log_survey(&reports);

            println!("Camera: {label}");
            println!("{:<26} {:>10} {:>10} Writable", "Property", "Value", "Readback");
            for report in &reports {
                println!(
                    "{:<26} {:>10} {:>10} {}",
                    report.property.to_string(),
                    report.value.map_or_else(|| "-".to_owned(), |v| format!("{v:.2}")),
                    report.readback.map_or_else(|| "-".to_owned(), |v| format!("{v:.2}")),
                    if report.writable { "yes" } else { "no" }
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(args) => run_probes(&classifier, backend, listing, config, args),
    }
}

fn scan<B: CameraBackend>(classifier: &Classifier, backend: &B, listing: &CommandProcessInfo) -> Vec<CameraDescriptor> {
    let cameras = classifier.enumerate(backend, classifier.config().max_index);
    let evidence = classifier.usb_evidence(listing);
    for line in &evidence {
        info!(line = line.as_str(), "USB video evidence");
    }
    cameras
}

fn open_camera<B: CameraBackend>(
    classifier: &Classifier,
    backend: &B,
    listing: &CommandProcessInfo,
    index: Option<u32>,
) -> Result<(String, B::Device)> {
    if let Some(index) = index {
        let device = backend.open(index)?;
        return Ok((format!("Index {index}"), device));
    }

    let cameras = scan(classifier, backend, listing);
    let Some(camera) = preferred_camera(&cameras) else {
        return Err(Error::NoCameraFound);
    };
    info!(camera = %camera, "selected camera");
    let device = backend.open(camera.index())?;
    Ok((camera.to_string(), device))
}

fn run_probes<B>(
    classifier: &Classifier,
    backend: &B,
    listing: CommandProcessInfo,
    config: EngineConfig,
    args: &RunArgs,
) -> Result<ExitCode>
where
    B: CameraBackend,
    B::Device: Send + 'static,
{
    let (label, device) = open_camera(classifier, backend, &listing, args.index)?;
    let process_info: Arc<dyn ProcessInfo> = Arc::new(listing);
    let encoding = if args.jpeg { ImageEncoding::Jpeg } else { ImageEncoding::Png };
    let sink = DirectoryImageSink::new(&args.image_dir).with_encoding(encoding);
    let session = ProbeSession::new(device, config)
        .with_image_sink(Arc::new(sink))
        .with_process_info(process_info);

    session.on_probe_completed(|result| {
        eprintln!("[{}] {}: {}", result.status(), result.probe(), result.message());
    });

    let handle = if args.probes.is_empty() {
        session.start_probes(ProbeKind::ALL.to_vec())?
    } else {
        session.start_run(args.probes.as_slice())?
    };
    let summary = handle.wait()?;
    if let Err(err) = session.with_device(|camera| camera.close()) {
        warn!(error = %err, "camera not closed");
    }

    ConsoleReport::new(io::stdout().lock()).publish(&label, &summary)?;
    if let Some(path) = &args.json {
        JsonReport::new(path).publish(&label, &summary)?;
    }

    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

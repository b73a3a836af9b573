//! Streams a virtual camera into a host memory surface
//!
//! Usage: `cargo run --example loopback [config.json]`
//!
//! Set RUST_LOG to control the log level, e.g. RUST_LOG=surfcam=debug

#[cfg(target_os = "linux")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use surfcam::device::{InputInfo, VirtualDevice};
    use surfcam::surface::HostSurfaceProvider;
    use surfcam::{CaptureAttributes, Config, FourCC, InputId, Resolution, SessionRegistry};

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let device = Arc::new(VirtualDevice::new(vec![InputInfo {
        id: InputId(0),
        formats: vec![FourCC::UYVY],
        resolution: Resolution::new(1280, 720),
        fps: 30.0,
    }]));
    let surfaces = Arc::new(HostSurfaceProvider::new(vec![Resolution::new(1920, 1080)]));
    let registry = SessionRegistry::new(device.clone(), surfaces, &*device, &config)?;

    let mut handles = registry.create_configured(&config)?;
    if handles.is_empty() {
        let handle = registry.create_session(
            &Default::default(),
            CaptureAttributes::new("loopback", InputId(0)),
        )?;
        registry.start(handle)?;
        handles.push(handle);
    }

    let frames = 30;
    let started = Instant::now();
    for _ in 0..frames {
        for &handle in &handles {
            // a full queue just skips this tick
            let _ = device.capture(handle);
        }
        thread::sleep(Duration::from_millis(33));
    }

    for &handle in &handles {
        if let Some(session) = registry.session(handle) {
            println!(
                "{}: {} frames presented in {:?}",
                session.name(),
                session.frames_delivered(),
                started.elapsed()
            );
        }
        registry.stop(handle)?;
    }
    registry.shutdown();
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("the loopback demo needs host memory surfaces, which are only available on Linux");
}

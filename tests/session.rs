mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{attrs, input, no_sink, wait_until, Fixture, RecordingSurface, FRAME_TIMEOUT};
use surfcam::device::VirtualDevice;
use surfcam::error::{BindError, CommandError, SetupError};
use surfcam::event::InputSignal;
use surfcam::surface::Surface;
use surfcam::{CaptureSession, Command, InputId, Resolution, State};

fn standalone(buffer_count: u32) -> (Arc<VirtualDevice>, Arc<RecordingSurface>, CaptureSession) {
    common::init_tracing();
    let device = Arc::new(VirtualDevice::new(vec![input(0)]));
    let surface = RecordingSurface::new();
    let session = CaptureSession::new(
        attrs("cam0", 0, buffer_count),
        device.clone(),
        surface.clone(),
        FRAME_TIMEOUT,
    );
    (device, surface, session)
}

#[test]
fn commands_before_open_are_rejected() {
    let (_device, surface, session) = standalone(4);

    assert!(matches!(session.start(), Err(CommandError::NotOpen)));
    assert!(matches!(session.stop(), Err(CommandError::NotOpen)));
    assert_eq!(session.state(), State::Init);
    assert!(!session.has_worker());
    assert!(surface.visibility().is_empty());
}

#[test]
fn open_registers_buffers_and_sink() {
    let (device, surface, session) = standalone(4);
    let buffers = surface
        .allocate_buffers(5, Resolution::new(640, 480))
        .unwrap();

    let handle = session.open(&buffers, no_sink()).unwrap();
    assert_eq!(session.state(), State::Open);
    assert_eq!(session.handle(), Some(handle));
    assert!(device.is_open(handle));

    let registered = device.buffers(handle).unwrap();
    assert_eq!(registered.len(), 4);
    for (desc, buf) in registered.iter().zip(&buffers) {
        assert_eq!(desc.handle, buf.handle);
        assert_eq!(desc.size, 1280 * 480);
    }
}

#[test]
fn second_open_is_rejected() {
    let (device, surface, session) = standalone(4);
    let buffers = surface
        .allocate_buffers(5, Resolution::new(640, 480))
        .unwrap();

    let handle = session.open(&buffers, no_sink()).unwrap();
    assert!(matches!(
        session.open(&buffers, no_sink()),
        Err(SetupError::AlreadyOpen)
    ));
    assert_eq!(device.handle_of(InputId(0)), Some(handle));
    assert_eq!(session.state(), State::Open);
}

#[test]
fn failed_open_leaves_nothing_behind() {
    let (device, surface, session) = standalone(4);
    let buffers = surface
        .allocate_buffers(5, Resolution::new(640, 480))
        .unwrap();

    device.fail_open(InputId(0));
    assert!(matches!(
        session.open(&buffers, no_sink()),
        Err(SetupError::Open { input: InputId(0), .. })
    ));
    assert_eq!(session.state(), State::Init);
    assert_eq!(device.handle_of(InputId(0)), None);
}

#[test]
fn failed_registration_closes_the_handle() {
    let (device, surface, session) = standalone(4);
    let buffers = surface
        .allocate_buffers(5, Resolution::new(640, 480))
        .unwrap();

    device.fail_buffer_registration();
    assert!(matches!(
        session.open(&buffers, no_sink()),
        Err(SetupError::RegisterBuffers(_))
    ));
    assert_eq!(session.state(), State::Init);
    assert_eq!(device.handle_of(InputId(0)), None);

    device.fail_sink_registration();
    assert!(matches!(
        session.open(&buffers, no_sink()),
        Err(SetupError::RegisterSink(_))
    ));
    assert_eq!(session.state(), State::Init);
    assert_eq!(device.handle_of(InputId(0)), None);

    // nothing is left over, so a clean open still works
    let handle = session.open(&buffers, no_sink()).unwrap();
    assert!(device.is_open(handle));
}

#[test]
fn bind_failure_never_opens_the_device() {
    let (device, surface, session) = standalone(4);
    let buffers = surface
        .allocate_buffers(3, Resolution::new(640, 480))
        .unwrap();

    assert!(matches!(
        session.open(&buffers, no_sink()),
        Err(SetupError::Bind(BindError::NotEnoughBuffers {
            required: 4,
            available: 3
        }))
    ));
    assert_eq!(device.handle_of(InputId(0)), None);
}

#[test]
fn start_and_stop_are_idempotent() {
    let fixture = Fixture::new(vec![input(0)]);
    let (handle, session) = fixture.open(0, 4);
    let surface = fixture.surfaces.surface(0);

    session.start().unwrap();
    session.start().unwrap();
    assert_eq!(session.state(), State::Start);
    assert!(fixture.device.is_streaming(handle));
    assert_eq!(surface.visibility(), vec![true]);

    session.stop().unwrap();
    session.stop().unwrap();
    assert_eq!(session.state(), State::Stop);
    assert!(!fixture.device.is_streaming(handle));
    assert!(!session.has_worker());
    assert_eq!(surface.visibility(), vec![true, false]);
}

#[test]
fn failed_device_start_keeps_state() {
    let fixture = Fixture::new(vec![input(0)]);
    let (handle, session) = fixture.open(0, 4);

    fixture.device.fail_starts(handle, 1).unwrap();
    assert!(matches!(
        session.start(),
        Err(CommandError::Device { op: "start", .. })
    ));
    assert_eq!(session.state(), State::Open);
    assert!(fixture.surfaces.surface(0).visibility().is_empty());

    session.start().unwrap();
    assert_eq!(session.state(), State::Start);
}

#[test]
fn failed_device_stop_keeps_state() {
    let fixture = Fixture::new(vec![input(0)]);
    let (handle, session) = fixture.open(0, 4);
    session.start().unwrap();

    fixture.device.fail_stops(handle, 1).unwrap();
    assert!(matches!(
        session.stop(),
        Err(CommandError::Device { op: "stop", .. })
    ));
    assert_eq!(session.state(), State::Start);

    session.stop().unwrap();
    assert_eq!(session.state(), State::Stop);
}

#[test]
fn stop_joins_the_worker() {
    let fixture = Fixture::new(vec![input(0)]);
    let (handle, session) = fixture.open(0, 4);
    let surface = fixture.surfaces.surface(0);

    session.start().unwrap();
    fixture.device.capture(handle).unwrap();
    assert!(wait_until(|| session.frames_delivered() == 1));

    session.stop().unwrap();
    assert!(!session.has_worker());
    assert_eq!(session.previous_index(), None);
    assert!(fixture.device.outstanding(handle).is_empty());

    // a late wakeup finds no worker
    session.notify_frame();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(surface.presented(), vec![0]);
}

#[test]
fn restart_resumes_delivery() {
    let fixture = Fixture::new(vec![input(0)]);
    let (handle, session) = fixture.open(0, 4);
    let surface = fixture.surfaces.surface(0);

    session.start().unwrap();
    fixture.device.capture(handle).unwrap();
    assert!(wait_until(|| session.frames_delivered() == 1));
    session.stop().unwrap();

    session.start().unwrap();
    let index = fixture.device.capture(handle).unwrap();
    assert!(wait_until(|| session.frames_delivered() == 2));
    assert_eq!(surface.presented(), vec![0, index]);
    // the buffer shown before the stop went back with the stop
    assert!(fixture.device.released(handle).is_empty());
}

#[test]
fn device_error_faults_the_session() {
    let fixture = Fixture::new(vec![input(0)]);
    let (handle, session) = fixture.open(0, 4);
    session.start().unwrap();

    fixture.device.emit_error(handle, 0x17).unwrap();
    assert_eq!(session.state(), State::Error);
    assert!(matches!(session.start(), Err(CommandError::Faulted)));

    session.stop().unwrap();
    assert_eq!(session.state(), State::Error);
    assert!(!fixture.device.is_streaming(handle));
    assert!(!session.has_worker());
}

#[test]
fn fault_during_stop_is_kept() {
    let fixture = Fixture::new(vec![input(0)]);
    let (handle, session) = fixture.open(0, 4);
    session.start().unwrap();

    // no frame is queued, the worker sits in next_frame until the fetch times out
    session.notify_frame();
    let device = fixture.device.clone();
    let faulting = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        device.emit_error(handle, 0x17).unwrap();
    });

    session.stop().unwrap();
    faulting.join().unwrap();

    assert_eq!(session.state(), State::Error);
    assert!(matches!(session.start(), Err(CommandError::Faulted)));
    assert!(matches!(
        session.control(Command::Start),
        Err(CommandError::Faulted)
    ));
    assert!(!fixture.device.is_streaming(handle));
}

#[test]
fn close_winds_down_a_faulted_session() {
    let fixture = Fixture::new(vec![input(0)]);
    let (handle, session) = fixture.open(0, 4);
    session.start().unwrap();
    fixture.device.emit_error(handle, 0x17).unwrap();
    assert!(fixture.device.is_streaming(handle));

    session.close();
    assert_eq!(session.state(), State::Init);
    assert!(fixture.device.was_closed(handle));
    assert_eq!(fixture.surfaces.surface(0).visibility(), vec![true, false]);
}

#[test]
fn faulted_session_closes_without_a_stop_when_idle() {
    let fixture = Fixture::new(vec![input(0)]);
    let (handle, session) = fixture.open(0, 4);
    fixture.device.emit_error(handle, 0x17).unwrap();
    assert_eq!(session.state(), State::Error);

    session.close();
    assert!(fixture.device.was_closed(handle));
    assert!(fixture.surfaces.surface(0).visibility().is_empty());
}

#[test]
fn concurrent_commands_stay_consistent() {
    let fixture = Fixture::new(vec![input(0)]);
    let (handle, session) = fixture.open(0, 4);

    let workers: Vec<_> = (0..4)
        .map(|n| {
            let session = session.clone();
            thread::spawn(move || {
                for i in 0..20 {
                    let command = if (i + n) % 2 == 0 {
                        Command::Start
                    } else {
                        Command::Stop
                    };
                    session.control(command).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let state = session.state();
    assert!(matches!(state, State::Start | State::Stop), "{}", state);
    let started = state == State::Start;
    assert_eq!(session.has_worker(), started);
    assert_eq!(fixture.device.is_streaming(handle), started);

    session.control(Command::Stop).unwrap();
    assert_eq!(session.state(), State::Stop);
    assert!(!session.has_worker());
    assert!(!fixture.device.is_streaming(handle));

    session.control(Command::Start).unwrap();
    assert_eq!(session.state(), State::Start);
    assert!(session.has_worker());
    fixture.device.capture(handle).unwrap();
    assert!(wait_until(|| session.frames_delivered() == 1));
}

#[test]
fn valid_signal_starts_capture() {
    let fixture = Fixture::new(vec![input(0)]);
    let (handle, session) = fixture.open(0, 4);

    fixture
        .device
        .emit_signal(handle, InputSignal::Lost)
        .unwrap();
    assert_eq!(session.state(), State::Open);

    fixture
        .device
        .emit_signal(handle, InputSignal::Valid)
        .unwrap();
    assert_eq!(session.state(), State::Start);
    assert!(fixture.device.is_streaming(handle));
}

#[test]
fn close_releases_everything() {
    let fixture = Fixture::new(vec![input(0)]);
    let (handle, session) = fixture.open(0, 4);
    session.start().unwrap();
    fixture.device.capture(handle).unwrap();
    assert!(wait_until(|| session.frames_delivered() == 1));

    session.close();
    assert_eq!(session.state(), State::Init);
    assert!(!session.has_worker());
    assert!(fixture.device.was_closed(handle));
    assert_eq!(fixture.surfaces.surface(0).visibility(), vec![true, false]);

    // closing twice is harmless
    session.close();
}

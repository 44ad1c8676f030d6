use super::*;
use device::{ActuatorCall, SimulatedActuator};

fn local_settings() -> Settings {
    Settings {
        server_bind: "127.0.0.1:0".into(),
        drain_timeout: Duration::from_millis(200),
        ..Settings::default()
    }
}

fn disabled_video() -> Arc<dyn VideoPublisher> {
    Arc::new(DisabledVideoPublisher)
}

#[tokio::test]
async fn startup_acquires_device_and_binds() {
    let actuator = Arc::new(SimulatedActuator::new());
    let settings = local_settings();
    let lifecycle = Lifecycle::new(disabled_video(), &settings);

    let started = lifecycle
        .start(actuator.clone(), &settings)
        .await
        .expect("startup");

    assert!(started.listener.local_addr().expect("addr").port() > 0);
    assert!(!started.device.is_released());
    assert!(!*lifecycle.subscribe().borrow());
}

#[tokio::test]
async fn failed_acquisition_is_a_startup_error() {
    let actuator = Arc::new(SimulatedActuator::new());
    actuator.fail_on("head_move");
    let settings = local_settings();
    let lifecycle = Lifecycle::new(disabled_video(), &settings);

    let err = lifecycle
        .start(actuator.clone(), &settings)
        .await
        .err()
        .expect("startup should fail");

    assert!(format!("{err:#}").contains("failed to acquire the robot device"));
    assert_eq!(actuator.close_count(), 1);
    assert!(*lifecycle.subscribe().borrow());
}

#[tokio::test]
async fn failed_video_start_releases_the_device() {
    let actuator = Arc::new(SimulatedActuator::new());
    let settings = local_settings();
    let video: Arc<dyn VideoPublisher> = Arc::new(ProcessVideoPublisher::new(
        "/nonexistent/robot-video-streamer",
        Vec::new(),
    ));
    let lifecycle = Lifecycle::new(video, &settings);

    let err = lifecycle
        .start(actuator.clone(), &settings)
        .await
        .err()
        .expect("startup should fail");

    assert!(format!("{err:#}").contains("failed to publish the video stream"));
    assert_eq!(actuator.close_count(), 1);
}

#[tokio::test]
async fn failed_bind_tears_down_what_started() {
    let actuator = Arc::new(SimulatedActuator::new());
    let settings = Settings {
        server_bind: "not-an-address".into(),
        ..local_settings()
    };
    let lifecycle = Lifecycle::new(disabled_video(), &settings);

    let err = lifecycle
        .start(actuator.clone(), &settings)
        .await
        .err()
        .expect("startup should fail");

    assert!(err.to_string().contains("failed to bind not-an-address"));
    assert_eq!(actuator.close_count(), 1);
    assert!(actuator
        .calls()
        .contains(&ActuatorCall::Indicator(IndicatorMode::off())));
}

#[tokio::test]
async fn concurrent_shutdowns_release_once() {
    let actuator = Arc::new(SimulatedActuator::new());
    let settings = local_settings();
    let lifecycle = Lifecycle::new(disabled_video(), &settings);
    let started = lifecycle
        .start(actuator.clone(), &settings)
        .await
        .expect("startup");

    let mut triggers = Vec::new();
    for _ in 0..4 {
        let lifecycle = lifecycle.clone();
        triggers.push(tokio::spawn(async move { lifecycle.shutdown().await }));
    }
    for trigger in triggers {
        trigger.await.expect("trigger");
    }
    lifecycle.shutdown().await;

    assert_eq!(actuator.close_count(), 1);
    assert!(started.device.is_released());
    let resets = actuator
        .calls()
        .into_iter()
        .filter(|call| *call == ActuatorCall::Indicator(IndicatorMode::off()))
        .count();
    assert_eq!(resets, 1);
}

#[tokio::test]
async fn shutdown_waits_for_open_sessions_up_to_the_drain_timeout() {
    let settings = local_settings();
    let lifecycle = Lifecycle::new(disabled_video(), &settings);
    let sessions = lifecycle.sessions();
    let lingering = sessions.enter();

    let begun = tokio::time::Instant::now();
    lifecycle.shutdown().await;
    assert!(begun.elapsed() >= Duration::from_millis(200));
    assert_eq!(sessions.active(), 1);
    drop(lingering);
    assert_eq!(sessions.active(), 0);
}

#[tokio::test]
async fn signal_watcher_returns_once_shutdown_is_requested() {
    let settings = local_settings();
    let lifecycle = Lifecycle::new(disabled_video(), &settings);
    let signals = ShutdownSignals::install().expect("signal handlers");
    let watcher = tokio::spawn(lifecycle.clone().watch_signals(signals));

    lifecycle.shutdown_sender().send_replace(true);
    timeout(Duration::from_secs(1), watcher)
        .await
        .expect("watcher stops")
        .expect("watcher task");
}

#[cfg(unix)]
#[tokio::test]
async fn sigterm_runs_the_full_shutdown() {
    let actuator = Arc::new(SimulatedActuator::new());
    let settings = local_settings();
    let lifecycle = Lifecycle::new(disabled_video(), &settings);
    let started = lifecycle
        .start(actuator.clone(), &settings)
        .await
        .expect("startup");
    let signals = ShutdownSignals::install().expect("signal handlers");
    let watcher = tokio::spawn(lifecycle.clone().watch_signals(signals));

    let sent = std::process::Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .expect("run kill");
    assert!(sent.success());

    timeout(Duration::from_secs(5), watcher)
        .await
        .expect("watcher stops")
        .expect("watcher task");
    assert!(*lifecycle.subscribe().borrow());
    assert!(started.device.is_released());
    assert_eq!(actuator.close_count(), 1);
    assert!(actuator
        .calls()
        .contains(&ActuatorCall::Indicator(IndicatorMode::off())));
}

#[test]
fn only_known_drivers_are_accepted() {
    assert!(actuator_for("simulated").is_ok());
    let err = actuator_for("servo-hat").err().expect("unknown driver");
    assert!(err.to_string().contains("servo-hat"));
}

#[test]
fn advertise_host_prefers_configuration_then_bind_address() {
    let configured = Settings {
        advertise_host: Some("robot.local".into()),
        ..Settings::default()
    };
    let any: SocketAddr = "0.0.0.0:8765".parse().expect("addr");
    assert_eq!(advertise_host(&configured, any), "robot.local");

    let bound: SocketAddr = "192.168.1.20:8765".parse().expect("addr");
    assert_eq!(advertise_host(&Settings::default(), bound), "192.168.1.20");

    let detected = advertise_host(&Settings::default(), any);
    assert!(!detected.is_empty());
    assert_ne!(detected, "0.0.0.0");
}

#[test]
fn video_command_selects_the_process_publisher() {
    let settings = Settings {
        video_command: Some("mjpg_streamer -p {port}".into()),
        ..Settings::default()
    };
    assert_eq!(video_publisher_for(&settings).feed_path(), "/mjpg");
    assert_eq!(video_publisher_for(&Settings::default()).feed_path(), "/mjpg");
}

use super::*;

#[test]
fn command_line_is_split_into_program_and_args() {
    let publisher =
        ProcessVideoPublisher::from_command_line("mjpg_streamer -o output_http.so -p {port}")
            .expect("publisher");
    assert_eq!(publisher.program, "mjpg_streamer");
    assert_eq!(
        publisher.render_args(9000, FlipOptions::default()),
        vec!["-o", "output_http.so", "-p", "9000"]
    );
    assert!(ProcessVideoPublisher::from_command_line("   ").is_none());
}

#[test]
fn flip_placeholders_are_substituted() {
    let publisher = ProcessVideoPublisher::new(
        "cam",
        vec!["--vflip={vflip}".into(), "--hflip={hflip}".into()],
    );
    let args = publisher.render_args(
        9000,
        FlipOptions {
            vflip: true,
            hflip: false,
        },
    );
    assert_eq!(args, vec!["--vflip=true", "--hflip=false"]);
}

#[tokio::test]
async fn display_requires_start() {
    let publisher = ProcessVideoPublisher::new("sleep", vec!["30".into()]);
    let err = publisher.display(9000).await.expect_err("should fail");
    assert!(err.to_string().contains("before it was started"));
}

#[cfg(unix)]
#[tokio::test]
async fn stop_terminates_the_streamer_and_is_repeatable() {
    let publisher = ProcessVideoPublisher::new("sleep", vec!["30".into()]);
    publisher.start(FlipOptions::default()).await.expect("start");
    publisher.display(9000).await.expect("display");
    assert!(publisher.child.lock().await.is_some());

    publisher.stop().await.expect("stop");
    assert!(publisher.child.lock().await.is_none());
    publisher.stop().await.expect("second stop is a no-op");
}

#[tokio::test]
async fn disabled_publisher_accepts_every_call() {
    let publisher = DisabledVideoPublisher;
    publisher.start(FlipOptions::default()).await.expect("start");
    publisher.display(9000).await.expect("display");
    publisher.stop().await.expect("stop");
    assert_eq!(publisher.feed_path(), "/mjpg");
}

use std::sync::Arc;

use super::*;
use device::{DeviceHandle, DeviceOptions, SimulatedActuator};

async fn device(actuator: &Arc<SimulatedActuator>) -> Arc<DeviceHandle> {
    DeviceHandle::acquire(actuator.clone(), DeviceOptions::default())
        .await
        .expect("acquire")
}

#[test]
fn every_action_name_has_an_entry() {
    let catalog = ActionCatalog::builtin();
    for action in ActionName::ALL {
        assert!(catalog.get(action).is_some(), "{} missing", action.as_str());
    }
    assert_eq!(catalog.len(), ActionName::ALL.len());
}

#[test]
fn welcome_follows_the_greeting_order() {
    let catalog = ActionCatalog::builtin();
    let Some(CatalogEntry::Sequence(steps)) = catalog.get(ActionName::Welcome) else {
        panic!("welcome should be a sequence");
    };
    let labels: Vec<String> = steps
        .iter()
        .filter(|step| !matches!(step, Step::WaitIdle | Step::Pause(_)))
        .map(Step::label)
        .collect();
    assert_eq!(
        labels,
        vec![
            "sit",
            "indicator:breath",
            "speak:greeting",
            "indicator:breath",
            "handshake",
            "indicator:breath",
            "high_five",
            "indicator:breath",
            "sit",
        ]
    );
}

#[test]
fn primitive_actions_are_single_steps() {
    let catalog = ActionCatalog::builtin();
    assert!(matches!(
        catalog.get(ActionName::Sit),
        Some(CatalogEntry::Single(Step::Action { name: "sit", .. }))
    ));
    assert!(matches!(
        catalog.get(ActionName::Handshake),
        Some(CatalogEntry::Single(Step::Preset {
            name: "handshake",
            ..
        }))
    ));
}

#[tokio::test]
async fn single_entry_failure_is_returned() {
    let actuator = Arc::new(SimulatedActuator::new());
    actuator.fail_on("stand");
    let device = device(&actuator).await;
    let catalog = ActionCatalog::builtin();
    let entry = catalog.get(ActionName::Stand).expect("entry");

    let mut guard = device.lock().await.expect("lock");
    let err = perform(entry, &mut guard, Duration::from_millis(50))
        .await
        .expect_err("should fail");
    assert!(matches!(err, DeviceError::Driver { .. }));
}

#[tokio::test(start_paused = true)]
async fn sequence_collects_failures_and_keeps_going() {
    let actuator = Arc::new(SimulatedActuator::new());
    actuator.fail_on("set_indicator");
    let device = device(&actuator).await;
    let catalog = ActionCatalog::builtin();
    let entry = catalog.get(ActionName::Welcome).expect("entry");

    let mut guard = device.lock().await.expect("lock");
    let performance = perform(entry, &mut guard, Duration::from_millis(50))
        .await
        .expect("perform");

    assert_eq!(performance.failed.len(), 4);
    assert!(performance.failed.iter().all(|f| f.step == "indicator:breath"));
    assert_eq!(
        actuator.motions(),
        vec!["sit", "handshake", "high_five", "sit"]
    );
    assert!(performance
        .summary()
        .is_some_and(|s| s.starts_with("completed with 4 failed step(s)")));
}

#[tokio::test(start_paused = true)]
async fn wake_up_runs_every_motion_once() {
    let actuator = Arc::new(SimulatedActuator::new());
    let device = device(&actuator).await;
    let catalog = ActionCatalog::builtin();
    let entry = catalog.get(ActionName::WakeUp).expect("entry");

    let mut guard = device.lock().await.expect("lock");
    let performance = perform(entry, &mut guard, Duration::from_millis(50))
        .await
        .expect("perform");

    assert!(performance.failed.is_empty());
    assert!(performance.summary().is_none());
    assert_eq!(
        actuator.motions(),
        vec!["stretch", "body_twisting", "sit", "wag_tail", "pant", "wag_tail"]
    );
}

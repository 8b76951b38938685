//! Integration tests for rig procedures.

use std::io::Write;

use v4d_core::{CoreError, ProcessStatus};
use v4d_rig::{
    CalibrationKind, ExportFormat, ExportQuality, LightingSequence, OverallHealth, Rig, RigConfig,
    RigError, SubsystemState,
};

fn instant_rig() -> Rig {
    Rig::new(RigConfig::instant())
}

#[test]
fn test_registry_holds_every_procedure() {
    let rig = instant_rig();
    assert_eq!(
        rig.registry().names(),
        vec!["calibration", "focus-stack", "lighting", "reconstruction"]
    );
    assert!(rig
        .snapshots()
        .iter()
        .all(|s| s.status == ProcessStatus::Idle));
}

#[tokio::test]
async fn test_full_calibration_updates_record() {
    let rig = instant_rig();
    assert_eq!(
        rig.calibration().validate().overall,
        OverallHealth::NeedsAttention
    );

    let report = rig.calibration().run(CalibrationKind::Full).await.unwrap();
    assert!(report.cameras.is_some());
    assert!(report.synchronization.is_some());

    let snap = rig.calibration().status();
    assert_eq!(snap.status, ProcessStatus::Completed);
    assert_eq!(snap.stage_count, 20);
    assert_eq!(snap.current_step.as_deref(), Some("Final validation..."));

    let validation = rig.calibration().validate();
    assert_eq!(validation.overall, OverallHealth::Good);
    assert!(validation.recommendations.is_empty());
    assert!(rig.calibration().record().last_calibration.is_some());
}

#[tokio::test]
async fn test_single_subsystem_calibration() {
    let rig = instant_rig();
    rig.calibration().run(CalibrationKind::Gimbal).await.unwrap();

    let validation = rig.calibration().validate();
    assert_eq!(validation.gimbal, SubsystemState::Calibrated);
    assert_eq!(validation.cameras.r5c, SubsystemState::NotCalibrated);
    assert!(validation
        .recommendations
        .contains(&"Calibrate Canon R5C camera".to_string()));
    assert!(!validation
        .recommendations
        .contains(&"Calibrate DJI Ronin gimbal".to_string()));
}

#[tokio::test]
async fn test_calibration_reset_clears_record() {
    let rig = instant_rig();
    rig.calibration().run(CalibrationKind::Cameras).await.unwrap();
    assert!(rig.calibration().record().cameras.r5c.calibrated);

    rig.calibration().reset().unwrap();
    assert_eq!(rig.calibration().status().status, ProcessStatus::Idle);
    assert!(!rig.calibration().record().cameras.r5c.calibrated);
    assert!(rig.calibration().record().last_calibration.is_none());
}

#[tokio::test]
async fn test_stopped_calibration_leaves_record_untouched() {
    // Real time: the first stage alone takes two seconds.
    let rig = Rig::new(RigConfig::default());
    let run = rig.calibration().start(CalibrationKind::Cameras).unwrap();
    assert!(rig.calibration().status().is_running());

    assert!(rig.stop_all() >= 1);
    let err = run.wait().await.unwrap_err();
    assert!(matches!(err, RigError::Core(CoreError::Cancelled)));

    assert_eq!(rig.calibration().status().status, ProcessStatus::Idle);
    assert!(!rig.calibration().record().cameras.r5c.calibrated);
}

#[tokio::test]
async fn test_second_start_while_running_is_rejected() {
    let rig = Rig::new(RigConfig::default());
    let _run = rig.reconstruction().start().unwrap();

    let err = rig.reconstruction().start().unwrap_err();
    assert!(matches!(err, RigError::Core(CoreError::AlreadyRunning(_))));

    assert!(rig.reconstruction().stop());
}

#[tokio::test]
async fn test_reconstruction_export_roundtrip() {
    let rig = instant_rig();
    let report = rig.reconstruction().run().await.unwrap();

    let artifact = rig
        .reconstruction()
        .export(ExportFormat::Glb, ExportQuality::Ultra)
        .await
        .unwrap();
    assert_eq!(artifact.file_name, "vantage4d_model.glb");
    assert_eq!(artifact.file_size, report.model_stats.file_size);

    rig.reconstruction().reset().unwrap();
    assert!(matches!(
        rig.reconstruction().export(ExportFormat::Glb, ExportQuality::Ultra).await,
        Err(RigError::NotReady(_))
    ));
}

#[tokio::test]
async fn test_procedures_can_run_again_after_completion() {
    let rig = instant_rig();
    rig.focus_stack().run(Some(2)).await.unwrap();
    let second = rig.focus_stack().run(Some(5)).await.unwrap();
    assert_eq!(second.frames_captured, 5);
}

#[tokio::test]
async fn test_daylight_sequence_ends_on_last_step() {
    let rig = instant_rig();
    rig.lighting().connect();

    let report = rig
        .lighting()
        .run_sequence(LightingSequence::Daylight)
        .await
        .unwrap();
    let expected = v4d_rig::lighting::daylight_brightness(9);
    for light in report.lights.iter().filter(|l| l.enabled) {
        assert_eq!(light.intensity, expected);
    }
    assert_eq!(rig.lighting().status().stage_count, 10);
}

#[tokio::test]
async fn test_rig_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "time_scale = 0.0\nfocus_stack_frames = 3").unwrap();

    let rig = Rig::from_config_file(Some(file.path())).unwrap();
    assert_eq!(rig.config().focus_stack_frames, 3);

    let report = rig.focus_stack().run(None).await.unwrap();
    assert_eq!(report.frames_captured, 3);
}

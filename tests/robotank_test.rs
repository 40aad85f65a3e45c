use aquarium_sensor_drivers::reef_i2c::mock::{ascii_payload, BusOp, MockI2cBus};
use aquarium_sensor_drivers::{
    AnalogSensor, CalibrationPoint, FailureStage, Guard, RoboTankConductivity,
    RoboTankConductivitySettings, RoboTankPh, RoboTankPhSettings, SensorError, Unit,
};
use conditioning_core::CalibrationError;
use embedded_hal::i2c::ErrorKind;
use std::time::Duration;

const PH_ADDR: u8 = 0x62;
const EC_ADDR: u8 = 0x6A;

fn ph_settings() -> RoboTankPhSettings {
    RoboTankPhSettings {
        settle: Duration::from_millis(1),
        ..RoboTankPhSettings::default()
    }
}

fn ec_settings(fresh: f64, standard: f64) -> RoboTankConductivitySettings {
    RoboTankConductivitySettings {
        settle: Duration::from_millis(1),
        abs_d_fresh: fresh,
        abs_d_standard: standard,
        temp_comp: false,
        ..RoboTankConductivitySettings::default()
    }
}

fn queue_potentials(mock: &MockI2cBus, u: &str, v: &str) {
    mock.queue_ascii_response(EC_ADDR, u);
    mock.queue_ascii_response(EC_ADDR, v);
}

#[test]
fn test_ph_uncalibrated_reading_passes_through() {
    let mock = MockI2cBus::new();
    mock.queue_ascii_response(PH_ADDR, "8.12");
    let ph = RoboTankPh::new(mock.clone(), ph_settings()).unwrap();

    let m = ph.read().unwrap();
    assert_eq!(m.value, 8.12);
    assert_eq!(m.unit, Unit::Ph);
    assert_eq!(m.signal("raw_ph"), Some(8.12));
    assert!((m.signal("implied_mv").unwrap() - (7.0 - 8.12) * 59.16).abs() < 1e-9);
    assert_eq!(mock.get_writes(PH_ADDR), vec![b"R\0".to_vec()]);
}

#[test]
fn test_ph_out_of_range_reading_is_clamped_with_guards() {
    let mock = MockI2cBus::new();
    mock.queue_ascii_response(PH_ADDR, "16.2");
    mock.queue_ascii_response(PH_ADDR, "16.2");

    // 未校正: 入力クランプのみ
    let ph = RoboTankPh::new(mock.clone(), ph_settings()).unwrap();
    let m = ph.read().unwrap();
    assert_eq!(m.value, 15.0);
    assert!(m
        .diagnostics
        .has_guard(|g| matches!(g, Guard::InputClamped { clamped, .. } if *clamped == 15.0)));
    assert!(!m
        .diagnostics
        .has_guard(|g| matches!(g, Guard::OutputClamped { .. })));
    // 診断用の mV はクランプ前の値から
    assert!((m.signal("implied_mv").unwrap() - (7.0 - 16.2) * 59.16).abs() < 1e-9);

    // 校正済み: 出力も 0..14 に収める
    let ph = RoboTankPh::new(
        mock,
        RoboTankPhSettings {
            obs7: Some(7.0),
            ..ph_settings()
        },
    )
    .unwrap();
    let m = ph.read().unwrap();
    assert_eq!(m.value, 14.0);
    assert!(m
        .diagnostics
        .has_guard(|g| matches!(g, Guard::OutputClamped { clamped, .. } if *clamped == 14.0)));
}

#[test]
fn test_ph_anchors_from_settings() {
    let mock = MockI2cBus::new();
    mock.queue_ascii_response(PH_ADDR, "7.10");
    mock.queue_ascii_response(PH_ADDR, "4.20");
    let ph = RoboTankPh::new(
        mock,
        RoboTankPhSettings {
            obs4: Some(4.20),
            obs7: Some(7.10),
            ..ph_settings()
        },
    )
    .unwrap();

    assert_eq!(ph.read().unwrap().value, 7.0);
    assert_eq!(ph.read().unwrap().value, 4.0);
}

#[test]
fn test_ph_calibrate_live_and_explicit_points() {
    let mock = MockI2cBus::new();
    // pH4 の校正点はその場で読む
    mock.queue_ascii_response(PH_ADDR, "4.10");
    let ph = RoboTankPh::new(mock.clone(), ph_settings()).unwrap();

    ph.calibrate(&[CalibrationPoint::live(4.0), CalibrationPoint::new(7.0, 7.05)])
        .unwrap();
    let anchors = ph.anchors();
    assert_eq!(anchors.len(), 2);
    assert_eq!(anchors.get(4.0).unwrap().observed, 4.10);
    assert_eq!(anchors.get(7.0).unwrap().observed, 7.05);

    mock.queue_ascii_response(PH_ADDR, "7.05");
    assert_eq!(ph.read().unwrap().value, 7.0);

    ph.clear_calibration();
    assert!(ph.anchors().is_empty());
}

#[test]
fn test_ph_unsupported_calibration_point() {
    let ph = RoboTankPh::new(MockI2cBus::new(), ph_settings()).unwrap();
    let err = ph.calibrate(&[CalibrationPoint::new(5.0, 5.1)]).unwrap_err();
    assert!(matches!(
        err,
        SensorError::UnsupportedCalibration { expected, .. } if expected == 5.0
    ));
    assert_eq!(err.stage(), FailureStage::Configuration);
}

#[test]
fn test_ph_has_no_temperature_capability() {
    let ph = RoboTankPh::new(MockI2cBus::new(), ph_settings()).unwrap();
    assert!(ph.temperature_sink().is_none());
}

#[test]
fn test_ph_firmware_and_errors() {
    let mock = MockI2cBus::new();
    mock.queue_ascii_response(PH_ADDR, "RT-PH v2.1");
    let ph = RoboTankPh::new(mock.clone(), ph_settings()).unwrap();
    assert_eq!(ph.firmware().unwrap(), "RT-PH v2.1");

    mock.queue_write_error(ErrorKind::Other);
    assert_eq!(ph.read().unwrap_err().stage(), FailureStage::Transport);

    // 応答なし（全 0xFF が 2 回）
    assert_eq!(ph.read().unwrap_err().stage(), FailureStage::Protocol);

    mock.queue_response(PH_ADDR, vec![2, b'E', b'R', 0x00]);
    assert_eq!(ph.read().unwrap_err().stage(), FailureStage::Protocol);
}

#[test]
fn test_ph_transient_write_error_is_retried_once() {
    let mock = MockI2cBus::new();
    mock.queue_write_error(ErrorKind::Bus);
    mock.queue_ascii_response(PH_ADDR, "7.00");
    let ph = RoboTankPh::new(mock.clone(), ph_settings()).unwrap();

    assert_eq!(ph.read().unwrap().value, 7.0);
    assert_eq!(mock.get_writes(PH_ADDR), vec![b"R\0".to_vec(), b"R\0".to_vec()]);
}

#[test]
fn test_ph_transient_read_error_is_retried_once() {
    let mock = MockI2cBus::new();
    mock.queue_read_error(PH_ADDR, ErrorKind::Bus);
    mock.queue_read(PH_ADDR, ascii_payload("6.50"));
    let ph = RoboTankPh::new(mock.clone(), ph_settings()).unwrap();

    assert_eq!(ph.read().unwrap().value, 6.5);
    assert_eq!(mock.get_writes(PH_ADDR).len(), 1);

    // 2 回続くとバスエラー
    mock.queue_read_error(PH_ADDR, ErrorKind::Bus);
    mock.queue_read_error(PH_ADDR, ErrorKind::Bus);
    let err = ph.read().unwrap_err();
    assert_eq!(err.stage(), FailureStage::Transport);
}

#[test]
fn test_conductivity_full_scale_at_standard_anchor() {
    let mock = MockI2cBus::new();
    queue_potentials(&mock, "U=520.0", "V=500.0");
    let ec = RoboTankConductivity::new(mock.clone(), ec_settings(1000.0, 20.0)).unwrap();

    let m = ec.read().unwrap();
    assert!((m.value - 53_000.0).abs() < 1e-6);
    assert_eq!(m.unit, Unit::MicroSiemensPerCm);
    assert_eq!(m.signal("abs_d"), Some(20.0));
    assert!((m.signal("ppt").unwrap() - 35.0).abs() < 1e-9);

    // U と V はそれぞれ読み捨て → コマンド → 読み出し
    let ops = mock.get_operations();
    assert_eq!(ops.len(), 6);
    assert!(matches!(&ops[1], BusOp::Write { bytes, .. } if bytes == b"U\0"));
    assert!(matches!(&ops[4], BusOp::Write { bytes, .. } if bytes == b"V\0"));
}

#[test]
fn test_conductivity_fresh_anchor_reads_zero() {
    let mock = MockI2cBus::new();
    queue_potentials(&mock, "U,1500.0", "V,500.0");
    let ec = RoboTankConductivity::new(mock, ec_settings(1000.0, 20.0)).unwrap();
    assert_eq!(ec.read().unwrap().value, 0.0);
}

#[test]
fn test_conductivity_overshoot_is_clamped() {
    let mock = MockI2cBus::new();
    queue_potentials(&mock, "250.0", "250.0");
    let ec = RoboTankConductivity::new(mock, ec_settings(1000.0, 200.0)).unwrap();

    let m = ec.read().unwrap();
    assert!((m.value - 63_600.0).abs() < 1e-6);
    assert!(m
        .diagnostics
        .has_guard(|g| matches!(g, Guard::RatioClamped { clamped, .. } if *clamped == 1.2)));
}

#[test]
fn test_conductivity_salinity() {
    let mock = MockI2cBus::new();
    queue_potentials(&mock, "U=510.0", "V=500.0");
    let ec = RoboTankConductivity::new(mock, ec_settings(1000.0, 20.0)).unwrap();

    let m = ec.read_salinity().unwrap();
    assert_eq!(m.unit, Unit::Ppt);
    let expected_us = (1000.0 - 10.0) / (1000.0 - 20.0) * 53_000.0;
    assert!((m.value - expected_us * 35.0 / 53_000.0).abs() < 1e-9);
}

#[test]
fn test_conductivity_parse_budget_recovers() {
    let mock = MockI2cBus::new();
    // 最初の読み捨ては古い応答を消費する
    mock.queue_read(EC_ADDR, vec![0xFF; 32]);
    mock.queue_ascii_response(EC_ADDR, "BUSY");
    mock.queue_read(EC_ADDR, ascii_payload("U=520.0"));
    mock.queue_ascii_response(EC_ADDR, "V=500.0");
    let ec = RoboTankConductivity::new(mock, ec_settings(1000.0, 20.0)).unwrap();

    assert!((ec.read().unwrap().value - 53_000.0).abs() < 1e-6);
}

#[test]
fn test_conductivity_parse_budget_exhausted() {
    let mock = MockI2cBus::new();
    mock.queue_read(EC_ADDR, vec![0xFF; 32]);
    mock.queue_ascii_response(EC_ADDR, "ERR");
    for _ in 0..5 {
        mock.queue_read(EC_ADDR, ascii_payload("ERR"));
    }
    let ec = RoboTankConductivity::new(mock, ec_settings(1000.0, 20.0)).unwrap();

    let err = ec.read().unwrap_err();
    assert!(matches!(err, SensorError::Parse { attempts: 6, ref response, .. } if response == "ERR"));
    assert_eq!(err.stage(), FailureStage::Parse);
}

#[test]
fn test_conductivity_missing_anchor_is_configuration_error() {
    let mock = MockI2cBus::new();
    queue_potentials(&mock, "U=520.0", "V=500.0");
    let ec = RoboTankConductivity::new(mock, ec_settings(1000.0, 0.0)).unwrap();

    let err = ec.read().unwrap_err();
    assert!(matches!(
        err,
        SensorError::Calibration(CalibrationError::MissingAnchor { name: "standard" })
    ));
    assert_eq!(err.stage(), FailureStage::Configuration);
}

#[test]
fn test_conductivity_calibrate_fresh_and_standard() {
    let mock = MockI2cBus::new();
    let ec = RoboTankConductivity::new(mock.clone(), ec_settings(1010.0, 24.328)).unwrap();

    // 純水はその場で読む
    queue_potentials(&mock, "U=1400.0", "V=450.0");
    ec.calibrate(&[CalibrationPoint::live(0.0), CalibrationPoint::new(53_000.0, 30.0)])
        .unwrap();

    let cal = ec.calibration();
    assert_eq!(cal.fresh, 950.0);
    assert_eq!(cal.standard, 30.0);
}

#[test]
fn test_conductivity_calibrate_from_unset_anchors_one_point_at_a_time() {
    let mock = MockI2cBus::new();
    let ec = RoboTankConductivity::new(mock.clone(), ec_settings(0.0, 0.0)).unwrap();

    ec.calibrate(&[CalibrationPoint::new(0.0, 1000.0)]).unwrap();
    assert_eq!(ec.calibration().fresh, 1000.0);
    assert_eq!(ec.calibration().standard, 0.0);

    // 標準液が未設定のうちは読み取りで設定エラー
    queue_potentials(&mock, "U=520.0", "V=500.0");
    let err = ec.read().unwrap_err();
    assert!(matches!(
        err,
        SensorError::Calibration(CalibrationError::MissingAnchor { name: "standard" })
    ));

    ec.calibrate(&[CalibrationPoint::new(53_000.0, 20.0)]).unwrap();
    queue_potentials(&mock, "U=520.0", "V=500.0");
    assert!((ec.read().unwrap().value - 53_000.0).abs() < 1e-6);
}

#[test]
fn test_conductivity_calibrate_from_unset_anchors_in_one_call() {
    let mock = MockI2cBus::new();
    let ec = RoboTankConductivity::new(mock.clone(), ec_settings(0.0, 0.0)).unwrap();

    ec.calibrate(&[CalibrationPoint::new(0.0, 1000.0), CalibrationPoint::new(53_000.0, 20.0)])
        .unwrap();
    let cal = ec.calibration();
    assert_eq!(cal.fresh, 1000.0);
    assert_eq!(cal.standard, 20.0);

    queue_potentials(&mock, "U=520.0", "V=500.0");
    assert!((ec.read().unwrap().value - 53_000.0).abs() < 1e-6);
}

#[test]
fn test_conductivity_degenerate_calibration_is_rejected() {
    let ec = RoboTankConductivity::new(MockI2cBus::new(), ec_settings(1000.0, 20.0)).unwrap();

    let err = ec
        .calibrate(&[CalibrationPoint::new(53_000.0, 1000.0)])
        .unwrap_err();
    assert!(matches!(
        err,
        SensorError::Calibration(CalibrationError::DegenerateAnchors { .. })
    ));
    // 元の校正値は残る
    assert_eq!(ec.calibration().standard, 20.0);

    let err = ec.calibrate(&[CalibrationPoint::new(-5.0, 10.0)]).unwrap_err();
    assert!(matches!(err, SensorError::UnsupportedCalibration { .. }));
}

#[test]
fn test_conductivity_temperature_compensation() {
    let mock = MockI2cBus::new();
    let ec = RoboTankConductivity::new(
        mock.clone(),
        RoboTankConductivitySettings {
            temp_comp: true,
            alpha_per_c: 0.02,
            ..ec_settings(1000.0, 20.0)
        },
    )
    .unwrap();

    let sink = ec.temperature_sink().expect("conductivity accepts temperature");
    sink.set_temperature_c(30.0);

    queue_potentials(&mock, "U=520.0", "V=500.0");
    let m = ec.read().unwrap();
    assert!((m.value - 53_000.0 / 1.1).abs() < 1e-6);
    assert_eq!(m.signal("temp_c"), Some(30.0));

    // 不明値の注入で補正なしに戻る
    sink.set_temperature_c(-1.0);
    queue_potentials(&mock, "U=520.0", "V=500.0");
    let m = ec.read().unwrap();
    assert!((m.value - 53_000.0).abs() < 1e-6);
    assert!(m.diagnostics.has_guard(|g| *g == Guard::TemperatureMissing));
}

#[test]
fn test_conductivity_water_type_and_firmware() {
    let mock = MockI2cBus::new();
    let ec = RoboTankConductivity::new(mock.clone(), ec_settings(1000.0, 20.0)).unwrap();

    ec.set_water_type(2).unwrap();
    mock.queue_ascii_response(EC_ADDR, "RT-EC v1.4");
    assert_eq!(ec.firmware().unwrap(), "RT-EC v1.4");

    assert_eq!(mock.get_writes(EC_ADDR), vec![b"W,2\0".to_vec(), b"H\0".to_vec()]);
}

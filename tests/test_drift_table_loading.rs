use aatsr_recal::{
    Channel, DriftTable, DriftTableSource, RecalError, RecalibrationConfig, Recalibrator,
};
use approx::assert_relative_eq;
use std::io::Write;
use tempfile::NamedTempFile;

const HEADER: &str = "\
USER DRIFT TABLE
generated for tests
-
-
-
   INDEX  DATE        TIME       DRIFT_0550  DRIFT_0670  DRIFT_0870  DRIFT_1600
";

fn write_table(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(HEADER.as_bytes()).unwrap();
    for row in rows {
        writeln!(file, "{}", row).unwrap();
    }
    file.flush().unwrap();
    file
}

#[test]
fn test_alternate_table_is_used() {
    let _ = env_logger::builder().is_test(true).try_init();
    let file = write_table(&[
        "      0 01-MAR-2002 00:00:00    1.000000    1.000000    1.000000    1.000000",
        "      1 01-MAR-2004 00:00:00    1.100000    1.050000    1.020000    1.010000",
        "      2 01-MAR-2006 00:00:00    1.200000    1.100000    1.040000    1.020000",
    ]);

    let config = RecalibrationConfig {
        use_alternate_drift_table: true,
        alternate_table_path: Some(file.path().to_path_buf()),
        ..Default::default()
    };
    let recalibrator = Recalibrator::new(config).unwrap();
    let engine = recalibrator.engine();

    assert_eq!(engine.table().len(), 3);
    assert_eq!(engine.acquisition_time_index("01-MAR-2005 00:00:00").unwrap(), Some(1));
    assert!(engine.check_acquisition_time_range("01-MAR-2005 00:00:00").unwrap());
    assert!(!engine.check_acquisition_time_range("02-MAR-2006 00:00:00").unwrap());

    let bracket = engine.acquisition_bracket("01-MAR-2005 00:00:00").unwrap().unwrap();
    let out = engine
        .apply_drift_correction(
            bracket.t,
            bracket.ati,
            bracket.t_prev,
            bracket.t_next,
            Channel::Nm550,
            30.0,
        )
        .unwrap();
    let fraction = (bracket.t - bracket.t_prev) / (bracket.t_next - bracket.t_prev);
    assert_relative_eq!(out, 30.0 / (1.1 + 0.1 * fraction), epsilon = 1e-12);
}

#[test]
fn test_malformed_alternate_table_aborts() {
    let file = write_table(&[
        "      0 01-MAR-2002 00:00:00    1.000000    1.000000    1.000000    1.000000",
        "      1 01-MAR-2004 00:00:00    1.1O0000    1.050000    1.020000    1.010000",
    ]);
    let result = DriftTable::load(&DriftTableSource::File(file.path().to_path_buf()));
    assert!(matches!(result, Err(RecalError::Load(_))));
}

#[test]
fn test_unreadable_alternate_path_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = RecalibrationConfig {
        use_alternate_drift_table: true,
        alternate_table_path: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    assert!(matches!(Recalibrator::new(config), Err(RecalError::Configuration(_))));
}

#[test]
fn test_alternate_path_ignored_when_not_requested() {
    let config = RecalibrationConfig {
        use_alternate_drift_table: false,
        alternate_table_path: Some("/nonexistent/table.dat".into()),
        ..Default::default()
    };
    let recalibrator = Recalibrator::new(config).unwrap();
    assert!(recalibrator.engine().table().len() > 3000);
}

mod common;

use common::{ALTERNATIVES, CONFIG, simulate_survey, write_file};
use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn fit_predict_and_cv_subcommands_run_end_to_end() {
    let tmp = tempdir().expect("temporary directory");
    let survey = simulate_survey(300, 2);
    let train = write_file(tmp.path(), "train.csv", &survey.csv);
    let test = write_file(tmp.path(), "test.tsv", &survey.tsv_without_modes);
    let config = write_file(tmp.path(), "model_config.toml", CONFIG);
    let exe = env!("CARGO_BIN_EXE_modechoice");

    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args(["fit", train.as_str(), "--config", config.as_str(), "--seed", "1"])
        .output()
        .expect("run modechoice fit");
    assert!(output.status.success(), "fit failed: {output:?}");
    assert!(tmp.path().join("model.toml").exists(), "model.toml missing");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stdout.matches("Logit model summary").count(), 1);
    assert!(!stderr.contains("Logit model summary"), "summary logged twice");

    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args([
            "predict",
            test.as_str(),
            "--model",
            "model.toml",
            "--config",
            config.as_str(),
            "--method",
            "random",
            "--seed",
            "9",
        ])
        .status()
        .expect("run modechoice predict");
    assert!(status.success(), "predict exited with status {status:?}");

    let predictions =
        fs::read_to_string(tmp.path().join("predictions.csv")).expect("predictions written");
    let mut lines = predictions.lines();
    let header: Vec<&str> = lines.next().expect("header").split(',').collect();
    assert_eq!(&header[..2], ["case_id", "prediction"]);
    assert_eq!(header.len(), 2 + ALTERNATIVES.len());
    assert_eq!(header[5], "p_PT");
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 300);
    let first: Vec<&str> = rows[0].split(',').collect();
    assert_eq!(first[0], "1000");
    assert!(ALTERNATIVES.contains(&first[1]));
    let total: f64 = first[2..].iter().map(|p| p.parse::<f64>().unwrap()).sum();
    assert!((total - 1.0).abs() < 1e-4);

    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args(["cv", train.as_str(), "--config", config.as_str(), "--folds", "2"])
        .output()
        .expect("run modechoice cv");
    assert!(output.status.success(), "cv failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Fold 2:"));
    assert!(stdout.contains("Mean accuracy"));
}

#[test]
fn missing_config_fails_with_exit_code_one() {
    let tmp = tempdir().expect("temporary directory");
    let survey = simulate_survey(20, 4);
    let train = write_file(tmp.path(), "train.csv", &survey.csv);

    let output = Command::new(env!("CARGO_BIN_EXE_modechoice"))
        .current_dir(tmp.path())
        .args(["fit", train.as_str(), "--config", "does_not_exist.toml"])
        .output()
        .expect("run modechoice fit");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}

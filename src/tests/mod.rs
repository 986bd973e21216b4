#[cfg(test)]
use crate::prelude::*;
#[cfg(test)]
use crate::settings::OptimizerSettings;

#[test]
fn read_mandatory_settings() {
    let settings = read_settings("src/tests/config.toml").unwrap();
    assert_eq!(settings.problem.id, "Orbit-v0");
    assert_eq!(settings.problem.skeleton_points, vec![1500.0, 1200.0]);
    assert_eq!(settings.config.log_level, "debug");
    assert_eq!(settings.config.workers, 2);
    assert!(!settings.config.tui);
    assert_eq!(settings.config.log_out, None);
}

#[test]
fn optimizer_defaults_are_filled_in() {
    let settings = read_settings("src/tests/config.toml").unwrap();
    assert_eq!(
        settings.optimizer,
        OptimizerSettings {
            maxfun: 40,
            tolerance: 0.01,
            ..OptimizerSettings::default()
        }
    );
    assert_eq!(settings.optimizer.name, "Nelder-Mead");
    assert_eq!(settings.rl.time_limit, 0);
}

#[test]
fn environment_overrides_file() {
    std::env::set_var("GEOFF_RL__TOTAL_TIMESTEPS", "1234");
    let settings = read_settings("src/tests/config.toml").unwrap();
    std::env::remove_var("GEOFF_RL__TOTAL_TIMESTEPS");
    assert_eq!(settings.rl.total_timesteps, 1234);
}

#[test]
fn missing_file_is_an_error() {
    assert!(read_settings("src/tests/does_not_exist.toml").is_err());
}

#[test]
fn settings_are_written_as_json() {
    let settings = read_settings("src/tests/config.toml").unwrap();
    let path = std::env::temp_dir().join("geoff_settings_test.json");
    settings.write(path.to_str().unwrap()).unwrap();
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["problem"]["id"], "Orbit-v0");
    assert_eq!(written["optimizer"]["maxfun"], 40);
    std::fs::remove_file(path).unwrap();
}

#[test]
fn unknown_optimizer_is_rejected() {
    let settings = OptimizerSettings {
        name: "COBYLA".to_string(),
        ..OptimizerSettings::default()
    };
    assert!(optimizers::from_settings(&settings).is_err());
}

use serde::Deserialize;
use std::{error::Error, fs};

const SETTINGS_FILENAME: &str = "settings.json";

/// Deployment parameters. build.rs copies settings.json next to the
/// binary so a release build runs from its own directory.
#[derive(Debug, Deserialize)]
pub struct Settings {
    pub bind_address: String,
    pub port: u16,
    pub save_file: String,
    pub sweep_interval_secs: u64,
}

impl Settings {
    pub fn load() -> Result<Settings, Box<dyn Error>> {
        let content = fs::read_to_string(SETTINGS_FILENAME)?;
        let settings = serde_json::from_str(&content)?;
        Ok(settings)
    }
}

use config::{Config, ConfigError, Environment, File};
use fitsync_session::SessionConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct CliConfig {
    pub target_name: String,
    pub output_dir: PathBuf,
    #[serde(with = "humantime_serde")]
    pub scan_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    pub connect_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub ready_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub burst_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub file_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub write_settle: Duration,
    pub max_cycles: usize,
    pub stall_cycles: usize,
    pub skip_existing: bool,
    pub listing_name: String,
}

impl CliConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("target_name", "M1_74F7")?
            .set_default("output_dir", "fit_files")?
            .set_default("scan_timeout", "5s")?
            .set_default("connect_timeout", "10s")?
            .set_default("connect_attempts", 3)?
            .set_default("ready_timeout", "10s")?
            .set_default("burst_timeout", "10s")?
            .set_default("file_settle", "2s")?
            .set_default("connect_settle", "5s")?
            .set_default("write_settle", "10ms")?
            .set_default("max_cycles", 2000)?
            .set_default("stall_cycles", 100)?
            .set_default("skip_existing", true)?
            .set_default("listing_name", "filelist.txt")?;

        if let Some(path) = config_path {
            if path.extension().and_then(|ext| ext.to_str()) == Some("env") {
                // Loaded into the process environment so the FITSYNC_ source sees it.
                match dotenvy::from_path(&path) {
                    Ok(_) => tracing::info!("loaded environment from {}", path.display()),
                    Err(err) => {
                        tracing::warn!("failed to load .env from {}: {}", path.display(), err)
                    }
                }
            } else {
                builder = builder.add_source(File::from(path));
            }
        }

        builder = builder.add_source(Environment::with_prefix("FITSYNC").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            ready_timeout: self.ready_timeout,
            burst_timeout: self.burst_timeout,
            file_settle: self.file_settle,
            connect_settle: self.connect_settle,
            max_cycles: self.max_cycles,
            stall_cycles: self.stall_cycles,
            skip_existing: self.skip_existing,
            listing_name: self.listing_name.clone(),
        }
    }
}

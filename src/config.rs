use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::capture::Facing;
use crate::disposal::DisposalLookupTable;

const DEFAULT_CLASSIFIER_URL: &str = "http://localhost:8000";
const DEFAULT_PERSISTENCE_URL: &str = "http://localhost:8001";
const DEFAULT_CAMERA_DEVICE: &str = "stub://rear_camera";
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;

#[derive(Debug, Deserialize, Default)]
struct SorterConfigFile {
    classifier: Option<ClassifierConfigFile>,
    persistence: Option<PersistenceConfigFile>,
    camera: Option<CameraConfigFile>,
    disposal_table: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PersistenceConfigFile {
    url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    facing: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SorterConfig {
    pub classifier_url: String,
    /// Bound on a `/predict` or `/save` round trip. Unset means no bound.
    pub request_timeout: Option<Duration>,
    pub persistence_url: String,
    pub camera: CameraSettings,
    pub disposal_table: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub facing: Facing,
    pub width: u32,
    pub height: u32,
}

impl SorterConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WASTE_SORTER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SorterConfigFile) -> Result<Self> {
        let classifier_url = file
            .classifier
            .as_ref()
            .and_then(|c| c.url.clone())
            .unwrap_or_else(|| DEFAULT_CLASSIFIER_URL.to_string());
        let request_timeout = file
            .classifier
            .and_then(|c| c.timeout_secs)
            .map(Duration::from_secs);
        let persistence_url = file
            .persistence
            .and_then(|p| p.url)
            .unwrap_or_else(|| DEFAULT_PERSISTENCE_URL.to_string());
        let facing = match file.camera.as_ref().and_then(|c| c.facing.as_deref()) {
            Some(value) => parse_facing(value)?,
            None => Facing::default(),
        };
        let camera = CameraSettings {
            device: file
                .camera
                .as_ref()
                .and_then(|c| c.device.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            facing,
            width: file
                .camera
                .as_ref()
                .and_then(|c| c.width)
                .unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|c| c.height)
                .unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };
        Ok(Self {
            classifier_url,
            request_timeout,
            persistence_url,
            camera,
            disposal_table: file.disposal_table,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("WASTE_SORTER_CLASSIFIER_URL") {
            if !url.trim().is_empty() {
                self.classifier_url = url;
            }
        }
        if let Ok(url) = std::env::var("WASTE_SORTER_PERSIST_URL") {
            if !url.trim().is_empty() {
                self.persistence_url = url;
            }
        }
        if let Ok(device) = std::env::var("WASTE_SORTER_CAMERA") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(facing) = std::env::var("WASTE_SORTER_FACING") {
            if !facing.trim().is_empty() {
                self.camera.facing = parse_facing(&facing)?;
            }
        }
        if let Ok(path) = std::env::var("WASTE_SORTER_DISPOSAL_TABLE") {
            if !path.trim().is_empty() {
                self.disposal_table = Some(PathBuf::from(path));
            }
        }
        if let Ok(timeout) = std::env::var("WASTE_SORTER_TIMEOUT_SECS") {
            if !timeout.trim().is_empty() {
                let seconds: u64 = timeout.trim().parse().map_err(|_| {
                    anyhow!("WASTE_SORTER_TIMEOUT_SECS must be an integer number of seconds")
                })?;
                self.request_timeout = Some(Duration::from_secs(seconds));
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        parse_http_url("classifier url", &self.classifier_url)?;
        parse_http_url("persistence url", &self.persistence_url)?;
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(anyhow!("request timeout must be greater than zero"));
        }
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        Ok(())
    }

    pub fn classifier_url(&self) -> Result<Url> {
        parse_http_url("classifier url", &self.classifier_url)
    }

    pub fn persistence_url(&self) -> Result<Url> {
        parse_http_url("persistence url", &self.persistence_url)
    }

    /// Configured table, or the built-in one.
    pub fn disposal_table(&self) -> Result<DisposalLookupTable> {
        match &self.disposal_table {
            Some(path) => DisposalLookupTable::load(path),
            None => DisposalLookupTable::builtin(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<SorterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_facing(value: &str) -> Result<Facing> {
    Facing::parse(value).ok_or_else(|| anyhow!("camera facing must be rear or front, got {}", value))
}

fn parse_http_url(label: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value.trim()).map_err(|e| anyhow!("invalid {} {}: {}", label, value, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(anyhow!(
            "{} must use http or https, got scheme '{}'",
            label,
            other
        )),
    }
}

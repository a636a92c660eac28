use std::path::Path;
use serde::Deserialize;
use crate::core::{Result, UploadConfig, UploadError};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// 命令行工具的配置文件
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// REST 服务地址，例如 `https://api.example.com/v1`
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
    pub company_id: String,
    pub file_path: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub upload: UploadConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|err| UploadError::Config(format!("can't read {}: {}", path.display(), err)))?;
        Self::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(config_str)?;
        if config.endpoint.trim().is_empty() {
            return Err(UploadError::Config("endpoint must not be empty".to_string()));
        }
        if config.upload.part_size == 0 {
            return Err(UploadError::Config("upload.part_size must be greater than 0".to_string()));
        }
        Ok(config)
    }

    /// 未配置时按扩展名猜测
    pub fn mime_type(&self) -> String {
        if let Some(mime_type) = &self.mime_type {
            return mime_type.clone();
        }

        let extension = Path::new(&self.file_path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("mp4") | Some("m4v") => "video/mp4",
            Some("mov") => "video/quicktime",
            Some("webm") => "video/webm",
            Some("mkv") => "video/x-matroska",
            Some("avi") => "video/x-msvideo",
            _ => "application/octet-stream",
        }
        .to_string()
    }
}

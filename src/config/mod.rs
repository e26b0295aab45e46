//! 設定モジュール（YAML 読み込み）
//!
//! `ConfigSet` はルートディレクトリ配下の複数YAMLファイルを読み込み、
//! 環境変数による上書きを適用したうえで型安全に提供します。
mod auth;
mod error;
mod monitoring;
mod recognition;
mod server;
mod session;

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

pub use auth::*;
pub use error::ConfigError;
pub use monitoring::*;
pub use recognition::*;
pub use server::*;
pub use session::*;

/// 設定ディレクトリを指す環境変数名
pub const CONFIG_DIR_ENV: &str = "TRANSCRIBE_CONFIG_DIR";

/// すべての設定をひとまとめにした構造体
#[derive(Debug, Clone)]
pub struct ConfigSet {
    pub server: ServerConfig,
    pub recognition: RecognitionConfig,
    pub session: SessionSettings,
    pub auth: AuthConfig,
    pub monitoring: MonitoringConfig,
    root: PathBuf,
}

impl ConfigSet {
    /// ルートディレクトリから各YAMLを読み込み
    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, ConfigError> {
        let root = dir.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(ConfigError::MissingRoot(root));
        }

        let server = load_yaml(root.join("server.yaml"))?;
        let recognition = load_yaml(root.join("recognition.yaml"))?;
        let session = load_yaml(root.join("session.yaml"))?;
        let auth = load_yaml(root.join("auth.yaml"))?;
        let monitoring = load_yaml(root.join("monitoring.yaml"))?;

        let config = Self {
            server,
            recognition,
            session,
            auth,
            monitoring,
            root,
        };
        config.validate()?;
        Ok(config)
    }

    /// 環境変数（未設定時は `config/`）から設定を読み込み、上書きを適用
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let dir = std::env::var(CONFIG_DIR_ENV).unwrap_or_else(|_| "config".to_string());
        let mut config = Self::load_from_dir(dir)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// キー→値の参照関数から上書きを適用（テストでは環境変数の代わりにクロージャを渡す）
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("WS_BIND_ADDR").filter(|v| !v.is_empty()) {
            self.server.ws_bind_addr = addr;
        }
        if let Some(addr) = lookup("HTTP_BIND_ADDR").filter(|v| !v.is_empty()) {
            self.server.http_bind_addr = addr;
        }
        if let Some(endpoint) = lookup("RECOGNITION_ENDPOINT").filter(|v| !v.is_empty()) {
            self.recognition.service.endpoint = endpoint;
        }
        if let Some(domains) = lookup("AUTH_ALLOWED_DOMAINS") {
            self.auth.allowed_domains = split_list(&domains);
        }
        if let Some(emails) = lookup("AUTH_ALLOWED_EMAILS") {
            self.auth.allowed_emails = split_list(&emails);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.ingest_capacity == 0 {
            return Err(ConfigError::Invalid("ingest_capacity must be greater than 0".into()));
        }
        if self.session.take_timeout_ms == 0 {
            return Err(ConfigError::Invalid("take_timeout_ms must be greater than 0".into()));
        }
        if self.session.join_timeout_ms == 0 {
            return Err(ConfigError::Invalid("join_timeout_ms must be greater than 0".into()));
        }
        if self.recognition.service.max_pending_requests == 0 {
            return Err(ConfigError::Invalid(
                "max_pending_requests must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// 設定ルートのパス（デバッグ等に利用）
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// カンマ区切りのリストを分解（空要素は無視）
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// YAMLファイルを読み込み、型 `T` へデシリアライズ
fn load_yaml<T>(path: PathBuf) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
{
    let data = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse { path, source })
}

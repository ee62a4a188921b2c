use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::webauthn::WebAuthnSettings;

/// Directory searched for a `Settings.toml` overriding the working directory's
pub const CONFIG_DIR_ENV: &str = "PASSKEY_RP_CONFIG_DIR";

const SETTINGS_FILE: &str = "Settings.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RpSettings {
    pub application: ApplicationSettings,
    pub webauthn: WebAuthnSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl RpSettings {
    /// Load settings from configuration files and environment variables,
    /// then initialise logging and validate the relying-party section
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A settings file cannot be read or parsed
    /// - Logger initialization fails
    /// - The `[webauthn]` section does not validate
    pub fn load() -> anyhow::Result<Self> {
        Self::load_env_file();

        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);

        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(settings.logging.level.as_str()),
        )
        .try_init()
        .context("failed to initialise logging")?;

        settings
            .webauthn
            .validate()
            .context("invalid [webauthn] settings")?;
        Ok(settings)
    }

    /// Load base settings from TOML file(s) or use defaults
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `PASSKEY_RP_CONFIG_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    fn load_base_settings() -> anyhow::Result<Self> {
        let config_dir = std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from);
        Self::load_from_paths(Path::new(SETTINGS_FILE), config_dir.as_deref())
    }

    /// Resolve file-based settings from `base_file` and an optional override directory
    ///
    /// A file found in `config_dir` replaces the base file entirely; missing
    /// sections and keys fall back to defaults.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_from_paths(base_file: &Path, config_dir: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = Self::default();

        if base_file.exists() {
            settings = Self::read_file(base_file)?;
            println!("✓ Loaded base settings from {}", base_file.display());
        }

        if let Some(config_dir) = config_dir {
            let override_path = config_dir.join(SETTINGS_FILE);
            if override_path.exists() {
                settings = Self::read_file(&override_path)?;
                println!("✓ Overriding settings from {}", override_path.display());
            } else {
                println!(
                    "ℹ {CONFIG_DIR_ENV} set but no {SETTINGS_FILE} found at: {}",
                    override_path.display()
                );
            }
        }

        Ok(settings)
    }

    fn read_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        basic_toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_webauthn_env_overrides(&mut settings.webauthn);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(host) = std::env::var("HOST") {
            app_settings.host = host;
        }
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                app_settings.port = port;
            }
        }
    }

    fn apply_webauthn_env_overrides(webauthn: &mut WebAuthnSettings) {
        if let Ok(rp_id) = std::env::var("RP_ID") {
            webauthn.rp_id = rp_id;
        }
        if let Ok(rp_name) = std::env::var("RP_NAME") {
            webauthn.rp_name = rp_name;
        }
        if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
            webauthn.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Ok(ttl_str) = std::env::var("CHALLENGE_TTL_SECONDS") {
            if let Ok(ttl) = ttl_str.parse::<u64>() {
                webauthn.challenge_ttl_seconds = ttl;
            }
        }
    }

    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging_settings.level = log_level;
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Get the bind address for the server
    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webauthn::UserVerification;
    use serial_test::serial;

    fn clean_env_vars() {
        for var in [
            "HOST",
            "PORT",
            "RP_ID",
            "RP_NAME",
            "ALLOWED_ORIGINS",
            "CHALLENGE_TTL_SECONDS",
            "RUST_LOG",
            CONFIG_DIR_ENV,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let settings = RpSettings::default();
        assert_eq!(settings.get_bind_address(), "0.0.0.0:5001");
        assert_eq!(settings.webauthn.rp_name, "SwingIn App");
        assert_eq!(settings.webauthn.user_verification, UserVerification::Required);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: RpSettings = basic_toml::from_str(
            r#"
            [webauthn]
            rp_id = "example.com"
            allowed_origins = ["https://example.com"]
            user_verification = "preferred"
            "#,
        )
        .unwrap();

        assert_eq!(settings.webauthn.rp_id, "example.com");
        assert_eq!(settings.webauthn.allowed_origins, vec!["https://example.com"]);
        assert_eq!(settings.webauthn.user_verification, UserVerification::Preferred);
        assert_eq!(settings.webauthn.challenge_ttl_seconds, 60);
        assert_eq!(settings.application.port, 5001);
        assert_eq!(settings.webauthn.validate(), Ok(()));
    }

    #[test]
    fn test_config_dir_precedence() {
        let base_dir = tempfile::tempdir().unwrap();
        let override_dir = tempfile::tempdir().unwrap();
        let base_file = base_dir.path().join(SETTINGS_FILE);

        fs::write(&base_file, "[application]\nport = 7000\n").unwrap();
        let settings = RpSettings::load_from_paths(&base_file, None).unwrap();
        assert_eq!(settings.application.port, 7000);

        // Directory without a file leaves the base settings alone
        let settings = RpSettings::load_from_paths(&base_file, Some(override_dir.path())).unwrap();
        assert_eq!(settings.application.port, 7000);

        fs::write(
            override_dir.path().join(SETTINGS_FILE),
            "[webauthn]\nrp_name = \"Override\"\n",
        )
        .unwrap();
        let settings = RpSettings::load_from_paths(&base_file, Some(override_dir.path())).unwrap();
        assert_eq!(settings.webauthn.rp_name, "Override");
        assert_eq!(settings.application.port, 5001);
    }

    #[test]
    fn test_missing_files_yield_defaults_and_bad_toml_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join(SETTINGS_FILE);
        let settings = RpSettings::load_from_paths(&missing, None).unwrap();
        assert_eq!(settings.application.port, 5001);

        fs::write(&missing, "[application\nport = ").unwrap();
        let error = RpSettings::load_from_paths(&missing, None).unwrap_err();
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clean_env_vars();
        std::env::set_var("PORT", "8443");
        std::env::set_var("RP_ID", "example.com");
        std::env::set_var(
            "ALLOWED_ORIGINS",
            "https://example.com, https://app.example.com,,",
        );
        std::env::set_var("CHALLENGE_TTL_SECONDS", "120");
        std::env::set_var("RUST_LOG", "debug");

        let mut settings = RpSettings::default();
        RpSettings::apply_env_overrides(&mut settings);

        assert_eq!(settings.application.port, 8443);
        assert_eq!(settings.webauthn.rp_id, "example.com");
        assert_eq!(
            settings.webauthn.allowed_origins,
            vec!["https://example.com", "https://app.example.com"]
        );
        assert_eq!(settings.webauthn.challenge_ttl_seconds, 120);
        assert_eq!(settings.logging.level, "debug");

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_unparseable_numeric_env_is_ignored() {
        clean_env_vars();
        std::env::set_var("PORT", "not-a-port");
        std::env::set_var("CHALLENGE_TTL_SECONDS", "-5");

        let mut settings = RpSettings::default();
        RpSettings::apply_env_overrides(&mut settings);
        assert_eq!(settings.application.port, 5001);
        assert_eq!(settings.webauthn.challenge_ttl_seconds, 60);

        clean_env_vars();
    }
}

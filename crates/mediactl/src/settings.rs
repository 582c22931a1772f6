//! Worker settings and their command-line rendering.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::data_structures::AppData;
use crate::error::{Error, Result};

/// Engine log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerLogLevel {
    Debug,
    Warn,
    #[default]
    Error,
    None,
}

impl WorkerLogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerLogLevel::Debug => "debug",
            WorkerLogLevel::Warn => "warn",
            WorkerLogLevel::Error => "error",
            WorkerLogLevel::None => "none",
        }
    }
}

impl fmt::Display for WorkerLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine log tag, enabling debug output for one area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerLogTag {
    Info,
    Ice,
    Dtls,
    Rtp,
    Srtp,
    Rtcp,
    Rtx,
    Bwe,
    Score,
    Simulcast,
    Svc,
    Sctp,
    Message,
}

impl WorkerLogTag {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerLogTag::Info => "info",
            WorkerLogTag::Ice => "ice",
            WorkerLogTag::Dtls => "dtls",
            WorkerLogTag::Rtp => "rtp",
            WorkerLogTag::Srtp => "srtp",
            WorkerLogTag::Rtcp => "rtcp",
            WorkerLogTag::Rtx => "rtx",
            WorkerLogTag::Bwe => "bwe",
            WorkerLogTag::Score => "score",
            WorkerLogTag::Simulcast => "simulcast",
            WorkerLogTag::Svc => "svc",
            WorkerLogTag::Sctp => "sctp",
            WorkerLogTag::Message => "message",
        }
    }
}

/// Settings the engine is started with.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub log_level: WorkerLogLevel,
    pub log_tags: Vec<WorkerLogTag>,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
    pub dtls_certificate_file: Option<PathBuf>,
    pub dtls_private_key_file: Option<PathBuf>,
    pub app_data: AppData,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            log_level: WorkerLogLevel::Error,
            log_tags: Vec::new(),
            rtc_min_port: 10000,
            rtc_max_port: 59999,
            dtls_certificate_file: None,
            dtls_private_key_file: None,
            app_data: AppData::new(),
        }
    }
}

impl WorkerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.rtc_min_port > self.rtc_max_port {
            return Err(Error::Validation(format!(
                "rtcMinPort ({}) must not exceed rtcMaxPort ({})",
                self.rtc_min_port, self.rtc_max_port
            )));
        }
        if self.dtls_certificate_file.is_some() != self.dtls_private_key_file.is_some() {
            return Err(Error::Validation(
                "dtlsCertificateFile and dtlsPrivateKeyFile must be given together".to_string(),
            ));
        }
        Ok(())
    }

    /// Command-line arguments for the engine process.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![format!("--logLevel={}", self.log_level)];
        args.extend(
            self.log_tags
                .iter()
                .map(|tag| format!("--logTag={}", tag.as_str())),
        );
        args.push(format!("--rtcMinPort={}", self.rtc_min_port));
        args.push(format!("--rtcMaxPort={}", self.rtc_max_port));
        if let (Some(cert), Some(key)) = (&self.dtls_certificate_file, &self.dtls_private_key_file)
        {
            args.push(format!("--dtlsCertificateFile={}", cert.display()));
            args.push(format!("--dtlsPrivateKeyFile={}", key.display()));
        }
        args
    }
}

/// Settings that can be changed on a running worker.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerUpdateSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<WorkerLogLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_tags: Option<Vec<WorkerLogTag>>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn default_args() {
        assert_eq!(
            WorkerSettings::default().to_args(),
            vec![
                "--logLevel=error".to_string(),
                "--rtcMinPort=10000".to_string(),
                "--rtcMaxPort=59999".to_string(),
            ]
        );
    }

    #[test]
    fn args_with_tags_and_certificates() {
        let settings = WorkerSettings {
            log_level: WorkerLogLevel::Debug,
            log_tags: vec![WorkerLogTag::Ice, WorkerLogTag::Dtls],
            dtls_certificate_file: Some(PathBuf::from("/etc/sfu/cert.pem")),
            dtls_private_key_file: Some(PathBuf::from("/etc/sfu/key.pem")),
            ..Default::default()
        };
        let args = settings.to_args();
        assert_eq!(args[0], "--logLevel=debug");
        assert_eq!(args[1], "--logTag=ice");
        assert_eq!(args[2], "--logTag=dtls");
        assert_eq!(args[5], "--dtlsCertificateFile=/etc/sfu/cert.pem");
        assert_eq!(args[6], "--dtlsPrivateKeyFile=/etc/sfu/key.pem");
    }

    #[test]
    fn port_range_is_checked() {
        let settings = WorkerSettings {
            rtc_min_port: 50000,
            rtc_max_port: 40000,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Validation(_))));
        assert!(WorkerSettings::default().validate().is_ok());
    }

    #[test]
    fn update_settings_skip_unset_fields() {
        let update = WorkerUpdateSettings {
            log_level: Some(WorkerLogLevel::Warn),
            log_tags: None,
        };
        assert_eq!(
            serde_json::to_value(update).unwrap(),
            json!({ "logLevel": "warn" })
        );
    }
}

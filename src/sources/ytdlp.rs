use async_trait::async_trait;
use std::{path::PathBuf, process::Stdio};
use tracing::{debug, error, info};

use super::ladder::{AttemptPlan, Extractor};
use crate::error::ResolutionError;

/// Extractor que invoca `yt-dlp --dump-json` como subproceso.
pub struct YtDlpExtractor {
    binary: PathBuf,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Busca `./bin/yt-dlp` junto al proceso y si no usa el del PATH
    pub fn locate() -> PathBuf {
        let local = std::env::current_dir()
            .map(|cwd| cwd.join("bin").join("yt-dlp"))
            .ok()
            .filter(|p| p.exists());

        local.unwrap_or_else(|| PathBuf::from("yt-dlp"))
    }

    /// Argumentos de línea de comando para un intento
    pub fn build_args(plan: &AttemptPlan) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            plan.attempt.format.to_string(),
            "--no-playlist".to_string(),
            "--dump-json".to_string(),
            "--no-warnings".to_string(),
        ];

        if let Some(client) = plan.attempt.player_client {
            args.push("--extractor-args".to_string());
            args.push(format!("youtube:player_client={}", client));
        }

        if let Some(agent) = plan.attempt.user_agent {
            args.push("--user-agent".to_string());
            args.push(agent.to_string());
        }

        if let Some(cookies) = &plan.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.display().to_string());
        }

        args.push("--".to_string());
        args.push(plan.query.clone());
        args
    }

    /// Verifica que yt-dlp esté disponible
    pub async fn verify(&self) -> anyhow::Result<String> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .await?;

        if !output.status.success() {
            error!("❌ yt-dlp no puede ejecutarse correctamente");
            anyhow::bail!("yt-dlp no disponible");
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("✅ yt-dlp versión: {}", version);
        Ok(version)
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(&self, plan: &AttemptPlan) -> Result<String, ResolutionError> {
        let args = Self::build_args(plan);
        debug!("🔧 {} {}", self.binary.display(), args.join(" "));

        let output = tokio::process::Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ResolutionError::Process(format!("spawn {}: {}", self.binary.display(), e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(ResolutionError::Process(format!(
                "yt-dlp failed ({}): {}",
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                detail
            )));
        }

        Ok(stdout)
    }
}

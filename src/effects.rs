use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Filter chain keeping roughly the voice band.
pub const BAND_PASS_FILTER: &str = "highpass=f=200, lowpass=f=1500";

/// Arguments after the program name.
pub fn band_pass_args(prefix: Vec<String>, input: &Path, output: &Path) -> Vec<String> {
    let mut args = prefix;
    args.extend([
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-filter:a".to_string(),
        BAND_PASS_FILTER.to_string(),
        output.to_string_lossy().into_owned(),
    ]);
    args
}

/// Runs the media-processing binary to write a band-passed copy of `input`.
pub async fn apply_band_pass(config: &EngineConfig, input: &Path, output: &Path) -> Result<()> {
    let (program, prefix) = config.ffmpeg_program()?;
    let args = band_pass_args(prefix, input, output);
    debug!("Running {} {:?}", program, args);

    let result = Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| EngineError::EffectProcess(format!("failed to spawn {}: {}", program, e)))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
        return Err(EngineError::EffectProcess(format!(
            "{} exited with {}: {}",
            program, result.status, last
        )));
    }
    info!("Band-pass written to {:?}", output);
    Ok(())
}

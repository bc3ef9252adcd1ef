use std::ffi::OsString;
use std::path::PathBuf;

use tokio::process::Command;
use tracing::{error, info};

/// The transformation tool run once the load is complete (`dbt run ...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTool {
    pub command: String,
    pub project_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub profile: String,
    pub target: String,
    /// Model selection filter.
    pub select: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub success: bool,
    /// Captured stdout followed by stderr.
    pub output: String,
}

impl BuildTool {
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "run".into(),
            "--project-dir".into(),
            self.project_dir.clone().into(),
            "--profiles-dir".into(),
            self.profiles_dir.clone().into(),
            "--profile".into(),
            self.profile.clone().into(),
            "--target".into(),
            self.target.clone().into(),
        ];
        if let Some(select) = &self.select {
            args.push("--select".into());
            args.push(select.into());
        }
        args
    }

    /// Run the tool to completion. Failing to start it counts as a failed build.
    pub async fn run(&self) -> BuildOutcome {
        info!(
            "Running {} against target {} (select: {})",
            self.command,
            self.target,
            self.select.as_deref().unwrap_or("all")
        );

        let outcome = match Command::new(&self.command)
            .args(self.args())
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                BuildOutcome {
                    success: output.status.success(),
                    output: text,
                }
            }
            Err(e) => BuildOutcome {
                success: false,
                output: format!("Failed to run {}: {e}", self.command),
            },
        };

        if outcome.success {
            info!("{} finished successfully", self.command);
        } else {
            error!("{} failed:\n{}", self.command, outcome.output);
        }
        outcome
    }
}

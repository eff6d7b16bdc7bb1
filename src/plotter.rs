use crate::command::{self, CommandOutcome};
use crate::error::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct PlotOutcome {
    #[serde(flatten)]
    pub run: CommandOutcome,
    /// Where the job's output image is served, if it lies in the static directory.
    pub image_url: Option<String>,
}

/// The external job that turns the picked CMYK mix into plotter output.
#[derive(Clone)]
pub struct PlotterJob {
    command: Option<String>,
    output_image: PathBuf,
    static_dir: PathBuf,
}

impl PlotterJob {
    pub fn new(command: Option<String>, output_image: PathBuf, static_dir: PathBuf) -> Self {
        Self {
            command,
            output_image,
            static_dir,
        }
    }

    pub async fn run(&self) -> Result<PlotOutcome> {
        let Some(job) = &self.command else {
            return Err(Error::NotFound("no plot command configured".to_string()));
        };

        let run = command::run(job, std::iter::empty::<&str>()).await;
        if !run.success {
            let reason = match (&run.error, run.exit_code) {
                (Some(e), _) => e.clone(),
                (None, Some(code)) => format!("exit code {code}"),
                (None, None) => "terminated by signal".to_string(),
            };
            return Err(Error::CommandFailed(format!("{job}: {reason}")));
        }

        Ok(PlotOutcome {
            run,
            image_url: static_url(&self.static_dir, &self.output_image),
        })
    }
}

/// URL under `/static` for `file`, when it lives inside `static_dir`.
pub fn static_url(static_dir: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(static_dir).ok()?;
    let segments: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    if segments.is_empty() {
        return None;
    }
    Some(format!("/static/{}", segments.join("/")))
}

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{ensure, Context};
use log::{debug, info};

/// Typed argument-list builder for the external tools the pipeline drives.
/// Arguments are collected as discrete strings and handed to the process
/// spawner directly - nothing ever passes through a shell.
pub struct ToolCommand {
    label: &'static str,
    program: String,
    args: Vec<OsString>,
    stderr: Option<File>,
}

impl ToolCommand {
    pub fn executable(label: &'static str, program: &str) -> ToolCommand {
        ToolCommand {
            label,
            program: program.into(),
            args: Vec::new(),
            stderr: None,
        }
    }

    /// A tool distributed as a Python module, run as `<python> -m <module>`.
    pub fn python_module(label: &'static str, python: &str, module: &str) -> ToolCommand {
        let mut command = ToolCommand::executable(label, python);
        command.args.push("-m".into());
        command.args.push(module.into());
        command
    }

    pub fn arg(mut self, value: impl AsRef<OsStr>) -> ToolCommand {
        self.args.push(value.as_ref().to_os_string());
        self
    }

    pub fn option(mut self, option: &str, value: impl AsRef<OsStr>) -> ToolCommand {
        self.args.push(option.into());
        self.args.push(value.as_ref().to_os_string());
        self
    }

    pub fn flag(mut self, flag: &str) -> ToolCommand {
        self.args.push(flag.into());
        self
    }

    pub fn stderr_file(mut self, path: &Path) -> anyhow::Result<ToolCommand> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file `{}`", path.display()))?;
        self.stderr = Some(file);
        Ok(self)
    }

    /// Run the tool to completion. A non-zero exit is fatal to the pipeline.
    pub fn run(self) -> anyhow::Result<()> {
        debug!("{}: {} {:?}", self.label, self.program, self.args);
        info!("running {}", self.label);
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(file) = self.stderr {
            command.stderr(Stdio::from(file));
        }
        let status = command.status().with_context(|| {
            format!("Failed to launch {} (`{}`)", self.label, self.program)
        })?;
        ensure!(
            status.success(),
            "{} (`{}`) exited with {}",
            self.label,
            self.program,
            status
        );
        Ok(())
    }
}

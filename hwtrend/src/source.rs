//! Where snapshots come from.

use std::process::Command;

use tracing::debug;

use crate::error::{CollectorError, Result};
use crate::snapshot::Snapshot;

/// Produces one snapshot of all current sensor readings per call.
pub trait SampleSource {
    /// Takes a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError`] if no snapshot could be taken. The caller
    /// skips the cycle.
    fn sample(&mut self) -> Result<Snapshot>;
}

impl<F> SampleSource for F
where
    F: FnMut() -> Result<Snapshot>,
{
    fn sample(&mut self) -> Result<Snapshot> {
        self()
    }
}

/// Runs lm-sensors' `sensors -j` and parses its output.
#[derive(Debug, Clone)]
pub struct SensorsCommand {
    program: String,
    args: Vec<String>,
}

impl Default for SensorsCommand {
    fn default() -> Self {
        Self::new("sensors")
    }
}

impl SensorsCommand {
    /// Runs `program -j`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec!["-j".to_string()],
        }
    }

    /// Runs `program` with custom arguments instead of `-j`.
    pub fn with_args<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl SampleSource for SensorsCommand {
    fn sample(&mut self) -> Result<Snapshot> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|source| CollectorError::Spawn {
                command: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CollectorError::CommandFailed {
                command: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        debug!(command = %self.program, bytes = output.stdout.len(), "sensor command finished");
        let stdout = String::from_utf8_lossy(&output.stdout);
        Snapshot::parse(&stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::HwtrendError;

    #[test]
    fn test_command_output_is_parsed() {
        let mut source = SensorsCommand::with_args("echo", [r#"{"dev-isa-0001": {"temp1": {"temp1_input": 40.5}}}"#]);
        let snapshot = source.sample().unwrap();
        assert_eq!(snapshot.leaf_count(), 1);
    }

    #[test]
    fn test_missing_program() {
        let mut source = SensorsCommand::new("/nonexistent/sensors");
        assert!(matches!(
            source.sample(),
            Err(HwtrendError::Collector(CollectorError::Spawn { .. }))
        ));
    }

    #[test]
    fn test_failing_command() {
        let mut source = SensorsCommand::with_args("false", Vec::<String>::new());
        assert!(matches!(
            source.sample(),
            Err(HwtrendError::Collector(CollectorError::CommandFailed { .. }))
        ));
    }

    #[test]
    fn test_malformed_output() {
        let mut source = SensorsCommand::with_args("echo", ["not json"]);
        assert!(matches!(
            source.sample(),
            Err(HwtrendError::Collector(CollectorError::Malformed { .. }))
        ));
    }

    #[test]
    fn test_closure_source() {
        let mut calls = 0;
        let mut source = || {
            calls += 1;
            Snapshot::parse("{}")
        };
        assert!(SampleSource::sample(&mut source).is_ok());
        drop(source);
        assert_eq!(calls, 1);
    }
}

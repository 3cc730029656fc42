//! Scripted command runner for unit tests

use super::CommandRunner;
use crate::error::CommandFailure;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Answers commands by substring match and records every invocation
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    rules: Vec<(String, Result<Vec<u8>, CommandFailure>)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reply with `stdout` to the first command containing `needle`
    pub(crate) fn on(mut self, needle: &str, stdout: &str) -> Self {
        self.rules
            .push((needle.to_string(), Ok(stdout.as_bytes().to_vec())));
        self
    }

    /// Fail the first command containing `needle`
    pub(crate) fn fail(mut self, needle: &str, failure: CommandFailure) -> Self {
        self.rules.push((needle.to_string(), Err(failure)));
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_containing(&self, needle: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains(needle))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &str, _timeout: Duration) -> Result<Vec<u8>, CommandFailure> {
        self.calls.lock().unwrap().push(command.to_string());
        self.rules
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or(Err(CommandFailure::NonZeroExit(127)))
    }
}

//! Local `espeak-ng | sox | aplay` pipeline
//!
//! Each stage is spawned with its own argument vector and the stages are
//! connected through OS pipes; no shell is involved, so the spoken text is
//! only ever a single argument to the synthesizer.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::{Child, Command};

use super::SpeechBackend;
use crate::voice::audio::BackendResult;
use crate::voice::request::{Backend, SynthesisRequest};
use crate::{Error, Result};

/// A program and its fixed arguments
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Build from an argv slice; the first element is the program
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `argv` is empty
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Config("command must not be empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);
        command
    }
}

/// Synthesize, filter and play stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPipeline {
    /// Writes WAV to stdout; receives the text as its last argument
    pub synth: CommandSpec,
    /// Reads WAV on stdin, writes processed WAV to stdout
    pub effects: CommandSpec,
    /// Plays WAV from stdin
    pub player: CommandSpec,
}

impl Default for LocalPipeline {
    fn default() -> Self {
        Self {
            synth: CommandSpec::new(
                "espeak-ng",
                &["-s", "140", "-p", "50", "-v", "en-us+m3", "--stdout"],
            ),
            effects: CommandSpec::new(
                "sox",
                &[
                    "-t", "wav", "-", "-c", "1", "-t", "wav", "-", "gain", "0.0", "reverb", "30",
                    "highpass", "500", "lowpass", "3000",
                ],
            ),
            player: CommandSpec::new("aplay", &["-q"]),
        }
    }
}

impl LocalPipeline {
    /// Argument vector for the synthesizer stage
    #[must_use]
    pub fn synth_args(&self, text: &str) -> Vec<String> {
        let mut args = self.synth.args.clone();
        // espeak-ng reads a leading dash as an option
        if text.starts_with('-') {
            args.push(format!(" {text}"));
        } else {
            args.push(text.to_string());
        }
        args
    }

    /// Run all three stages to completion
    async fn run(&self, text: &str) -> Result<()> {
        let mut synth = Command::new(&self.synth.program);
        synth
            .args(self.synth_args(text))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut synth = spawn(&self.synth.program, &mut synth)?;
        let synth_out: Stdio = take_stdout(&mut synth, &self.synth.program)?;

        let mut effects = self.effects.command();
        effects
            .stdin(synth_out)
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut effects = spawn(&self.effects.program, &mut effects)?;
        let effects_out: Stdio = take_stdout(&mut effects, &self.effects.program)?;

        let mut player = self.player.command();
        player.stdin(effects_out).stderr(Stdio::piped());
        let player = spawn(&self.player.program, &mut player)?;

        let player_output = player
            .wait_with_output()
            .await
            .map_err(|e| wait_failed(&self.player.program, &e))?;
        let effects_status = effects
            .wait()
            .await
            .map_err(|e| wait_failed(&self.effects.program, &e))?;
        let synth_status = synth
            .wait()
            .await
            .map_err(|e| wait_failed(&self.synth.program, &e))?;

        if !player_output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&player_output.stderr);
            tracing::debug!(stderr = %stderr, "player stderr");
        }

        for (program, status) in [
            (&self.synth.program, synth_status),
            (&self.effects.program, effects_status),
            (&self.player.program, player_output.status),
        ] {
            if !status.success() {
                let code = status.code().unwrap_or(-1);
                return Err(Error::provider(format!("`{program}` exited with code {code}")));
            }
        }

        Ok(())
    }
}

fn spawn(program: &str, command: &mut Command) -> Result<Child> {
    command
        .spawn()
        .map_err(|e| Error::provider(format!("failed to start `{program}`: {e}")))
}

fn wait_failed(program: &str, e: &std::io::Error) -> Error {
    Error::provider(format!("failed waiting for `{program}`: {e}"))
}

fn take_stdout(child: &mut Child, program: &str) -> Result<Stdio> {
    child
        .stdout
        .take()
        .ok_or_else(|| Error::provider(format!("`{program}` has no stdout")))?
        .try_into()
        .map_err(|e: std::io::Error| Error::provider(format!("failed to pipe `{program}`: {e}")))
}

/// Speaks through the local pipeline; audio never comes back to the caller
pub struct LocalBackend {
    pipeline: LocalPipeline,
}

impl LocalBackend {
    #[must_use]
    pub const fn new(pipeline: LocalPipeline) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl SpeechBackend for LocalBackend {
    fn backend(&self) -> Backend {
        Backend::Local
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<BackendResult> {
        tracing::debug!(synth = %self.pipeline.synth.program, "running local TTS pipeline");
        self.pipeline.run(&request.text).await?;
        Ok(BackendResult::AlreadyPlayed)
    }
}

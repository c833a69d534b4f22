// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide a scripted in-memory RemoteShell for tests.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::{RemoteShell, ShellOutput};

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// `adb shell` with the recorded argv.
    Shell(Vec<String>),
    /// `adb pull` from the remote path to the local path.
    Pull {
        /// Remote source path.
        remote: String,
        /// Local destination path.
        local: PathBuf,
    },
}

#[derive(Debug)]
struct Rule {
    prefix: Vec<String>,
    output: ShellOutput,
}

#[derive(Debug)]
struct ScriptState {
    rules: Vec<Rule>,
    fallback: ShellOutput,
    pull: ShellOutput,
    calls: Vec<Invocation>,
}

/// Transport answering from scripted responses and recording every call.
///
/// Responses are matched by argv prefix; the most recently added matching
/// rule wins, so tests can re-script a command to model remote changes.
/// Successful pulls write the scripted stdout to the local path.
#[derive(Debug)]
pub struct ScriptedShell {
    state: Mutex<ScriptState>,
}

impl Default for ScriptedShell {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedShell {
    /// Create a shell where every unscripted command exits with status 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScriptState {
                rules: Vec::new(),
                fallback: ShellOutput::failed(1, "unscripted command"),
                pull: ShellOutput::completed(Vec::new()),
                calls: Vec::new(),
            }),
        }
    }

    /// Answer commands starting with `prefix` using `output`.
    pub fn respond(&self, prefix: &[&str], output: ShellOutput) {
        let mut state = self.state.lock().expect("scripted shell lock");
        state.rules.push(Rule {
            prefix: prefix.iter().map(|part| (*part).to_owned()).collect(),
            output,
        });
    }

    /// Answer pulls using `output`.
    pub fn respond_to_pull(&self, output: ShellOutput) {
        self.state.lock().expect("scripted shell lock").pull = output;
    }

    /// Return every call recorded so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().expect("scripted shell lock").calls.clone()
    }

    /// Return the argv of every shell call recorded so far.
    #[must_use]
    pub fn shell_calls(&self) -> Vec<Vec<String>> {
        self.invocations()
            .into_iter()
            .filter_map(|call| match call {
                Invocation::Shell(argv) => Some(argv),
                Invocation::Pull { .. } => None,
            })
            .collect()
    }

    /// Return the number of calls of either kind.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock().expect("scripted shell lock").calls.len()
    }

    /// Forget recorded calls while keeping the script.
    pub fn clear_calls(&self) {
        self.state.lock().expect("scripted shell lock").calls.clear();
    }
}

impl RemoteShell for ScriptedShell {
    fn execute(&self, argv: &[String]) -> ShellOutput {
        let mut state = self.state.lock().expect("scripted shell lock");
        state.calls.push(Invocation::Shell(argv.to_vec()));
        state
            .rules
            .iter()
            .rev()
            .find(|rule| argv.starts_with(&rule.prefix))
            .map(|rule| rule.output.clone())
            .unwrap_or_else(|| state.fallback.clone())
    }

    fn pull(&self, remote: &str, local: &Path) -> ShellOutput {
        let mut state = self.state.lock().expect("scripted shell lock");
        state.calls.push(Invocation::Pull {
            remote: remote.to_owned(),
            local: local.to_owned(),
        });
        let output = state.pull.clone();
        if output.success() {
            if let Err(err) = fs::write(local, &output.stdout) {
                return ShellOutput::failed(1, format!("write {}: {err}", local.display()));
            }
        }
        output
    }
}

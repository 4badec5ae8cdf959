//! Shared test doubles.

#![allow(dead_code)]

use async_trait::async_trait;
use gantry_core::{Error, Result};
use gantry_integration::CommandRunner;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Route `tracing` output through the test harness.
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,gantry_integration=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A command as seen by [`ScriptedRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub cmd: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Call {
    pub fn line(&self) -> String {
        self.cmd.join(" ")
    }
}

/// Records commands and answers them from a script.
///
/// A response applies to every command whose joined text starts with its
/// prefix; unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Mutex<Vec<(String, std::result::Result<String, i32>)>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, prefix: &str, output: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push((prefix.to_string(), Ok(output.to_string())));
        self
    }

    pub fn fail(self, prefix: &str, exit_code: i32) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push((prefix.to_string(), Err(exit_code)));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls().iter().map(Call::line).collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn check_output(&self, cmd: &[String], cwd: Option<&Path>) -> Result<String> {
        let call = Call {
            cmd: cmd.to_vec(),
            cwd: cwd.map(Path::to_path_buf),
        };
        let line = call.line();
        self.calls.lock().unwrap().push(call);
        let responses = self.responses.lock().unwrap();
        match responses.iter().find(|(prefix, _)| line.starts_with(prefix.as_str())) {
            Some((_, Ok(output))) => Ok(output.clone()),
            Some((_, Err(code))) => Err(Error::CommandFailed {
                command: line,
                exit_code: Some(*code),
            }),
            None => Ok(String::new()),
        }
    }
}

pub const HEAD_GROMACS: &str = "1111111111111111111111111111111111111111";
pub const HEAD_RELENG: &str = "2222222222222222222222222222222222222222";

/// Change record as printed by `gerrit query --format=JSON`.
pub fn change_json(project: &str, branch: &str, number: u64, patchset: u64, revision: &str) -> String {
    let stats = r#"{"type":"stats","rowCount":1}"#;
    format!(
        concat!(
            r#"{{"project":"{}","branch":"{}","number":"{}","subject":"Change {}","#,
            r#""url":"https://gerrit.example.org/{}","open":true,"#,
            r#""currentPatchSet":{{"number":"{}","revision":"{}","ref":"refs/changes/{:02}/{}/{}"}}}}"#,
            "\n{}\n"
        ),
        project,
        branch,
        number,
        number,
        number,
        patchset,
        revision,
        number % 100,
        number,
        patchset,
        stats
    )
}

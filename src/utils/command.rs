/// Functions and structs for building command lines and running external tools

use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use anyhow::{anyhow, Result};
use log::debug;
use tokio::process::Command;
use tokio::time::timeout;
use crate::utils::streams::read_lines;


/// Structured result of one external invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutcome {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub timed_out: bool,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ToolOutcome {
    /// Short human-readable reason for a failed run.
    pub fn failure_reason(&self) -> String {
        if self.timed_out {
            return "timed out".to_string();
        }
        let code = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        match self.stderr.iter().rev().find(|l| !l.trim().is_empty()) {
            Some(last) => format!("exit {}: {}", code, last.trim()),
            None => format!("exit {}", code),
        }
    }
}


/// A whitespace-separated program line such as `python3 /opt/translator.py`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramLine {
    pub program: String,
    pub args: Vec<String>,
}

impl ProgramLine {
    pub fn parse(line: &str) -> Result<ProgramLine> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("Empty program line"))?;
        Ok(ProgramLine {
            program,
            args: parts.collect(),
        })
    }
}


/// Finds an executable without running it: paths containing a separator are
/// checked directly, bare names are searched on PATH.
pub fn locate_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}


/// Runs a tool to completion, capturing stdout and stderr.
///
/// The child is killed if `limit` elapses or if the returned future is
/// dropped before completion.
///
/// # Arguments
///
/// * `tag` - Tool name for messages.
/// * `program` - Executable.
/// * `args` - Arguments.
/// * `cwd` - Optional working directory.
/// * `limit` - Wall-clock limit.
///
/// # Returns
/// ToolOutcome; Err only when the process cannot be started or read.
pub async fn run_tool(
    tag: &str,
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    limit: Duration,
) -> Result<ToolOutcome> {
    debug!("{} command: {} {}", tag, program, args.join(" "));

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| anyhow!("Failed to spawn {}: {}. Is {} installed?", program, e, tag))?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let finished = timeout(limit, async {
        let (stdout, stderr) = tokio::try_join!(
            async {
                match stdout_pipe {
                    Some(p) => read_lines(p).await,
                    None => Ok(Vec::new()),
                }
            },
            async {
                match stderr_pipe {
                    Some(p) => read_lines(p).await,
                    None => Ok(Vec::new()),
                }
            }
        )?;
        let status = child.wait().await?;
        Ok::<_, anyhow::Error>((status, stdout, stderr))
    })
    .await;

    match finished {
        Ok(result) => {
            let (status, stdout, stderr) = result?;
            Ok(ToolOutcome {
                exit_code: status.code(),
                success: status.success(),
                timed_out: false,
                stdout,
                stderr,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            Ok(ToolOutcome {
                timed_out: true,
                ..ToolOutcome::default()
            })
        }
    }
}


/// Runs `<program> <version_flag>` and returns the first non-empty line it
/// prints on stdout, or stderr when stdout is empty.
pub async fn tool_version(tag: &str, program: &str, version_flag: &str) -> Result<String> {
    let outcome = run_tool(tag, program, &[version_flag.to_string()], None, Duration::from_secs(30)).await?;
    outcome
        .stdout
        .iter()
        .chain(outcome.stderr.iter())
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
        .ok_or_else(|| anyhow!("No output from {} {}", program, version_flag))
}


pub mod pandaseq {
    use std::path::Path;
    use crate::config::defs::PANDASEQ_DEFAULTS;

    /// Inputs for one lane's join.
    pub struct PandaseqConfig<'a> {
        pub r1: &'a Path,
        pub r2: &'a Path,
        pub out_fastq: &'a Path,
        pub log: &'a Path,
        pub threads: u32,
        pub primers: Option<(&'a str, &'a str)>,
        pub extra_flags: Option<&'a str>,
    }

    /// Splits a free-form flag string into `(flag, value)` pairs. A token is a
    /// flag when it is `-` followed by a letter; the next non-flag token is its value.
    pub fn parse_extra_flags(extra: &str) -> Vec<(String, Option<String>)> {
        let is_flag = |t: &str| {
            let mut chars = t.chars();
            chars.next() == Some('-') && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        };

        let tokens: Vec<&str> = extra.split_whitespace().collect();
        let mut fields = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            if is_flag(token) {
                match tokens.get(i + 1) {
                    Some(&next) if !is_flag(next) => {
                        fields.push((token.to_string(), Some(next.to_string())));
                        i += 2;
                    }
                    _ => {
                        fields.push((token.to_string(), None));
                        i += 1;
                    }
                }
            } else {
                fields.push((token.to_string(), None));
                i += 1;
            }
        }
        fields
    }

    pub fn arg_generator(config: &PandaseqConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-f".to_string());
        args_vec.push(config.r1.to_string_lossy().to_string());
        args_vec.push("-r".to_string());
        args_vec.push(config.r2.to_string_lossy().to_string());
        args_vec.push("-F".to_string());
        args_vec.push("-T".to_string());
        args_vec.push(config.threads.to_string());
        args_vec.push("-w".to_string());
        args_vec.push(config.out_fastq.to_string_lossy().to_string());
        args_vec.push("-g".to_string());
        args_vec.push(config.log.to_string_lossy().to_string());

        if let Some((forward, reverse)) = config.primers {
            args_vec.push("-p".to_string());
            args_vec.push(forward.to_string());
            args_vec.push("-q".to_string());
            args_vec.push(reverse.to_string());
        }

        let extra = config.extra_flags.map(parse_extra_flags).unwrap_or_default();
        for (flag, value) in PANDASEQ_DEFAULTS {
            if extra.iter().any(|(f, _)| f == flag) {
                continue;
            }
            args_vec.push(flag.to_string());
            if let Some(v) = value {
                args_vec.push(v.to_string());
            }
        }
        for (flag, value) in extra {
            args_vec.push(flag);
            if let Some(v) = value {
                args_vec.push(v);
            }
        }
        args_vec
    }
}


pub mod translator {
    use std::path::{Path, PathBuf};
    use crate::utils::command::ProgramLine;

    /// Arguments for the translator: its own program-line arguments followed
    /// by the counts file name. It runs inside the counts directory.
    pub fn arg_generator(line: &ProgramLine, counts_file: &Path) -> Vec<String> {
        let mut args_vec = line.args.clone();
        let name = counts_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        args_vec.push(name);
        args_vec
    }

    /// Where the translator leaves its un-merged table: the argument's text
    /// before the first `.`, plus `.aa.dup.txt`, in its working directory.
    pub fn output_path(counts_file: &Path) -> PathBuf {
        let name = counts_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let stem = name.split('.').next().unwrap_or("");
        let dir = counts_file.parent().unwrap_or_else(|| Path::new("."));
        dir.join(format!("{}.aa.dup.txt", stem))
    }
}


pub mod identity {
    use std::path::Path;
    use crate::utils::command::ProgramLine;

    pub fn arg_generator(line: &ProgramLine, counts_file: &Path) -> Vec<String> {
        let mut args_vec = line.args.clone();
        args_vec.push("-file".to_string());
        args_vec.push(counts_file.to_string_lossy().to_string());
        args_vec
    }
}

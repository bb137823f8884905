//! Target launch configuration
//!
//! Splits a raw argument vector into VM options and program arguments
//! the way the JVM launcher does, and spawns the target with its
//! standard streams piped so failed launches can be reported with the
//! child's output.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use crate::common::{DiagnosticsSink, Error, Result};
use crate::vm::VmConnection;

/// How to start the target process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub main_class: String,
    pub vm_options: Vec<String>,
    pub program_args: Vec<String>,
    pub class_path: Option<String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(main_class: impl Into<String>) -> Self {
        Self { main_class: main_class.into(), ..Default::default() }
    }

    /// Classify a raw launcher argument vector.
    ///
    /// Everything before the main class that looks like a VM flag goes
    /// to `vm_options`; the first bare token is the main class and the
    /// rest are program arguments. `-help` and `-version` are launcher
    /// directives, not launchable configurations.
    pub fn from_args(argv: &[&str]) -> Result<Self> {
        let mut spec = Self::default();
        let mut iter = argv.iter().peekable();

        while let Some(&&arg) = iter.peek() {
            if !spec.main_class.is_empty() {
                break;
            }
            match arg {
                "-classpath" | "-cp" => {
                    iter.next();
                    let path = iter.next().ok_or_else(|| {
                        Error::Internal(format!("{arg} requires an argument"))
                    })?;
                    spec.class_path = Some(path.to_string());
                }
                "-help" | "-?" => {
                    return Err(Error::Internal("-help is not a launchable option".into()))
                }
                "-version" => {
                    return Err(Error::Internal("-version is not a launchable option".into()))
                }
                _ if arg == "-v" || arg.starts_with("-verbose") => {
                    spec.vm_options.push(format!("-verbose{}", &arg[usize::min(arg.len(), 8)..]));
                    iter.next();
                }
                _ if arg.starts_with("-D") || arg.starts_with("-X") => {
                    spec.vm_options.push(arg.to_string());
                    iter.next();
                }
                // Legacy flags the launcher still accepts.
                "-noasyncgc" | "-prof" | "-verify" | "-noverify" | "-verifyremote" | "-ss"
                | "-oss" | "-ms" | "-mx" => {
                    spec.vm_options.push(arg.to_string());
                    iter.next();
                }
                _ if arg.starts_with('-') => {
                    return Err(Error::Internal(format!("Unrecognized option: {arg}")));
                }
                _ => {
                    spec.main_class = arg.to_string();
                    iter.next();
                }
            }
        }

        if spec.main_class.is_empty() {
            return Err(Error::Internal("No main class specified".into()));
        }
        spec.program_args = iter.map(|s| s.to_string()).collect();
        Ok(spec)
    }

    /// Rendering of this spec as a launcher command line.
    pub fn command_line(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for opt in &self.vm_options {
            parts.push(opt);
        }
        if let Some(cp) = &self.class_path {
            parts.push("-cp");
            parts.push(cp);
        }
        parts.push(&self.main_class);
        for arg in &self.program_args {
            parts.push(arg);
        }
        parts.join(" ")
    }
}

/// Spawn the target process with piped standard streams.
///
/// If the child exits immediately, its output is captured into the
/// returned error so launch failures show the real cause (bad class
/// path, missing main class) instead of a bare exit status.
pub async fn launch_target(java_cmd: &str, spec: &LaunchSpec) -> Result<Child> {
    let mut command = Command::new(java_cmd);
    for opt in &spec.vm_options {
        command.arg(opt);
    }
    if let Some(cp) = &spec.class_path {
        command.arg("-cp").arg(cp);
    }
    command.arg(&spec.main_class);
    for arg in &spec.program_args {
        command.arg(arg);
    }
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }
    command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| Error::LaunchFailure {
        main_class: spec.main_class.clone(),
        reason: e.to_string(),
        output: String::new(),
    })?;

    // Give a doomed child a moment to fail, so bad command lines are
    // reported with the child's own complaint.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    if let Some(status) = child.try_wait()? {
        let output = dump_failed_launch(&mut child).await;
        return Err(Error::LaunchFailure {
            main_class: spec.main_class.clone(),
            reason: format!("target exited with {status}"),
            output,
        });
    }
    Ok(child)
}

async fn dump_failed_launch(child: &mut Child) -> String {
    let mut output = String::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_string(&mut output).await;
    }
    if let Some(mut stdout) = child.stdout.take() {
        let mut out = String::new();
        let _ = stdout.read_to_string(&mut out).await;
        if !out.is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&out);
        }
    }
    output
}

/// Produces live connections for a session. The production connector
/// launches the target and attaches over the platform debug transport;
/// tests substitute one that hands back a scripted connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn launch(
        &self,
        spec: &LaunchSpec,
        diagnostics: &dyn DiagnosticsSink,
    ) -> Result<Arc<dyn VmConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_vm_options_before_main_class() {
        let spec = LaunchSpec::from_args(&[
            "-Dapp.mode=dev",
            "-Xmx512m",
            "-cp",
            "build/classes",
            "com.example.Main",
            "--flag",
            "value",
        ])
        .unwrap();
        assert_eq!(spec.vm_options, vec!["-Dapp.mode=dev", "-Xmx512m"]);
        assert_eq!(spec.class_path.as_deref(), Some("build/classes"));
        assert_eq!(spec.main_class, "com.example.Main");
        assert_eq!(spec.program_args, vec!["--flag", "value"]);
    }

    #[test]
    fn args_after_main_class_are_program_args() {
        let spec = LaunchSpec::from_args(&["Main", "-Dnot.a.vm.option"]).unwrap();
        assert!(spec.vm_options.is_empty());
        assert_eq!(spec.program_args, vec!["-Dnot.a.vm.option"]);
    }

    #[test]
    fn help_and_unknown_flags_are_rejected() {
        assert!(LaunchSpec::from_args(&["-help"]).is_err());
        assert!(LaunchSpec::from_args(&["-version", "Main"]).is_err());
        assert!(LaunchSpec::from_args(&["-bogus", "Main"]).is_err());
        assert!(LaunchSpec::from_args(&[]).is_err());
    }

    #[test]
    fn command_line_round_trip() {
        let spec = LaunchSpec::from_args(&["-Xss1m", "-cp", "lib", "Main", "a"]).unwrap();
        assert_eq!(spec.command_line(), "-Xss1m -cp lib Main a");
    }

    #[tokio::test]
    async fn failed_launch_captures_child_output() {
        // `false` exits nonzero immediately with no output; use sh to
        // also produce stderr text.
        let spec = LaunchSpec {
            main_class: "-c".into(),
            program_args: vec!["echo doomed >&2; exit 3".into()],
            ..Default::default()
        };
        let err = launch_target("sh", &spec).await.unwrap_err();
        match err {
            Error::LaunchFailure { output, .. } => assert!(output.contains("doomed")),
            other => panic!("unexpected error: {other}"),
        }
    }
}

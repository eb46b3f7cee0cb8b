//! Long-lived ExifTool process.
//!
//! `exiftool -stay_open True -@ -` reads argument lines from stdin and
//! answers each `-execute` with its output followed by a `{ready}` line, so
//! one process serves every extraction of a run.

use parking_lot::Mutex;
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use super::ToolError;
use crate::asset::MetadataBag;
use crate::debug;

const PROGRAM: &str = "exiftool";
const READY: &str = "{ready}";

struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Handle to the shared metadata-extraction process.
///
/// Acquire it before the stage runner starts and release it with
/// [`ExifToolSession::close`]; dropping the handle closes it as well.
pub struct ExifToolSession {
    session: Mutex<Option<Session>>,
}

impl ExifToolSession {
    /// Start the process. A missing `exiftool` yields a closed session whose
    /// extractions fail per asset.
    pub fn start() -> Self {
        let spawned = Command::new(PROGRAM)
            .args(["-stay_open", "True", "-@", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn();

        let session = match spawned {
            Ok(mut child) => match (child.stdin.take(), child.stdout.take()) {
                (Some(stdin), Some(stdout)) => Some(Session {
                    child,
                    stdin,
                    stdout: BufReader::new(stdout),
                }),
                _ => None,
            },
            Err(e) => {
                debug!("exiftool"; "cannot start: {}", e);
                None
            }
        };

        Self {
            session: Mutex::new(session),
        }
    }

    /// A session that never started; every extraction fails.
    pub fn detached() -> Self {
        Self {
            session: Mutex::new(None),
        }
    }

    /// Numeric-valued tags of `path` as a flat key/value bag.
    pub fn extract(&self, path: &Path) -> Result<MetadataBag, ToolError> {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return Err(ToolError::Unavailable(PROGRAM));
        };

        match request(session, path) {
            Ok(output) => parse_output(&output),
            Err(e) => {
                // The process is unusable once the protocol breaks
                if let Some(mut broken) = guard.take() {
                    let _ = broken.child.kill();
                    let _ = broken.child.wait();
                }
                Err(e.into())
            }
        }
    }

    /// Ask the process to exit and wait for it.
    pub fn close(&self) {
        if let Some(mut session) = self.session.lock().take() {
            let _ = session.stdin.write_all(b"-stay_open\nFalse\n");
            let _ = session.stdin.flush();
            drop(session.stdin);
            let _ = session.child.wait();
            debug!("exiftool"; "session closed");
        }
    }
}

impl Drop for ExifToolSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn request(session: &mut Session, path: &Path) -> std::io::Result<String> {
    writeln!(session.stdin, "-json")?;
    writeln!(session.stdin, "-n")?;
    writeln!(session.stdin, "{}", path.display())?;
    writeln!(session.stdin, "-execute")?;
    session.stdin.flush()?;

    let mut output = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        if session.stdout.read_line(&mut line)? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "exiftool exited mid-request",
            ));
        }
        if line.trim_end() == READY {
            return Ok(output);
        }
        output.push_str(&line);
    }
}

/// Parse `-json` output: an array holding one object per file.
fn parse_output(output: &str) -> Result<MetadataBag, ToolError> {
    if output.trim().is_empty() {
        return Err(ToolError::Failed("exiftool returned no metadata".into()));
    }
    let value: Value = serde_json::from_str(output).map_err(|source| ToolError::Decode {
        tool: PROGRAM,
        source,
    })?;

    let Some(Value::Object(mut fields)) = value.as_array().and_then(|a| a.first()).cloned()
    else {
        return Err(ToolError::Failed("exiftool returned no metadata".into()));
    };
    if let Some(Value::String(error)) = fields.get("Error") {
        return Err(ToolError::Failed(format!("exiftool: {error}")));
    }
    fields.remove("SourceFile");
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_output() {
        let out = r#"[{"SourceFile":"/lib/a.mov","LivePhotoAuto":1,"CreateDate":"2023:06:01 10:00:00"}]"#;
        let fields = parse_output(out).unwrap();
        assert_eq!(fields.get("LivePhotoAuto"), Some(&json!(1)));
        assert!(!fields.contains_key("SourceFile"));
    }

    #[test]
    fn test_parse_output_errors() {
        assert!(matches!(parse_output(""), Err(ToolError::Failed(_))));
        assert!(matches!(parse_output("[]"), Err(ToolError::Failed(_))));
        assert!(matches!(parse_output("not json"), Err(ToolError::Decode { .. })));
        assert!(matches!(
            parse_output(r#"[{"SourceFile":"x","Error":"File not found"}]"#),
            Err(ToolError::Failed(_))
        ));
    }

    #[test]
    fn test_detached_session() {
        let session = ExifToolSession::detached();
        let err = session.extract(Path::new("/lib/a.jpg")).unwrap_err();
        assert!(matches!(err, ToolError::Unavailable("exiftool")));
        session.close();
    }
}

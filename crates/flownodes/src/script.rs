use async_trait::async_trait;
use flowcore::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("{0}")]
    Compile(String),

    #[error("{0}")]
    Runtime(String),

    #[error("script runtime unavailable: {0}")]
    Unavailable(String),
}

/// Executes a user script body as a strict-mode function of
/// `(globals, msg)` and yields its (awaited) return value.
#[async_trait]
pub trait ScriptRuntime: Send + Sync {
    async fn run(&self, script: &str, globals: &Message, msg: &Message) -> Result<Value, ScriptError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Interpreter executable
    pub program: String,
    /// Extra arguments placed before the harness
    pub args: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            program: "node".to_string(),
            args: Vec::new(),
            timeout_ms: 5000,
        }
    }
}

/// Reads `{script, globals, msg}` from stdin, writes one verdict object.
const HARNESS: &str = r#"
let input = '';
process.stdin.setEncoding('utf8');
process.stdin.on('data', (chunk) => { input += chunk; });
process.stdin.on('end', async () => {
  const { script, globals, msg } = JSON.parse(input);
  const emit = (verdict) => process.stdout.write(JSON.stringify(verdict));
  let fn;
  try {
    fn = new Function('globals', 'msg', '"use strict";\n' + script);
  } catch (e) {
    emit({ compileError: String(e) });
    return;
  }
  try {
    const result = await fn(globals, msg);
    emit({ ok: result === undefined ? null : result });
  } catch (e) {
    emit({ runtimeError: String(e) });
  }
});
"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum Verdict {
    Ok(Value),
    CompileError(String),
    RuntimeError(String),
}

/// Runs each script in a fresh interpreter child process
pub struct ProcessScriptRuntime {
    config: ScriptConfig,
}

impl ProcessScriptRuntime {
    pub fn new(config: ScriptConfig) -> Self {
        Self { config }
    }

    async fn spawn_and_collect(&self, request: Vec<u8>) -> Result<std::process::Output, ScriptError> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg("-e")
            .arg(HARNESS)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ScriptError::Unavailable(format!("failed to spawn {}: {}", self.config.program, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&request)
                .await
                .map_err(|e| ScriptError::Unavailable(format!("failed to write stdin: {}", e)))?;
        }

        child
            .wait_with_output()
            .await
            .map_err(|e| ScriptError::Unavailable(format!("failed to wait for interpreter: {}", e)))
    }
}

impl Default for ProcessScriptRuntime {
    fn default() -> Self {
        Self::new(ScriptConfig::default())
    }
}

#[async_trait]
impl ScriptRuntime for ProcessScriptRuntime {
    async fn run(&self, script: &str, globals: &Message, msg: &Message) -> Result<Value, ScriptError> {
        let request = serde_json::to_vec(&serde_json::json!({
            "script": script,
            "globals": globals,
            "msg": msg,
        }))
        .map_err(|e| ScriptError::Runtime(e.to_string()))?;

        let limit = Duration::from_millis(self.config.timeout_ms);
        let output = timeout(limit, self.spawn_and_collect(request))
            .await
            .map_err(|_| ScriptError::Runtime(format!("script timed out after {}ms", self.config.timeout_ms)))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScriptError::Runtime(format!(
                "interpreter exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        match serde_json::from_str::<Verdict>(stdout.trim()) {
            Ok(Verdict::Ok(value)) => Ok(value),
            Ok(Verdict::CompileError(e)) => Err(ScriptError::Compile(e)),
            Ok(Verdict::RuntimeError(e)) => Err(ScriptError::Runtime(e)),
            Err(e) => Err(ScriptError::Runtime(format!("unreadable script result: {}", e))),
        }
    }
}

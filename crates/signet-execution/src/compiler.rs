//! Contract source compilation.
//!
//! Compilation happens outside the node. The [`ContractCompiler`] trait
//! is the seam; [`CommandCompiler`] shells out to a configured compiler
//! binary, feeding source on stdin and reading a JSON artifact on
//! stdout. Compiler diagnostics are passed through verbatim so the
//! dashboard can show the real error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// A compiled contract artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledContract {
    /// ABI JSON, verbatim from the compiler
    pub abi: String,
    /// Runtime bytecode
    pub bytecode: Vec<u8>,
}

/// Compilation failures
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The compiler rejected the source; the message is its own output
    #[error("{0}")]
    Source(String),

    /// The compiler could not be run at all
    #[error("compiler unavailable: {0}")]
    Unavailable(String),

    /// The compiler ran but produced an unreadable artifact
    #[error("malformed compiler output: {0}")]
    MalformedOutput(String),
}

/// Turns contract source into deployable bytecode
#[async_trait]
pub trait ContractCompiler: Send + Sync {
    async fn compile(&self, source: &str) -> Result<CompiledContract, CompileError>;
}

/// Wire format emitted by the compiler binary on stdout
#[derive(Debug, Deserialize)]
struct CompilerOutput {
    abi: serde_json::Value,
    /// Hex, with or without a `0x` prefix
    bytecode: String,
}

/// Runs an external compiler binary per compilation request
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    command: String,
    args: Vec<String>,
}

impl CommandCompiler {
    pub fn new(command: impl Into<String>) -> Self {
        CommandCompiler {
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    fn parse_output(stdout: &[u8]) -> Result<CompiledContract, CompileError> {
        let output: CompilerOutput = serde_json::from_slice(stdout)
            .map_err(|e| CompileError::MalformedOutput(e.to_string()))?;
        let hex_str = output.bytecode.trim();
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytecode = hex::decode(hex_str)
            .map_err(|e| CompileError::MalformedOutput(format!("bytecode is not hex: {}", e)))?;
        if bytecode.is_empty() {
            return Err(CompileError::MalformedOutput("empty bytecode".to_string()));
        }
        Ok(CompiledContract {
            abi: output.abi.to_string(),
            bytecode,
        })
    }
}

#[async_trait]
impl ContractCompiler for CommandCompiler {
    async fn compile(&self, source: &str) -> Result<CompiledContract, CompileError> {
        debug!(command = %self.command, "running contract compiler");

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| CompileError::Unavailable(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(source.as_bytes())
                .await
                .map_err(|e| CompileError::Unavailable(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CompileError::Unavailable(e.to_string()))?;

        if !output.status.success() {
            // pass the compiler's own diagnostics through untouched
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            } else {
                stderr
            };
            return Err(CompileError::Source(message));
        }

        Self::parse_output(&output.stdout)
    }
}

/// Stub used when no compiler is configured
#[derive(Debug, Clone, Default)]
pub struct DisabledCompiler;

#[async_trait]
impl ContractCompiler for DisabledCompiler {
    async fn compile(&self, _source: &str) -> Result<CompiledContract, CompileError> {
        Err(CompileError::Unavailable(
            "no contract compiler is configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output_accepts_prefixed_hex() {
        let raw = br#"{"abi": [{"name": "get"}], "bytecode": "0x600160"}"#;
        let artifact = CommandCompiler::parse_output(raw).unwrap();
        assert_eq!(artifact.bytecode, vec![0x60, 0x01, 0x60]);
        assert!(artifact.abi.contains("get"));
    }

    #[test]
    fn test_parse_output_accepts_bare_hex() {
        let raw = br#"{"abi": [], "bytecode": "0042"}"#;
        let artifact = CommandCompiler::parse_output(raw).unwrap();
        assert_eq!(artifact.bytecode, vec![0x00, 0x42]);
    }

    #[test]
    fn test_parse_output_rejects_garbage() {
        assert!(matches!(
            CommandCompiler::parse_output(b"not json"),
            Err(CompileError::MalformedOutput(_))
        ));
        assert!(matches!(
            CommandCompiler::parse_output(br#"{"abi": [], "bytecode": "zz"}"#),
            Err(CompileError::MalformedOutput(_))
        ));
        assert!(matches!(
            CommandCompiler::parse_output(br#"{"abi": [], "bytecode": ""}"#),
            Err(CompileError::MalformedOutput(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_compiler_reports_unavailable() {
        let err = DisabledCompiler.compile("contract X {}").await.unwrap_err();
        assert!(matches!(err, CompileError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_reports_unavailable() {
        let compiler = CommandCompiler::new("/nonexistent/signet-compiler");
        let err = compiler.compile("contract X {}").await.unwrap_err();
        assert!(matches!(err, CompileError::Unavailable(_)));
    }
}

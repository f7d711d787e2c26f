//! Step tracing
//!
//! `JsonLogger` emits one JSON object per executed opcode, followed by a
//! summary line when the top-level frame ends.

use crate::error::EvmError;
use crate::opcode::Opcode;
use bach_crypto::{Address, U256};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::io::{self, Write};
use std::sync::Arc;

/// Interpreter state at one step, before the opcode executes
#[derive(Debug, Clone, Copy)]
pub struct StepLog<'a> {
    /// Program counter
    pub pc: u64,
    /// Opcode about to execute
    pub op: Opcode,
    /// Gas available before the step
    pub gas: u64,
    /// Gas charged by the step
    pub cost: u64,
    /// Stack, bottom first
    pub stack: &'a [U256],
    /// Memory size in bytes
    pub memory_size: usize,
    /// Call depth, 1 for the top frame
    pub depth: usize,
    /// Refund counter
    pub refund: u64,
    /// Error the step failed with, for faults
    pub error: Option<&'a EvmError>,
}

/// Receives interpreter events
pub trait Tracer: Send {
    /// Top-level frame starts
    fn capture_start(
        &mut self,
        _from: Address,
        _to: Address,
        _create: bool,
        _input: &[u8],
        _gas: u64,
        _value: U256,
    ) {
    }

    /// An opcode is about to execute
    fn capture_state(&mut self, step: &StepLog<'_>);

    /// An opcode failed
    fn capture_fault(&mut self, _step: &StepLog<'_>) {}

    /// Top-level frame ends
    fn capture_end(&mut self, _output: &[u8], _gas_used: u64, _error: Option<&EvmError>) {}
}

/// Writes steps as JSON lines
#[derive(Debug)]
pub struct JsonLogger<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLogger<W> {
    /// Logger writing to `writer`
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Consume the logger and return its writer
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn emit(&mut self, value: &Value) {
        let result = serde_json::to_writer(&mut self.writer, value)
            .map_err(io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to write trace line");
        }
    }
}

fn step_json(step: &StepLog<'_>) -> Value {
    let mut value = json!({
        "pc": step.pc,
        "op": step.op.0,
        "gas": format!("{:#x}", step.gas),
        "gasCost": format!("{:#x}", step.cost),
        "memSize": step.memory_size,
        "stack": step.stack.iter().map(|v| format!("{v:#x}")).collect::<Vec<_>>(),
        "depth": step.depth,
        "refund": step.refund,
        "opName": step.op.to_string(),
    });
    if let Some(err) = step.error {
        value["error"] = Value::String(err.to_string());
    }
    value
}

impl<W: Write + Send> Tracer for JsonLogger<W> {
    fn capture_state(&mut self, step: &StepLog<'_>) {
        self.emit(&step_json(step));
    }

    fn capture_fault(&mut self, step: &StepLog<'_>) {
        self.emit(&step_json(step));
    }

    fn capture_end(&mut self, output: &[u8], gas_used: u64, error: Option<&EvmError>) {
        let mut value = json!({
            "output": hex::encode(output),
            "gasUsed": format!("{gas_used:#x}"),
        });
        if let Some(err) = error {
            value["error"] = Value::String(err.to_string());
        }
        self.emit(&value);
    }
}

/// Clonable in-memory sink, shared between a tracer and its reader
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step<'a>(stack: &'a [U256], error: Option<&'a EvmError>) -> StepLog<'a> {
        StepLog {
            pc: 2,
            op: Opcode::ADD,
            gas: 100,
            cost: 3,
            stack,
            memory_size: 0,
            depth: 1,
            refund: 0,
            error,
        }
    }

    #[test]
    fn test_json_logger_lines() {
        let buffer = SharedBuffer::new();
        let mut logger = JsonLogger::new(buffer.clone());
        let stack = [U256::from(1), U256::from(0xff)];
        logger.capture_state(&step(&stack, None));
        logger.capture_end(&[0xab], 3, None);

        let text = String::from_utf8(buffer.contents()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["pc"], 2);
        assert_eq!(first["opName"], "ADD");
        assert_eq!(first["gas"], "0x64");
        assert_eq!(first["stack"][1], "0xff");
        assert!(first.get("error").is_none());

        let last: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(last["output"], "ab");
        assert_eq!(last["gasUsed"], "0x3");
    }

    #[test]
    fn test_fault_carries_error() {
        let buffer = SharedBuffer::new();
        let mut logger = JsonLogger::new(buffer.clone());
        let err = EvmError::OutOfGas;
        logger.capture_fault(&step(&[], Some(&err)));

        let text = String::from_utf8(buffer.contents()).unwrap();
        let line: Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(line["error"], "out of gas");
    }

    #[test]
    fn test_shared_buffer_clones_share_storage() {
        let buffer = SharedBuffer::new();
        assert!(buffer.is_empty());
        let mut writer = buffer.clone();
        writer.write_all(b"abc").unwrap();
        assert_eq!(buffer.len(), 3);
    }
}

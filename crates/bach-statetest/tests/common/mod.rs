//! Shared state test vectors for the integration tests

#![allow(dead_code)]

use bach_evm::VmConfig;
use bach_statetest::{StateBackend, StateTest};
use serde_json::{json, Value};
use std::path::Path;

pub const SECRET: &str = "0x45a915e4d060149eb4365960e6a7a45f334393093061116b197e3240065ff2d8";
pub const SENDER: &str = "0xa94f5374fce5edbc8e2a8697c15331677e6ebf0b";
pub const CONTRACT: &str = "0x095e7baea6a6c7c4c2dfeb977efac326af552d87";
pub const COINBASE: &str = "0x2adc25665018aa1fe0e6bc666dac8fc2697ff9ba";

/// PUSH1 1, PUSH1 1, ADD, PUSH1 0, SSTORE, then LOG0 of 32 bytes
pub const STORE_AND_LOG: &str = "0x600160010160005560206000a0";

/// Counts down from 0x20 in a JUMPI loop, then writes slot 0
pub const LOOP: &str = "0x60205b6001900380600257600160005500";

/// Post entry with placeholder root and logs
pub fn post(gas: usize) -> Value {
    json!({"hash": "0x00", "logs": "0x00", "indexes": {"data": 0, "gas": gas, "value": 0}})
}

/// A call to `code` at [`CONTRACT`] with gas limit options
/// `[100000, 20999, 500001]`
pub fn vector(code: &str, post: Value) -> Value {
    json!({
        "env": {
            "currentCoinbase": COINBASE,
            "currentDifficulty": "0x020000",
            "currentGasLimit": "0x05f5e100",
            "currentNumber": "0x01",
            "currentTimestamp": "0x03e8"
        },
        "pre": {
            SENDER: {"balance": "0x0de0b6b3a7640000", "code": "0x", "nonce": "0x00", "storage": {}},
            CONTRACT: {"balance": "0x00", "code": code, "nonce": "0x00", "storage": {}}
        },
        "transaction": {
            "data": ["0x"],
            "gasLimit": ["0x0186a0", "0x5207", "0x07a121"],
            "gasPrice": "0x0a",
            "nonce": "0x00",
            "secretKey": SECRET,
            "to": CONTRACT,
            "value": ["0x01"]
        },
        "post": post
    })
}

pub fn state_test(value: &Value) -> StateTest {
    serde_json::from_value(value.clone()).unwrap()
}

/// Fill every post entry of `value` with the root and logs hash the
/// engine actually produces, so the vector passes by construction
pub fn self_consistent(mut value: Value) -> Value {
    let test = state_test(&value);
    for subtest in test.subtests() {
        let execution = test
            .run_no_verify(&subtest, &mut VmConfig::default(), StateBackend::Trie)
            .unwrap();
        let entry = &mut value["post"][subtest.fork.as_str()][subtest.index];
        entry["hash"] = Value::String(format!("0x{}", hex::encode(execution.root)));
        entry["logs"] = Value::String(format!("0x{}", hex::encode(execution.state.logs_hash())));
    }
    value
}

/// Wrap `test` as the only test of a corpus file at `dir/rel`
pub fn write_test(dir: &Path, rel: &str, name: &str, test: &Value) {
    write_raw(dir, rel, &json!({ name: test }).to_string());
}

pub fn write_raw(dir: &Path, rel: &str, body: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

//! Hyperliquid EIP-712 phantom-agent signing (DEX signer, C2).
//!
//! Signing is deliberately out-of-process: a long-lived child process (a
//! Python reference implementation, by convention) receives signing
//! requests over NDJSON on stdio and returns `{r, s, v}`. The adapter never
//! holds a private key or performs curve arithmetic itself; this module's
//! job is the stdio protocol, respawn-on-crash, and the `connectionId`
//! hash used to reason about and test the wire format independently of the
//! external process.

use crate::core::errors::GatewayError;
use ethers_core::utils::keccak256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, warn};

/// Mainnet chain id for the phantom-agent EIP-712 domain.
pub const CHAIN_ID_MAINNET: u64 = 42161;
/// Testnet chain id for the phantom-agent EIP-712 domain.
pub const CHAIN_ID_TESTNET: u64 = 421614;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedAction {
    pub r: String,
    pub s: String,
    pub v: u8,
}

/// Compute the phantom-agent `connectionId`:
/// `keccak256(msgpack(action) ‖ vault_bytes ‖ nonce_be_8)`.
///
/// `vault_bytes` is the 20 raw address bytes when a vault is involved, or
/// empty when trading for the signer's own account.
pub fn connection_id(action: &Value, vault_address: Option<&str>, nonce: u64) -> [u8; 32] {
    let mut buf = rmp_serde::to_vec_named(action).expect("action must be msgpack-encodable");
    if let Some(addr) = vault_address {
        let hex_part = addr.strip_prefix("0x").unwrap_or(addr);
        if let Ok(bytes) = hex::decode(hex_part) {
            buf.extend_from_slice(&bytes);
        }
    }
    buf.extend_from_slice(&nonce.to_be_bytes());
    keccak256(&buf)
}

#[derive(Serialize)]
struct SignRequest<'a> {
    id: u64,
    method: &'static str,
    params: SignParams<'a>,
}

#[derive(Serialize)]
struct SignParams<'a> {
    #[serde(rename = "privateKey")]
    private_key: &'a str,
    action: &'a Value,
    nonce: u64,
    #[serde(rename = "vaultAddress", skip_serializing_if = "Option::is_none")]
    vault_address: Option<&'a str>,
    #[serde(rename = "expiresAfter", skip_serializing_if = "Option::is_none")]
    expires_after: Option<u64>,
    #[serde(rename = "isMainnet")]
    is_mainnet: bool,
}

#[derive(Deserialize)]
struct SignResponseFrame {
    id: u64,
    #[serde(default)]
    result: Option<SignedAction>,
    #[serde(default)]
    error: Option<SignErrorFrame>,
}

#[derive(Deserialize)]
struct SignErrorFrame {
    message: String,
}

type PendingMap = Arc<Mutex<HashMap<u64, Sender<Result<SignedAction, String>>>>>;

/// Handle to the external signing process.
pub struct Eip712Signer {
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: AtomicBool,
    python: String,
    script: String,
}

impl Eip712Signer {
    /// Spawn the signer subprocess and start its stdout reader thread.
    pub fn spawn(python: impl Into<String>, script: impl Into<String>) -> Result<Self, GatewayError> {
        let python = python.into();
        let script = script.into();
        let (child, stdin, pending) = Self::spawn_child(&python, &script)?;
        Ok(Self {
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            pending,
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
            python,
            script,
        })
    }

    /// A signer that always refuses to sign. Used in tests and as a safe
    /// default when no signer subprocess is configured.
    pub fn stub() -> Self {
        Self {
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(false),
            python: String::new(),
            script: String::new(),
        }
    }

    fn spawn_child(
        python: &str,
        script: &str,
    ) -> Result<(Child, ChildStdin, PendingMap), GatewayError> {
        let mut child = Command::new(python)
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| GatewayError::SignerUnavailable(format!("spawn failed: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::SignerUnavailable("no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::SignerUnavailable("no stdout".to_string()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        std::thread::Builder::new()
            .name("hl-signer-reader".to_string())
            .spawn(move || {
                let mut lines = BufReader::new(stdout).lines();
                while let Some(Ok(line)) = lines.next() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<SignResponseFrame>(&line) {
                        Ok(frame) => {
                            let sender = reader_pending.lock().unwrap().remove(&frame.id);
                            if let Some(sender) = sender {
                                let outcome = match (frame.result, frame.error) {
                                    (Some(r), _) => Ok(r),
                                    (None, Some(e)) => Err(e.message),
                                    (None, None) => Err("empty signer response".to_string()),
                                };
                                let _ = sender.send(outcome);
                            }
                        }
                        Err(e) => warn!("malformed signer response: {e}: {line}"),
                    }
                }
            })
            .expect("failed to spawn signer reader thread");

        Ok((child, stdin, pending))
    }

    /// Request a signature over `action` at `nonce`. Blocks up to `timeout`
    /// for the child's response.
    #[allow(clippy::too_many_arguments)]
    pub fn sign(
        &self,
        private_key: &str,
        action: &Value,
        nonce: u64,
        vault_address: Option<&str>,
        expires_after: Option<u64>,
        is_mainnet: bool,
        timeout: Duration,
    ) -> Result<SignedAction, GatewayError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(GatewayError::SignerUnavailable(
                "signer process not running".to_string(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx): (Sender<Result<SignedAction, String>>, Receiver<_>) = mpsc::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let request = SignRequest {
            id,
            method: "sign_l1",
            params: SignParams {
                private_key,
                action,
                nonce,
                vault_address,
                expires_after,
                is_mainnet,
            },
        };
        let mut line = serde_json::to_string(&request)
            .map_err(|e| GatewayError::SignerUnavailable(format!("encode request: {e}")))?;
        line.push('\n');

        {
            let mut stdin_guard = self.stdin.lock().unwrap();
            let stdin = stdin_guard
                .as_mut()
                .ok_or_else(|| GatewayError::SignerUnavailable("signer stdin closed".to_string()))?;
            if let Err(e) = stdin.write_all(line.as_bytes()).and_then(|_| stdin.flush()) {
                self.mark_dead();
                self.pending.lock().unwrap().remove(&id);
                return Err(GatewayError::SignerUnavailable(format!("write failed: {e}")));
            }
        }

        match rx.recv_timeout(timeout) {
            Ok(Ok(signed)) => Ok(signed),
            Ok(Err(msg)) => Err(GatewayError::SignerUnavailable(msg)),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(GatewayError::SignerUnavailable(
                    "signer response timed out".to_string(),
                ))
            }
        }
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
        error!("hyperliquid signer process considered dead");
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Kill the current child (if any) and spawn a fresh one.
    pub fn respawn(&self) -> Result<(), GatewayError> {
        if self.python.is_empty() {
            return Err(GatewayError::SignerUnavailable(
                "no signer configured (stub)".to_string(),
            ));
        }
        {
            let mut child_guard = self.child.lock().unwrap();
            if let Some(mut child) = child_guard.take() {
                let _ = child.kill();
            }
        }
        let (child, stdin, pending) = Self::spawn_child(&self.python, &self.script)?;
        *self.child.lock().unwrap() = Some(child);
        *self.stdin.lock().unwrap() = Some(stdin);
        *self.pending.lock().unwrap() = pending.lock().unwrap().drain().collect();
        self.alive.store(true, Ordering::Release);
        Ok(())
    }
}

impl Drop for Eip712Signer {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.lock().unwrap().take() {
            let _ = child.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connection_id_is_deterministic() {
        let action = json!({"type": "order", "orders": []});
        let a = connection_id(&action, None, 1);
        let b = connection_id(&action, None, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn connection_id_changes_with_nonce() {
        let action = json!({"type": "order", "orders": []});
        let a = connection_id(&action, None, 1);
        let b = connection_id(&action, None, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn connection_id_changes_with_vault() {
        let action = json!({"type": "order", "orders": []});
        let a = connection_id(&action, None, 1);
        let b = connection_id(&action, Some("0x1111111111111111111111111111111111111111"), 1);
        assert_ne!(a, b);
    }

    #[test]
    fn stub_signer_always_refuses() {
        let signer = Eip712Signer::stub();
        assert!(!signer.is_alive());
        let action = json!({"type": "order", "orders": []});
        let result = signer.sign("0xkey", &action, 1, None, None, true, Duration::from_millis(10));
        assert!(result.is_err());
    }
}

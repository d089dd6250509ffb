//! HMAC signing/verification for worker IPC events (spec.md §6 Worker IPC).
//!
//! A signed event is a JSON object carrying an `_hmac` hex field: the
//! HMAC-SHA256, keyed by [`IpcSecret`], of the canonical JSON encoding of the
//! same object with `_hmac` removed. `serde_json::Value::Object` here is a
//! `BTreeMap` (the workspace does not enable `preserve_order`), so
//! `serde_json::to_vec` is already canonical — key order is a non-issue.

use std::fs;
use std::io;
use std::path::Path;

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const HMAC_FIELD: &str = "_hmac";
const SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum IpcSecretError {
    #[error("failed to read IPC secret at {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("failed to write IPC secret at {path}: {source}")]
    Write { path: String, source: io::Error },
    #[error("IPC secret at {path} is not valid hex")]
    Malformed { path: String },
}

/// A process-wide HMAC key, auto-generated and persisted at 0600 on first
/// run (spec.md §6).
#[derive(Clone)]
pub struct IpcSecret(Vec<u8>);

impl IpcSecret {
    /// Load the secret from `path`, generating and persisting a fresh random
    /// one if the file does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self, IpcSecretError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let bytes = hex::decode(contents.trim()).map_err(|_| IpcSecretError::Malformed {
                    path: path.display().to_string(),
                })?;
                Ok(Self(bytes))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Self::generate_and_persist(path),
            Err(source) => Err(IpcSecretError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    fn generate_and_persist(path: &Path) -> Result<Self, IpcSecretError> {
        let mut bytes = vec![0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| IpcSecretError::Write {
                path: path.display().to_string(),
                source,
            })?;
        }
        fs::write(path, hex::encode(&bytes)).map_err(|source| IpcSecretError::Write {
            path: path.display().to_string(),
            source,
        })?;
        set_owner_only_permissions(path).map_err(|source| IpcSecretError::Write {
            path: path.display().to_string(),
            source,
        })?;

        Ok(Self(bytes))
    }

    #[cfg(test)]
    fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Outcome of [`verify_event`].
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub valid: bool,
    /// The object with `_hmac` stripped, regardless of validity.
    pub data: Value,
}

fn canonical_bytes_without_hmac(value: &Value) -> Vec<u8> {
    let mut stripped = value.clone();
    if let Some(obj) = stripped.as_object_mut() {
        obj.remove(HMAC_FIELD);
    }
    serde_json::to_vec(&stripped).expect("Value serialization cannot fail")
}

fn mac_hex(secret: &IpcSecret, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(&secret.0).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Sign `value` (must be a JSON object), returning a new object with `_hmac`
/// set.
pub fn sign_event(value: &Value, secret: &IpcSecret) -> Value {
    let payload = canonical_bytes_without_hmac(value);
    let tag = mac_hex(secret, &payload);

    let mut signed = value.clone();
    if let Some(obj) = signed.as_object_mut() {
        obj.insert(HMAC_FIELD.to_string(), Value::String(tag));
    }
    signed
}

/// Verify a signed event. `data` is always the event with `_hmac` stripped,
/// whether or not the signature checks out.
pub fn verify_event(value: &Value, secret: &IpcSecret) -> VerifyOutcome {
    let data = {
        let mut stripped = value.clone();
        if let Some(obj) = stripped.as_object_mut() {
            obj.remove(HMAC_FIELD);
        }
        stripped
    };

    let Some(given) = value.get(HMAC_FIELD).and_then(Value::as_str) else {
        return VerifyOutcome { valid: false, data };
    };
    let Ok(given_bytes) = hex::decode(given) else {
        return VerifyOutcome { valid: false, data };
    };

    let payload = canonical_bytes_without_hmac(value);
    let expected = {
        let mut mac = HmacSha256::new_from_slice(&secret.0).expect("HMAC accepts any key length");
        mac.update(&payload);
        mac.finalize().into_bytes()
    };

    let valid = given_bytes.len() == expected.len() && given_bytes.ct_eq(&expected).into();
    VerifyOutcome { valid, data }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secret() -> IpcSecret {
        IpcSecret::from_bytes(vec![7u8; 32])
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let obj = json!({"status": "result", "result": "42"});
        let signed = sign_event(&obj, &secret());
        let outcome = verify_event(&signed, &secret());
        assert!(outcome.valid);
        assert_eq!(outcome.data, obj);
    }

    #[test]
    fn flipping_a_byte_of_the_tag_invalidates_it() {
        let obj = json!({"status": "done"});
        let mut signed = sign_event(&obj, &secret());
        let tag = signed["_hmac"].as_str().unwrap().to_string();
        let mut bytes = tag.into_bytes();
        bytes[0] ^= 1;
        signed["_hmac"] = Value::String(String::from_utf8(bytes).unwrap());

        let outcome = verify_event(&signed, &secret());
        assert!(!outcome.valid);
    }

    #[test]
    fn missing_hmac_field_is_invalid() {
        let obj = json!({"status": "progress"});
        let outcome = verify_event(&obj, &secret());
        assert!(!outcome.valid);
    }

    #[test]
    fn load_or_create_persists_a_reusable_secret() {
        let dir = std::env::temp_dir().join(format!("agentflow-ipc-test-{}", uuid_like()));
        let path = dir.join("ipc_secret");
        let first = IpcSecret::load_or_create(&path).unwrap();
        let second = IpcSecret::load_or_create(&path).unwrap();
        assert_eq!(first.0, second.0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    fn uuid_like() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        format!(
            "{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }
}

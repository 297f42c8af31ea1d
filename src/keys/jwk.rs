// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Tang JWK parsing and RFC 7638 thumbprints.

use crate::error::{Result, TangError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{Map, Value};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// What a Tang key is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    /// Signs the advertisement
    Signing,
    /// Used for the McCallum-Relyea exchange
    Exchange,
    Unknown,
}

/// Thumbprints of a key's public members
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Thumbprints {
    pub sha1: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TangKey {
    pub role: KeyRole,
    pub thumbprints: Thumbprints,
}

/// Parse a JWK file and derive its role and thumbprints
pub fn parse_key(file: &str, content: &[u8]) -> Result<TangKey> {
    let invalid = |message: String| TangError::InvalidKey {
        file: file.to_string(),
        message,
    };

    let value: Value = serde_json::from_slice(content).map_err(|e| invalid(e.to_string()))?;
    let jwk = value
        .as_object()
        .ok_or_else(|| invalid("not a JSON object".to_string()))?;

    let canonical = canonical_members(jwk).map_err(invalid)?;

    Ok(TangKey {
        role: role(jwk),
        thumbprints: Thumbprints {
            sha1: URL_SAFE_NO_PAD.encode(Sha1::digest(canonical.as_bytes())),
            sha256: URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())),
        },
    })
}

fn role(jwk: &Map<String, Value>) -> KeyRole {
    let has_op = |op: &str| {
        jwk.get("key_ops")
            .and_then(Value::as_array)
            .is_some_and(|ops| ops.iter().any(|o| o.as_str() == Some(op)))
    };

    if has_op("sign") || has_op("verify") {
        return KeyRole::Signing;
    }
    if has_op("deriveKey") {
        return KeyRole::Exchange;
    }

    match jwk.get("alg").and_then(Value::as_str) {
        Some("ECMR") => KeyRole::Exchange,
        Some(alg) if alg.starts_with("ES") => KeyRole::Signing,
        _ => KeyRole::Unknown,
    }
}

/// Required public members of the key in lexicographic order, serialized without whitespace
fn canonical_members(jwk: &Map<String, Value>) -> std::result::Result<String, String> {
    let kty = jwk
        .get("kty")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing kty".to_string())?;

    let members: &[&str] = match kty {
        "EC" => &["crv", "kty", "x", "y"],
        "RSA" => &["e", "kty", "n"],
        "OKP" => &["crv", "kty", "x"],
        "oct" => &["k", "kty"],
        other => return Err(format!("unsupported kty '{}'", other)),
    };

    let mut required = BTreeMap::new();
    for member in members {
        let value = jwk
            .get(*member)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("missing member '{}'", member))?;
        required.insert(*member, value);
    }

    serde_json::to_string(&required).map_err(|e| e.to_string())
}

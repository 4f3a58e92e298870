//! Content fingerprinting.
//!
//! A fingerprint governs stage idempotence: if the stored fingerprint for a
//! stage matches the one computed from its current inputs, params, and tool
//! versions, the stage is skipped. See spec §4.1.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::json_canon::canonical_string;

/// A fingerprint over the three ingredients of idempotence: named input
/// references, stage parameters, and external tool versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub input_hash: String,
    pub params_hash: String,
    /// Sorted mapping of tool name -> version string.
    pub tool_versions: BTreeMap<String, String>,
}

impl Fingerprint {
    /// Whether `self` matches a previously stored fingerprint exactly.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        self == other
    }
}

fn sha256_hex(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute a fingerprint from inputs, params, and tool versions.
///
/// `sha256(canonical_json(Inputs) + "\n" + canonical_json(Params) + "\n" +
/// canonical_json(ToolVersions))`, split into two hash fields for
/// diagnostics (`input_hash` covers `Inputs` alone, `params_hash` covers the
/// combination of `Params` and `ToolVersions` — the two things a `--force`
/// on this stage alone should invalidate).
pub fn compute<I, P>(
    inputs: &I,
    params: &P,
    tool_versions: &BTreeMap<String, String>,
) -> Result<Fingerprint, serde_json::Error>
where
    I: Serialize,
    P: Serialize,
{
    let input_json = canonical_string(inputs)?;
    let params_json = canonical_string(params)?;
    let tools_json = canonical_string(tool_versions)?;

    let input_hash = sha256_hex(&input_json);
    let params_hash = sha256_hex(&format!("{params_json}\n{tools_json}"));

    Ok(Fingerprint {
        input_hash,
        params_hash,
        tool_versions: tool_versions.clone(),
    })
}

/// Compute the combined fingerprint hash exactly as spec'd:
/// `sha256(canonical_json(Inputs) + "\n" + canonical_json(Params) + "\n" +
/// canonical_json(ToolVersions))`.
pub fn combined_hash<I, P>(
    inputs: &I,
    params: &P,
    tool_versions: &BTreeMap<String, String>,
) -> Result<String, serde_json::Error>
where
    I: Serialize,
    P: Serialize,
{
    let input_json = canonical_string(inputs)?;
    let params_json = canonical_string(params)?;
    let tools_json = canonical_string(tool_versions)?;
    Ok(sha256_hex(&format!(
        "{input_json}\n{params_json}\n{tools_json}"
    )))
}

//! Rekor transparency log entries
//!
//! An entry is accepted on the strength of its signed entry timestamp (SET):
//! the log's signature over the canonical JSON of the entry. A verified SET
//! makes the entry's integration time trustworthy, and that time is what the
//! short-lived Fulcio leaf is validated at.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::bundle::{decode_b64, TlogEntry};
use super::trust_root::TrustedRoot;
use crate::cert::{HashAlgorithm, SignatureEncoding};
use crate::error::{Error, Result};

/// Signed payload of a SET. Field order is the canonical (sorted) order.
#[derive(Serialize)]
struct SignedEntry<'a> {
    body: &'a str,
    #[serde(rename = "integratedTime")]
    integrated_time: i64,
    #[serde(rename = "logID")]
    log_id: String,
    #[serde(rename = "logIndex")]
    log_index: i64,
}

/// An entry whose SET and body binding verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedEntry {
    pub log_index: i64,
    pub integrated_time: i64,
}

fn parse_int(field: &str, value: &str) -> Result<i64> {
    value
        .parse()
        .map_err(|_| Error::MalformedBundle(format!("{} is not an integer: {}", field, value)))
}

/// Verify one entry against the trusted logs and bind it to the DSSE
/// envelope (`payload` and its signatures).
pub fn verify_entry(
    entry: &TlogEntry,
    root: &TrustedRoot,
    payload: &[u8],
    signatures: &[Vec<u8>],
) -> Result<VerifiedEntry> {
    let log_index = parse_int("logIndex", &entry.log_index)?;
    let integrated_time = parse_int("integratedTime", &entry.integrated_time)?;
    let log_id = decode_b64("logId", &entry.log_id.key_id)?;
    let body = decode_b64("canonicalizedBody", &entry.canonicalized_body)?;

    let tlog = root
        .tlog(&log_id)
        .ok_or_else(|| Error::UntrustedSigner(format!("unknown transparency log {}", hex::encode(&log_id))))?;
    if !tlog.valid_for.contains(integrated_time) {
        return Err(Error::UntrustedSigner(format!(
            "entry {} integrated at {} outside the log key validity",
            log_index, integrated_time
        )));
    }

    let promise = entry
        .inclusion_promise
        .as_ref()
        .ok_or_else(|| Error::UntrustedSigner(format!("entry {} has no signed entry timestamp", log_index)))?;
    let set = decode_b64("signedEntryTimestamp", &promise.signed_entry_timestamp)?;

    let canonical_body = STANDARD.encode(&body);
    let signed = serde_json::to_vec(&SignedEntry {
        body: &canonical_body,
        integrated_time,
        log_id: hex::encode(&log_id),
        log_index,
    })
    .map_err(|e| Error::Internal(format!("encoding signed entry: {}", e)))?;

    tlog.key
        .verify(HashAlgorithm::Sha256, &signed, &set, SignatureEncoding::Der)
        .map_err(|e| Error::UntrustedSigner(format!("signed entry timestamp of entry {}: {}", log_index, e)))?;

    check_body(entry, &body, payload, signatures)?;

    Ok(VerifiedEntry {
        log_index,
        integrated_time,
    })
}

/// The logged body must describe this envelope: same payload hash and, for
/// `dsse` entries, one of the envelope's signatures.
fn check_body(entry: &TlogEntry, body: &[u8], payload: &[u8], signatures: &[Vec<u8>]) -> Result<()> {
    let unbound = |msg: String| Error::UntrustedSigner(format!("log entry does not match envelope: {}", msg));

    let body: Value = serde_json::from_slice(body)
        .map_err(|e| Error::MalformedBundle(format!("canonicalizedBody is not JSON: {}", e)))?;

    let kind = body.get("kind").and_then(Value::as_str).unwrap_or_default();
    if kind != entry.kind_version.kind {
        return Err(unbound(format!("body kind {} vs {}", kind, entry.kind_version.kind)));
    }

    let hash_pointer = match kind {
        "dsse" => "/spec/payloadHash",
        "intoto" => "/spec/content/payloadHash",
        other => return Err(unbound(format!("unsupported entry kind {}", other))),
    };
    let hash = body
        .pointer(hash_pointer)
        .ok_or_else(|| unbound("no payload hash".into()))?;
    let algorithm = hash.get("algorithm").and_then(Value::as_str).unwrap_or_default();
    let value = hash.get("value").and_then(Value::as_str).unwrap_or_default();
    if algorithm != "sha256" || !value.eq_ignore_ascii_case(&hex::encode(Sha256::digest(payload))) {
        return Err(unbound("payload hash differs".into()));
    }

    if kind == "dsse" {
        let logged = body
            .pointer("/spec/signatures")
            .and_then(Value::as_array)
            .ok_or_else(|| unbound("no signatures".into()))?;
        let matched = logged
            .iter()
            .filter_map(|sig| sig.get("signature").and_then(Value::as_str))
            .filter_map(|sig| decode_b64("logged signature", sig).ok())
            .any(|sig| signatures.contains(&sig));
        if !matched {
            return Err(unbound("envelope signature not logged".into()));
        }
    }

    Ok(())
}

/// Verify the first usable entry of a bundle.
///
/// Every entry is tried; when none verifies the first failure is returned.
pub fn verify_entries(
    entries: &[TlogEntry],
    root: &TrustedRoot,
    payload: &[u8],
    signatures: &[Vec<u8>],
) -> Result<VerifiedEntry> {
    let mut first_error = None;
    for entry in entries {
        match verify_entry(entry, root, payload, signatures) {
            Ok(verified) => return Ok(verified),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    Err(first_error.unwrap_or_else(|| Error::UntrustedSigner("bundle has no transparency log entries".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sigstore::bundle::Bundle;
    use crate::test_util::*;

    struct Fixture {
        root: TrustedRoot,
        bundle: serde_json::Value,
        payload: Vec<u8>,
    }

    fn fixture() -> Fixture {
        let pki = sigstore_pki(&FulcioIdentity::github(REPO));
        let payload = statement(DIGEST, &pcrs(1));
        Fixture {
            root: TrustedRoot::from_json(&trusted_root_json(&pki)).unwrap(),
            bundle: serde_json::from_slice(&bundle_json(&pki, &payload)).unwrap(),
            payload,
        }
    }

    fn verify(fixture: &Fixture, bundle: &serde_json::Value) -> Result<VerifiedEntry> {
        let bundle = Bundle::from_json(bundle.to_string().as_bytes()).unwrap();
        let signatures: Vec<Vec<u8>> = bundle
            .dsse_envelope
            .signatures
            .iter()
            .map(|s| decode_b64("sig", &s.sig).unwrap())
            .collect();
        verify_entries(
            &bundle.verification_material.tlog_entries,
            &fixture.root,
            &fixture.payload,
            &signatures,
        )
    }

    fn entry_mut(bundle: &mut serde_json::Value) -> &mut serde_json::Value {
        &mut bundle["verificationMaterial"]["tlogEntries"][0]
    }

    #[test]
    fn test_valid_entry() {
        let f = fixture();
        let verified = verify(&f, &f.bundle).unwrap();
        assert_eq!(verified.integrated_time, VALID_AT as i64);
        assert_eq!(verified.log_index, 1_234_567);
    }

    #[test]
    fn test_tampered_integrated_time() {
        let f = fixture();
        let mut bundle = f.bundle.clone();
        entry_mut(&mut bundle)["integratedTime"] = (VALID_AT + 3600).to_string().into();
        assert!(matches!(verify(&f, &bundle), Err(Error::UntrustedSigner(_))));
    }

    #[test]
    fn test_unknown_log() {
        let f = fixture();
        let mut bundle = f.bundle.clone();
        entry_mut(&mut bundle)["logId"]["keyId"] = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".into();
        assert!(matches!(verify(&f, &bundle), Err(Error::UntrustedSigner(_))));
    }

    #[test]
    fn test_missing_promise() {
        let f = fixture();
        let mut bundle = f.bundle.clone();
        entry_mut(&mut bundle).as_object_mut().unwrap().remove("inclusionPromise");
        assert!(matches!(verify(&f, &bundle), Err(Error::UntrustedSigner(_))));
    }

    #[test]
    fn test_entry_for_other_payload() {
        let mut f = fixture();
        let bundle = f.bundle.clone();
        f.payload = statement(DIGEST, &pcrs(2));
        assert!(matches!(verify(&f, &bundle), Err(Error::UntrustedSigner(_))));
    }

    #[test]
    fn test_no_entries() {
        let f = fixture();
        let mut bundle = f.bundle.clone();
        bundle["verificationMaterial"]["tlogEntries"] = serde_json::json!([]);
        assert!(matches!(verify(&f, &bundle), Err(Error::UntrustedSigner(_))));
    }

    #[test]
    fn test_signed_entry_field_order() {
        let signed = serde_json::to_string(&SignedEntry {
            body: "e30=",
            integrated_time: 1,
            log_id: "ab".into(),
            log_index: 2,
        })
        .unwrap();
        assert_eq!(signed, r#"{"body":"e30=","integratedTime":1,"logID":"ab","logIndex":2}"#);
    }
}

//! Fixture builders shared by the unit tests.
//!
//! Everything here is generated for real: rcgen issues the certificates,
//! p256/p384 produce the signatures, and coset/ciborium encode documents the
//! same way the enclave firmware does.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use der::asn1::Utf8StringRef;
use der::{Decode, Encode};
use p256::ecdsa::signature::Signer;
use p256::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CustomExtension, DistinguishedName, DnType, IsCa, KeyPair,
    SanType, SerialNumber, PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384,
};
use serde::Serialize;
use serde_bytes::ByteBuf;
use sha2::{Digest, Sha256};

use crate::attestation::types::RegisterIndex;

pub const GITHUB_ISSUER: &str = "https://token.actions.githubusercontent.com";
pub const REPO: &str = "tinfoilsh/confidential-inference";
pub const DIGEST: &str = "0d7e9a4c5c1b2d8e37f6a0b4c9e8d7f6a5b4c3d2e1f0a9b8c7d6e5f4a3b2c1d0";

/// Unix time every generated certificate is valid at.
pub const VALID_AT: u64 = 1_700_000_000;

fn key_pair(alg: &'static rcgen::SignatureAlgorithm) -> KeyPair {
    KeyPair::generate_for(alg).unwrap()
}

fn params(common_name: &str, ca: IsCa, years: (i32, i32)) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, common_name);
    params.distinguished_name = name;
    params.is_ca = ca;
    params.not_before = rcgen::date_time_ymd(years.0, 1, 1);
    params.not_after = rcgen::date_time_ymd(years.1, 1, 1);
    params
}

fn issue(params: CertificateParams, key: &KeyPair, issuer: &Certificate, issuer_key: &KeyPair) -> Certificate {
    params.signed_by(key, issuer, issuer_key).unwrap()
}

/// A three level P-384 chain shaped like the AWS Nitro PKI.
pub struct NitroPki {
    pub root_der: Vec<u8>,
    pub root_pem: String,
    pub intermediate_der: Vec<u8>,
    pub leaf_der: Vec<u8>,
    pub leaf_key: p384::ecdsa::SigningKey,
}

fn build_nitro_pki(leaf_years: (i32, i32)) -> NitroPki {
    let root_key = key_pair(&PKCS_ECDSA_P384_SHA384);
    let root = params("aws.nitro-enclaves", IsCa::Ca(BasicConstraints::Unconstrained), (2019, 2049))
        .self_signed(&root_key)
        .unwrap();

    let intermediate_key = key_pair(&PKCS_ECDSA_P384_SHA384);
    let intermediate = issue(
        params("zonal.aws.nitro-enclaves", IsCa::Ca(BasicConstraints::Constrained(1)), (2020, 2030)),
        &intermediate_key,
        &root,
        &root_key,
    );

    let leaf_key = key_pair(&PKCS_ECDSA_P384_SHA384);
    let leaf = issue(
        params("i-0123456789abcdef0.enclave", IsCa::NoCa, leaf_years),
        &leaf_key,
        &intermediate,
        &intermediate_key,
    );

    NitroPki {
        root_der: root.der().to_vec(),
        root_pem: root.pem(),
        intermediate_der: intermediate.der().to_vec(),
        leaf_der: leaf.der().to_vec(),
        leaf_key: p384::ecdsa::SigningKey::from_pkcs8_der(&leaf_key.serialize_der()).unwrap(),
    }
}

pub fn nitro_pki() -> NitroPki {
    build_nitro_pki((2020, 2030))
}

/// Same shape as [`nitro_pki`] but the leaf expired before [`VALID_AT`].
pub fn expired_nitro_pki() -> NitroPki {
    build_nitro_pki((2021, 2022))
}

/// PCR0..2 filled with `seed`, `seed + 1`, `seed + 2`.
pub fn pcrs(seed: u8) -> BTreeMap<RegisterIndex, Vec<u8>> {
    (0..3u8).map(|i| (RegisterIndex::from(i), vec![seed.wrapping_add(i); 48])).collect()
}

#[derive(Serialize)]
struct NitroPayload<'a> {
    module_id: &'a str,
    digest: &'a str,
    timestamp: u64,
    pcrs: BTreeMap<RegisterIndex, ByteBuf>,
    certificate: ByteBuf,
    cabundle: Vec<ByteBuf>,
    public_key: Option<ByteBuf>,
    user_data: Option<ByteBuf>,
    nonce: Option<ByteBuf>,
}

/// CBOR attestation payload carrying `pcrs`, issued by the `pki` leaf.
pub fn nitro_payload(pki: &NitroPki, pcrs: &BTreeMap<RegisterIndex, Vec<u8>>) -> Vec<u8> {
    let payload = NitroPayload {
        module_id: "i-0123456789abcdef0-enc0123456789abcdef",
        digest: "SHA384",
        timestamp: VALID_AT * 1000,
        pcrs: pcrs.iter().map(|(i, v)| (*i, ByteBuf::from(v.clone()))).collect(),
        certificate: ByteBuf::from(pki.leaf_der.clone()),
        cabundle: vec![
            ByteBuf::from(pki.root_der.clone()),
            ByteBuf::from(pki.intermediate_der.clone()),
        ],
        public_key: None,
        user_data: None,
        nonce: Some(ByteBuf::from(b"fixture-nonce".to_vec())),
    };
    let mut out = Vec::new();
    ciborium::ser::into_writer(&payload, &mut out).unwrap();
    out
}

/// COSE_Sign1 (untagged, ES384) over `payload` signed with the `pki` leaf key.
pub fn sign_nitro_payload(pki: &NitroPki, payload: Vec<u8>) -> Vec<u8> {
    use coset::CborSerializable;

    let protected = coset::HeaderBuilder::new()
        .algorithm(coset::iana::Algorithm::ES384)
        .build();
    coset::CoseSign1Builder::new()
        .protected(protected)
        .payload(payload)
        .create_signature(b"", |data| {
            let signature: p384::ecdsa::Signature = pki.leaf_key.sign(data);
            signature.to_bytes().to_vec()
        })
        .build()
        .to_vec()
        .unwrap()
}

pub fn nitro_document(pki: &NitroPki, pcrs: &BTreeMap<RegisterIndex, Vec<u8>>) -> Vec<u8> {
    sign_nitro_payload(pki, nitro_payload(pki, pcrs))
}

/// Real document captured from a Nitro enclave, signed at `REAL_DOCUMENT_TIME`.
pub fn real_nitro_document() -> Vec<u8> {
    STANDARD
        .decode(include_str!("../testdata/nitro_attestation.b64").trim())
        .unwrap()
}

pub const REAL_DOCUMENT_TIME: u64 = 1_736_480_402;

pub const REAL_PCR0: &str =
    "4406a820aa96a103fcd640faa28df6384e33593d3867d84cc59dab7aaccea8897474d4058a317466eaf1234a56cc208e";
pub const REAL_PCR1: &str =
    "4b4d5b3661b3efc12920900c80e126e4ce783c522de6c02a2a5bf7af3a2b9327b86776f188e4be1c1c404a129dbda493";
pub const REAL_PCR2: &str =
    "c11e9df1617cf330533e45c75cafc2da24b04df4eb0a8668481b1669d31df4a690e8af687855318fb335fb2bbd596ffb";

/// Claims baked into a Fulcio leaf certificate.
#[derive(Clone)]
pub struct FulcioIdentity {
    pub issuer: String,
    pub repository: String,
    pub git_ref: String,
}

impl FulcioIdentity {
    pub fn github(repository: &str) -> Self {
        Self {
            issuer: GITHUB_ISSUER.to_string(),
            repository: repository.to_string(),
            git_ref: "refs/tags/v0.4.2".to_string(),
        }
    }

    fn workflow_uri(&self) -> String {
        format!(
            "https://github.com/{}/.github/workflows/release.yml@{}",
            self.repository, self.git_ref
        )
    }
}

fn utf8_extension(oid: &[u64], value: &str) -> CustomExtension {
    let der = Utf8StringRef::new(value).unwrap().to_der().unwrap();
    CustomExtension::from_oid_content(oid, der)
}

fn p256_key() -> (p256::ecdsa::SigningKey, Vec<u8>) {
    let key = p256::ecdsa::SigningKey::from_pkcs8_der(&key_pair(&PKCS_ECDSA_P256_SHA256).serialize_der()).unwrap();
    let spki = key.verifying_key().to_public_key_der().unwrap().as_bytes().to_vec();
    (key, spki)
}

/// DER of the TBS certificate as x509-cert re-encodes it.
fn tbs_der(cert_der: &[u8]) -> Vec<u8> {
    x509_cert::Certificate::from_der(cert_der).unwrap().tbs_certificate.to_der().unwrap()
}

/// SCT list extension holding one SCT from `ct_key` over a precertificate.
fn sct_list_extension(
    ct_key: &p256::ecdsa::SigningKey,
    log_id: &[u8],
    timestamp_ms: u64,
    issuer_key_hash: &[u8],
    precert_tbs: &[u8],
) -> CustomExtension {
    let mut signed = vec![0u8, 0];
    signed.extend_from_slice(&timestamp_ms.to_be_bytes());
    signed.extend_from_slice(&[0, 1]);
    signed.extend_from_slice(issuer_key_hash);
    signed.extend_from_slice(&(precert_tbs.len() as u32).to_be_bytes()[1..]);
    signed.extend_from_slice(precert_tbs);
    signed.extend_from_slice(&[0, 0]);
    let signature: p256::ecdsa::Signature = ct_key.sign(&signed);
    let signature = signature.to_der();

    let mut sct = vec![0u8];
    sct.extend_from_slice(log_id);
    sct.extend_from_slice(&timestamp_ms.to_be_bytes());
    sct.extend_from_slice(&[0, 0, 4, 3]);
    sct.extend_from_slice(&(signature.as_bytes().len() as u16).to_be_bytes());
    sct.extend_from_slice(signature.as_bytes());

    let mut list = Vec::new();
    list.extend_from_slice(&(sct.len() as u16 + 2).to_be_bytes());
    list.extend_from_slice(&(sct.len() as u16).to_be_bytes());
    list.extend_from_slice(&sct);

    let value = der::asn1::OctetString::new(list).unwrap().to_der().unwrap();
    CustomExtension::from_oid_content(&[1, 3, 6, 1, 4, 1, 11129, 2, 4, 2], value)
}

/// Fulcio-like CA (P-384 root and intermediate), a P-256 leaf carrying an
/// embedded SCT, a CT log key and a Rekor log key.
pub struct SigstorePki {
    pub root_der: Vec<u8>,
    pub intermediate_der: Vec<u8>,
    pub leaf_der: Vec<u8>,
    pub leaf_key: p256::ecdsa::SigningKey,
    pub rekor_key: p256::ecdsa::SigningKey,
    pub rekor_spki_der: Vec<u8>,
    pub ct_spki_der: Vec<u8>,
}

impl SigstorePki {
    pub fn log_id(&self) -> Vec<u8> {
        Sha256::digest(&self.rekor_spki_der).to_vec()
    }

    pub fn ct_log_id(&self) -> Vec<u8> {
        Sha256::digest(&self.ct_spki_der).to_vec()
    }
}

pub fn sigstore_pki(identity: &FulcioIdentity) -> SigstorePki {
    let root_key = key_pair(&PKCS_ECDSA_P384_SHA384);
    let root = params("sigstore", IsCa::Ca(BasicConstraints::Constrained(1)), (2021, 2031))
        .self_signed(&root_key)
        .unwrap();

    let intermediate_key = key_pair(&PKCS_ECDSA_P384_SHA384);
    let intermediate = issue(
        params("sigstore-intermediate", IsCa::Ca(BasicConstraints::Constrained(0)), (2022, 2031)),
        &intermediate_key,
        &root,
        &root_key,
    );

    let leaf_key = key_pair(&PKCS_ECDSA_P256_SHA256);
    let mut leaf_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    leaf_params.distinguished_name = DistinguishedName::new();
    // Fulcio leaves live ten minutes around the log integration time.
    leaf_params.not_before = time::OffsetDateTime::from_unix_timestamp(VALID_AT as i64 - 60).unwrap();
    leaf_params.not_after = time::OffsetDateTime::from_unix_timestamp(VALID_AT as i64 + 540).unwrap();
    leaf_params.subject_alt_names = vec![SanType::URI(identity.workflow_uri().try_into().unwrap())];
    leaf_params.custom_extensions = vec![
        CustomExtension::from_oid_content(&[1, 3, 6, 1, 4, 1, 57264, 1, 1], identity.issuer.as_bytes().to_vec()),
        CustomExtension::from_oid_content(&[1, 3, 6, 1, 4, 1, 57264, 1, 5], identity.repository.as_bytes().to_vec()),
        utf8_extension(&[1, 3, 6, 1, 4, 1, 57264, 1, 8], &identity.issuer),
        utf8_extension(&[1, 3, 6, 1, 4, 1, 57264, 1, 9], &identity.workflow_uri()),
        utf8_extension(
            &[1, 3, 6, 1, 4, 1, 57264, 1, 12],
            &format!("https://github.com/{}", identity.repository),
        ),
    ];
    leaf_params.serial_number = Some(SerialNumber::from_slice(&[0x4f, 0x1c, 0x2b, 0x7a]));

    // The CT log signs the precertificate; the issued leaf embeds its SCT.
    let (ct_key, ct_spki_der) = p256_key();
    let precert = issue(leaf_params.clone(), &leaf_key, &intermediate, &intermediate_key);
    let issuer_spki = x509_cert::Certificate::from_der(intermediate.der())
        .unwrap()
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .unwrap();
    leaf_params.custom_extensions.push(sct_list_extension(
        &ct_key,
        &Sha256::digest(&ct_spki_der),
        VALID_AT * 1000,
        &Sha256::digest(&issuer_spki),
        &tbs_der(precert.der()),
    ));
    let leaf = issue(leaf_params, &leaf_key, &intermediate, &intermediate_key);

    let (rekor_key, rekor_spki_der) = p256_key();

    SigstorePki {
        root_der: root.der().to_vec(),
        intermediate_der: intermediate.der().to_vec(),
        leaf_der: leaf.der().to_vec(),
        leaf_key: p256::ecdsa::SigningKey::from_pkcs8_der(&leaf_key.serialize_der()).unwrap(),
        rekor_key,
        rekor_spki_der,
        ct_spki_der,
    }
}

/// Sigstore `trusted_root.json` trusting the `pki` CA and log.
pub fn trusted_root_json(pki: &SigstorePki) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "mediaType": "application/vnd.dev.sigstore.trustedroot+json;version=0.1",
        "tlogs": [{
            "baseUrl": "https://rekor.example.test",
            "hashAlgorithm": "SHA2_256",
            "publicKey": {
                "rawBytes": STANDARD.encode(&pki.rekor_spki_der),
                "keyDetails": "PKIX_ECDSA_P256_SHA_256",
                "validFor": { "start": "2021-01-12T11:53:27.000Z" }
            },
            "logId": { "keyId": STANDARD.encode(pki.log_id()) }
        }],
        "certificateAuthorities": [{
            "subject": { "organization": "sigstore.dev", "commonName": "sigstore" },
            "uri": "https://fulcio.example.test",
            "certChain": {
                "certificates": [
                    { "rawBytes": STANDARD.encode(&pki.intermediate_der) },
                    { "rawBytes": STANDARD.encode(&pki.root_der) }
                ]
            },
            "validFor": { "start": "2022-04-13T20:06:15.000Z" }
        }],
        "ctlogs": [{
            "baseUrl": "https://ctfe.example.test",
            "hashAlgorithm": "SHA2_256",
            "publicKey": {
                "rawBytes": STANDARD.encode(&pki.ct_spki_der),
                "keyDetails": "PKIX_ECDSA_P256_SHA_256",
                "validFor": { "start": "2022-10-20T00:00:00.000Z" }
            },
            "logId": { "keyId": STANDARD.encode(pki.ct_log_id()) }
        }],
        "timestampAuthorities": []
    }))
    .unwrap()
}

/// in-toto statement for `digest` with an aws-nitro-enclave predicate.
pub fn statement(digest: &str, pcrs: &BTreeMap<RegisterIndex, Vec<u8>>) -> Vec<u8> {
    let predicate: serde_json::Map<String, serde_json::Value> = pcrs
        .iter()
        .map(|(i, v)| (format!("PCR{}", i), serde_json::Value::String(hex::encode(v))))
        .collect();
    serde_json::to_vec(&serde_json::json!({
        "_type": "https://in-toto.io/Statement/v1",
        "subject": [{ "name": "confidential-inference.eif", "digest": { "sha256": digest } }],
        "predicateType": "https://tinfoil.sh/predicate/aws-nitro-enclave/v1",
        "predicate": predicate,
    }))
    .unwrap()
}

pub const PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = format!("DSSEv1 {} {} {} ", payload_type.len(), payload_type, payload.len()).into_bytes();
    out.extend_from_slice(payload);
    out
}

/// Sigstore v0.3 bundle with a DSSE envelope over `payload`, logged at
/// [`VALID_AT`].
pub fn bundle_json(pki: &SigstorePki, payload: &[u8]) -> Vec<u8> {
    let dsse_sig: p256::ecdsa::Signature = pki.leaf_key.sign(&pae(PAYLOAD_TYPE, payload));
    let dsse_sig = STANDARD.encode(dsse_sig.to_der().as_bytes());

    let body = serde_json::to_vec(&serde_json::json!({
        "apiVersion": "0.0.1",
        "kind": "dsse",
        "spec": {
            "payloadHash": { "algorithm": "sha256", "value": hex::encode(Sha256::digest(payload)) },
            "signatures": [{ "signature": dsse_sig }]
        }
    }))
    .unwrap();
    let body = STANDARD.encode(body);

    let log_index = 1_234_567u64;
    let canonical = format!(
        r#"{{"body":"{}","integratedTime":{},"logID":"{}","logIndex":{}}}"#,
        body,
        VALID_AT,
        hex::encode(pki.log_id()),
        log_index
    );
    let set: p256::ecdsa::Signature = pki.rekor_key.sign(canonical.as_bytes());

    serde_json::to_vec(&serde_json::json!({
        "mediaType": "application/vnd.dev.sigstore.bundle.v0.3+json",
        "verificationMaterial": {
            "certificate": { "rawBytes": STANDARD.encode(&pki.leaf_der) },
            "tlogEntries": [{
                "logIndex": log_index.to_string(),
                "logId": { "keyId": STANDARD.encode(pki.log_id()) },
                "kindVersion": { "kind": "dsse", "version": "0.0.1" },
                "integratedTime": VALID_AT.to_string(),
                "inclusionPromise": { "signedEntryTimestamp": STANDARD.encode(set.to_der().as_bytes()) },
                "canonicalizedBody": body
            }]
        },
        "dsseEnvelope": {
            "payload": STANDARD.encode(payload),
            "payloadType": PAYLOAD_TYPE,
            "signatures": [{ "sig": dsse_sig, "keyid": "" }]
        }
    }))
    .unwrap()
}

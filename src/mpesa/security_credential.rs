//! Derives Daraja's `SecurityCredential`, `spec.md` §4.5: the initiator
//! password RSA-encrypted (PKCS#1 v1.5) under the provider's X.509
//! public certificate, base64-encoded.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use rsa::Pkcs1v15Encrypt;
use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;

use crate::errors::{CoreError, CoreResult};

/// Valid RSA modulus sizes in bytes: 1024/1536/2048/3072/4096-bit keys.
const VALID_KEY_SIZES: [usize; 5] = [128, 192, 256, 384, 512];

/// Encrypts `initiator_password` under the PEM-encoded public key read
/// from `cert_pem`, returning the base64 `SecurityCredential` string.
pub fn derive_security_credential(initiator_password: &str, cert_pem: &str) -> CoreResult<String> {
    let public_key = RsaPublicKey::from_public_key_pem(cert_pem)
        .map_err(|e| CoreError::config(format!("invalid mpesa certificate: {e}")))?;

    let mut rng = rand::rngs::OsRng;
    let ciphertext = public_key
        .encrypt(&mut rng, Pkcs1v15Encrypt, initiator_password.as_bytes())
        .map_err(|e| CoreError::external(format!("security credential encryption failed: {e}")))?;

    if !VALID_KEY_SIZES.contains(&ciphertext.len()) {
        return Err(CoreError::config(format!(
            "mpesa certificate produced an unexpected ciphertext length ({} bytes)",
            ciphertext.len()
        )));
    }

    Ok(B64.encode(ciphertext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;
    use rsa::pkcs8::EncodePublicKey;

    fn sandbox_cert_pem() -> String {
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        public_key.to_public_key_pem(Default::default()).unwrap()
    }

    #[test]
    fn encrypts_to_expected_length() {
        let cert = sandbox_cert_pem();
        let cred = derive_security_credential("sandbox-pass", &cert).unwrap();
        let decoded = B64.decode(&cred).unwrap();
        assert!(VALID_KEY_SIZES.contains(&decoded.len()));
    }

    #[test]
    fn rejects_malformed_certificate() {
        let err = derive_security_credential("pw", "not a cert").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}

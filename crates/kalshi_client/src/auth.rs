//! RSA-PSS request signing for the Kalshi API.
//!
//! Signature: `RSA-PSS(SHA256, timestamp + METHOD + path)` as base64, where
//! `path` never includes the query string.

use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::{BlindedSigningKey, Signature};
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::RsaPrivateKey;

use common::Error;

/// API key id plus the parsed signing key.
#[derive(Clone)]
pub struct KalshiAuth {
    api_key: String,
    signing_key: BlindedSigningKey<Sha256>,
}

impl std::fmt::Debug for KalshiAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KalshiAuth")
            .field("api_key", &self.api_key)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

impl KalshiAuth {
    /// Parse a PKCS#1 or PKCS#8 PEM. Literal `\n` sequences are accepted in
    /// place of newlines so keys can live on one line in `.env`.
    pub fn new(api_key: &str, pem_string: &str) -> Result<Self, Error> {
        if api_key.trim().is_empty() {
            return Err(Error::Auth("API key id is empty".into()));
        }
        let pem = pem_string.replace("\\n", "\n");
        let pem = pem.trim();

        let private_key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| Error::Auth(format!("Failed to parse RSA private key: {e}")))?;

        Ok(Self {
            api_key: api_key.trim().to_string(),
            signing_key: BlindedSigningKey::<Sha256>::new(private_key),
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Sign a request, returning `(timestamp_ms, base64_signature)`.
    pub fn sign_request(&self, method: &str, path: &str) -> (String, String) {
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let message = signing_message(&timestamp, method, path);

        let mut rng = rand::thread_rng();
        let signature: Signature = self.signing_key.sign_with_rng(&mut rng, message.as_bytes());
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());

        (timestamp, sig_b64)
    }

    /// Authentication headers for one request.
    pub fn headers(&self, method: &str, path: &str) -> Result<HeaderMap, Error> {
        let (timestamp, signature) = self.sign_request(method, path);

        let mut headers = HeaderMap::new();
        headers.insert("KALSHI-ACCESS-KEY", header_value(&self.api_key)?);
        headers.insert("KALSHI-ACCESS-TIMESTAMP", header_value(&timestamp)?);
        headers.insert("KALSHI-ACCESS-SIGNATURE", header_value(&signature)?);
        Ok(headers)
    }
}

fn signing_message(timestamp: &str, method: &str, path: &str) -> String {
    let path_clean = path.split('?').next().unwrap_or(path);
    format!("{}{}{}", timestamp, method.to_ascii_uppercase(), path_clean)
}

fn header_value(raw: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(raw).map_err(|e| Error::Auth(format!("invalid header value: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pss::VerifyingKey;
    use rsa::signature::Verifier;

    fn test_key() -> (RsaPrivateKey, String) {
        let private_key =
            RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("keygen failed");
        let pem = rsa::pkcs1::EncodeRsaPrivateKey::to_pkcs1_pem(
            &private_key,
            rsa::pkcs1::LineEnding::LF,
        )
        .expect("pem encode failed");
        (private_key, pem.to_string())
    }

    #[test]
    fn test_signing_message_strips_query() {
        assert_eq!(
            signing_message("123", "get", "/trade-api/v2/markets?limit=5"),
            "123GET/trade-api/v2/markets"
        );
    }

    #[test]
    fn test_signature_verifies_with_public_key() {
        let (private_key, pem) = test_key();
        let auth = KalshiAuth::new("test-key-id", &pem).expect("auth init failed");

        let (ts, sig) = auth.sign_request("GET", "/trade-api/v2/portfolio/balance?foo=bar");
        assert!(ts.parse::<i64>().is_ok(), "timestamp should be numeric");

        let raw = base64::engine::general_purpose::STANDARD
            .decode(&sig)
            .expect("signature should be valid base64");
        assert_eq!(raw.len(), 256, "RSA-2048 PSS sig should be 256 bytes");

        let verifying_key = VerifyingKey::<Sha256>::new(private_key.to_public_key());
        let signature = Signature::try_from(raw.as_slice()).unwrap();
        let message = signing_message(&ts, "GET", "/trade-api/v2/portfolio/balance");
        assert!(verifying_key.verify(message.as_bytes(), &signature).is_ok());
    }

    #[test]
    fn test_escaped_newlines_accepted() {
        let (_, pem) = test_key();
        let escaped = pem.replace('\n', "\\n");
        let auth = KalshiAuth::new("k", &escaped).unwrap();
        let headers = auth.headers("POST", "/trade-api/v2/portfolio/orders").unwrap();
        assert_eq!(headers.get("KALSHI-ACCESS-KEY").unwrap(), "k");
        assert!(headers.contains_key("KALSHI-ACCESS-SIGNATURE"));
    }

    #[test]
    fn test_rejects_bad_key() {
        let err = KalshiAuth::new("k", "not a pem").unwrap_err();
        assert!(err.to_string().contains("RSA private key"));
        assert!(KalshiAuth::new("  ", "x").is_err());
    }
}

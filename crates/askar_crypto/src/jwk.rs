//! JSON Web Key encoding and RFC 7638 thumbprints.

use crate::*;
use base64::Engine;
use sha2::Digest;

/// Base64url (no padding) encode.
pub fn b64_encode(data: &[u8]) -> String {
    base64::prelude::BASE64_URL_SAFE_NO_PAD.encode(data)
}

/// Base64url (no padding) decode.
pub fn b64_decode(data: &str) -> AskarResult<Vec<u8>> {
    base64::prelude::BASE64_URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|_| err_input("invalid base64url in JWK"))
}

/// A JSON Web Key.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Jwk {
    /// Key type: `OKP`, `EC` or `oct`.
    pub kty: String,

    /// Curve name for asymmetric keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// Algorithm for symmetric keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Public x coordinate (or OKP public key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// Public y coordinate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// Private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,

    /// Symmetric key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,

    /// Key identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl Jwk {
    /// Parse a JWK from JSON.
    pub fn from_json(json: &str) -> AskarResult<Self> {
        serde_json::from_str(json).map_err(|e| err_input(format!("invalid JWK: {e}")))
    }

    /// Encode as compact JSON.
    pub fn to_json(&self) -> AskarResult<String> {
        serde_json::to_string(self).map_err(OneErr::new)
    }

    /// Whether this JWK carries secret material.
    pub fn is_secret(&self) -> bool {
        self.d.is_some() || self.k.is_some()
    }

    /// Strip any secret members.
    pub fn to_public(&self) -> Self {
        Self {
            d: None,
            k: None,
            ..self.clone()
        }
    }

    /// RFC 7638 thumbprint: base64url SHA-256 of the required members
    /// serialized in lexicographic order without whitespace.
    pub fn thumbprint(&self) -> AskarResult<String> {
        let field = |name: &str, v: &Option<String>| -> AskarResult<String> {
            v.clone()
                .ok_or_else(|| err_input(format!("JWK missing member '{name}'")))
        };
        // serde_json string escaping keeps members canonical
        let q = |v: &str| serde_json::Value::from(v).to_string();
        let canonical = match self.kty.as_str() {
            "EC" => format!(
                r#"{{"crv":{},"kty":"EC","x":{},"y":{}}}"#,
                q(&field("crv", &self.crv)?),
                q(&field("x", &self.x)?),
                q(&field("y", &self.y)?),
            ),
            "OKP" => format!(
                r#"{{"crv":{},"kty":"OKP","x":{}}}"#,
                q(&field("crv", &self.crv)?),
                q(&field("x", &self.x)?),
            ),
            "oct" => format!(
                r#"{{"k":{},"kty":"oct"}}"#,
                q(&field("k", &self.k)?)
            ),
            _ => return Err(err_unsupported("Unsupported JWK key type")),
        };
        Ok(b64_encode(&sha2::Sha256::digest(canonical.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc7638_thumbprint() {
        // RFC 7638 section 3.1
        let jwk = Jwk {
            kty: "RSA".into(),
            ..Default::default()
        };
        assert!(jwk.thumbprint().is_err());

        // RFC 8037 appendix A.3
        let jwk = Jwk::from_json(
            r#"{"kty":"OKP","crv":"Ed25519","x":"11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"}"#,
        )
        .unwrap();
        assert_eq!(
            "kPrK_qmxVWaYVA9wwBF6Iuo3vVzz7TxHCTwXBygrS4k",
            jwk.thumbprint().unwrap()
        );
    }

    #[test]
    fn public_strips_secret() {
        let jwk = Jwk {
            kty: "OKP".into(),
            crv: Some("X25519".into()),
            x: Some("AAAA".into()),
            d: Some("BBBB".into()),
            ..Default::default()
        };
        assert!(jwk.is_secret());
        let public = jwk.to_public();
        assert!(!public.is_secret());
        assert_eq!(
            r#"{"kty":"OKP","crv":"X25519","x":"AAAA"}"#,
            public.to_json().unwrap()
        );
    }
}

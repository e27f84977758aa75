use p256::{EncodedPoint, FieldBytes};
use pbi_core::{PubKeyJwk, SigAlg};
use pbi_error::{ErrorCode, Failure};

/// An issuer's private signing key, dispatched on algorithm the same way
/// [`pbi_core::SigAlg`] is: `es256` or `ed25519`, never assumed.
pub enum IssuerSigningKey {
    /// ECDSA P-256 over SHA-256, DER-encoded signatures.
    Es256(p256::ecdsa::SigningKey),
    /// Ed25519.
    Ed25519(ed25519_dalek::SigningKey),
}

impl IssuerSigningKey {
    /// The algorithm this key signs with.
    #[must_use]
    pub fn alg(&self) -> SigAlg {
        match self {
            Self::Es256(_) => SigAlg::Es256,
            Self::Ed25519(_) => SigAlg::Ed25519,
        }
    }

    /// The public key corresponding to this signing key, as a JWK.
    #[must_use]
    pub fn pub_key_jwk(&self) -> PubKeyJwk {
        match self {
            Self::Es256(sk) => {
                let vk = p256::ecdsa::VerifyingKey::from(sk);
                let encoded = vk.to_encoded_point(false);
                PubKeyJwk {
                    kty: "EC".to_string(),
                    crv: "P-256".to_string(),
                    x: pbi_crypto::base64url_encode(encoded.x().expect("uncompressed point has x")),
                    y: Some(pbi_crypto::base64url_encode(encoded.y().expect("uncompressed point has y"))),
                    kid: None,
                    alg: Some(-7),
                }
            }
            Self::Ed25519(sk) => {
                let vk = sk.verifying_key();
                PubKeyJwk {
                    kty: "OKP".to_string(),
                    crv: "Ed25519".to_string(),
                    x: pbi_crypto::base64url_encode(vk.as_bytes()),
                    y: None,
                    kid: None,
                    alg: None,
                }
            }
        }
    }

    /// Sign `payload`, returning raw signature bytes (DER for ES256, the
    /// 64-byte R||S encoding for Ed25519).
    #[must_use]
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        match self {
            Self::Es256(sk) => {
                use p256::ecdsa::signature::Signer as _;
                let sig: p256::ecdsa::Signature = sk.sign(payload);
                sig.to_der().as_bytes().to_vec()
            }
            Self::Ed25519(sk) => {
                use ed25519_dalek::Signer as _;
                let sig: ed25519_dalek::Signature = sk.sign(payload);
                sig.to_bytes().to_vec()
            }
        }
    }
}

/// Verify `sig_b64url` over `payload` under `pub_key_jwk`, dispatching on
/// `alg` the way every signature check in this crate does.
///
/// # Errors
///
/// Returns [`ErrorCode::IssuerSignatureInvalid`] if the signature does
/// not verify, or [`ErrorCode::InvalidStructure`] if `pub_key_jwk` or
/// `sig_b64url` is malformed.
pub fn verify_signature(alg: SigAlg, pub_key_jwk: &PubKeyJwk, payload: &[u8], sig_b64url: &str) -> Result<(), Failure> {
    let sig_bytes = pbi_crypto::base64url_decode(sig_b64url)
        .map_err(|_| Failure::new(ErrorCode::IssuerSignatureInvalid))?;

    match alg {
        SigAlg::Es256 => {
            use p256::ecdsa::signature::Verifier as _;
            let vk = p256_verifying_key_from_jwk(pub_key_jwk)?;
            let sig = p256::ecdsa::Signature::from_der(&sig_bytes)
                .map_err(|_| Failure::new(ErrorCode::IssuerSignatureInvalid))?;
            vk.verify(payload, &sig)
                .map_err(|_| Failure::new(ErrorCode::IssuerSignatureInvalid))
        }
        SigAlg::Ed25519 => {
            use ed25519_dalek::Verifier as _;
            let vk = ed25519_verifying_key_from_jwk(pub_key_jwk)?;
            let sig_arr: [u8; 64] = sig_bytes
                .try_into()
                .map_err(|_| Failure::new(ErrorCode::IssuerSignatureInvalid))?;
            let sig = ed25519_dalek::Signature::from_bytes(&sig_arr);
            vk.verify(payload, &sig)
                .map_err(|_| Failure::new(ErrorCode::IssuerSignatureInvalid))
        }
    }
}

pub(crate) fn p256_verifying_key_from_jwk(jwk: &PubKeyJwk) -> Result<p256::ecdsa::VerifyingKey, Failure> {
    if jwk.kty != "EC" || jwk.crv != "P-256" {
        return Err(Failure::with_detail(ErrorCode::InvalidStructure, "issuer pubKeyJwk must be EC P-256"));
    }
    let y = jwk
        .y
        .as_deref()
        .ok_or_else(|| Failure::with_detail(ErrorCode::InvalidStructure, "issuer pubKeyJwk.y missing"))?;
    let x_bytes = pbi_crypto::base64url_decode(&jwk.x)
        .map_err(|_| Failure::new(ErrorCode::InvalidStructure))?;
    let y_bytes = pbi_crypto::base64url_decode(y).map_err(|_| Failure::new(ErrorCode::InvalidStructure))?;
    if x_bytes.len() != 32 || y_bytes.len() != 32 {
        return Err(Failure::with_detail(ErrorCode::InvalidStructure, "issuer pubKeyJwk.x/y must each be 32 bytes"));
    }
    let x_arr = *FieldBytes::from_slice(&x_bytes);
    let y_arr = *FieldBytes::from_slice(&y_bytes);
    let encoded = EncodedPoint::from_affine_coordinates(&x_arr, &y_arr, false);
    p256::ecdsa::VerifyingKey::from_encoded_point(&encoded)
        .map_err(|_| Failure::with_detail(ErrorCode::InvalidStructure, "issuer pubKeyJwk is not a valid P-256 point"))
}

pub(crate) fn ed25519_verifying_key_from_jwk(jwk: &PubKeyJwk) -> Result<ed25519_dalek::VerifyingKey, Failure> {
    if jwk.kty != "OKP" || jwk.crv != "Ed25519" {
        return Err(Failure::with_detail(ErrorCode::InvalidStructure, "issuer pubKeyJwk must be OKP Ed25519"));
    }
    let x_bytes = pbi_crypto::base64url_decode(&jwk.x)
        .map_err(|_| Failure::new(ErrorCode::InvalidStructure))?;
    let arr: [u8; 32] = x_bytes
        .try_into()
        .map_err(|_| Failure::with_detail(ErrorCode::InvalidStructure, "issuer pubKeyJwk.x must be 32 bytes"))?;
    ed25519_dalek::VerifyingKey::from_bytes(&arr)
        .map_err(|_| Failure::with_detail(ErrorCode::InvalidStructure, "issuer pubKeyJwk is not a valid Ed25519 point"))
}

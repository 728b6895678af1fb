use askar_crypto::jwk::{b64_decode, b64_encode};
use askar_crypto::kdf::{Ecdh1PU, EcdhEs};
use askar_crypto::*;
use pretty_assertions::assert_eq;

fn x25519_jwk(d: &str, x: &str) -> LocalKey {
    LocalKey::from_jwk(&format!(
        r#"{{"kty":"OKP","crv":"X25519","d":"{d}","x":"{x}"}}"#
    ))
    .unwrap()
}

fn gen(alg: KeyAlg) -> LocalKey {
    LocalKey::generate(alg, KeyBackend::Software, true).unwrap()
}

#[test]
fn ecdh_1pu_wrapped_expected() {
    let ephem = x25519_jwk(
        "x8EVZH4Fwk673_mUujnliJoSrLz0zYzzCWp5GUX2fc8",
        "k9of_cpAajy0poW5gaixXGs9nHkwg1AFqUAFa39dyBc",
    );
    let alice = x25519_jwk(
        "i9KuFhSzEBsiv3PKVL5115OCdsqQai5nj_Flzfkw5jU",
        "Knbm_BcdQr7WIoz-uqit9M0wbcfEr6y-9UfIZ8QnBD4",
    );
    let bob = x25519_jwk(
        "1gDirl_r_Y3-qUa3WXHgEXrrEHngWThU3c9zj9A2uBg",
        "BT7aR0ItXfeDAldeeOlXL_wXqp-j5FltT0vRSG16kRw",
    );

    let protected = b64_encode(
        br#"{"alg":"ECDH-1PU+A128KW","enc":"A256CBC-HS512","apu":"QWxpY2U","apv":"Qm9iIGFuZCBDaGFybGll","epk":{"kty":"OKP","crv":"X25519","x":"k9of_cpAajy0poW5gaixXGs9nHkwg1AFqUAFa39dyBc"}}"#,
    );
    let cek_bytes: Vec<u8> = (0..64u8).map(|i| 0xff - i).collect();
    let cek = LocalKey::from_secret_bytes(KeyAlg::A256CbcHs512, &cek_bytes).unwrap();
    let iv: Vec<u8> = (0..16u8).collect();
    let message = b"Three is a magic number.";

    let enc = cek
        .aead_encrypt(message, Some(&iv), protected.as_bytes())
        .unwrap();
    assert_eq!(
        "Az2IWsISEMDJvyc5XRL-3-d-RgNBOGolCsxFFoUXFYw",
        b64_encode(enc.ciphertext())
    );
    let cc_tag = enc.tag().to_vec();
    assert_eq!(
        "HLb4fTlm8spGmij3RyOs2gJ4DpHM4hhVRwdF_hGb3WQ",
        b64_encode(&cc_tag)
    );

    let agree = Ecdh1PU::new(b"ECDH-1PU+A128KW", b"Alice", b"Bob and Charlie");
    let kek = agree
        .derive_key(KeyAlg::A128Kw, &ephem, &alice, &bob, &cc_tag, false)
        .unwrap();
    assert_eq!(
        "df4c37a0668306a11e3d6b0074b5d8df",
        hex::encode(&kek.secret_bytes().unwrap()[..])
    );

    let wrapped = agree
        .sender_wrap_key(KeyAlg::A128Kw, &ephem, &alice, &bob, &cek, &cc_tag)
        .unwrap();
    assert_eq!(
        "pOMVA9_PtoRe7xXW1139NzzN1UhiFoio8lGto9cf0t8PyU-sjNXH8-LIRLycq8CHJQbDwvQeU1cSl55cQ0hGezJu2N9IY0QN",
        b64_encode(wrapped.ciphertext())
    );

    // receiver side only holds public keys for the ephemeral and sender
    let ephem_pub =
        LocalKey::from_public_bytes(KeyAlg::X25519, &ephem.public_bytes().unwrap()).unwrap();
    let alice_pub =
        LocalKey::from_public_bytes(KeyAlg::X25519, &alice.public_bytes().unwrap()).unwrap();
    let unwrapped = agree
        .receiver_unwrap_key(
            KeyAlg::A128Kw,
            KeyAlg::A256CbcHs512,
            &ephem_pub,
            &alice_pub,
            &bob,
            wrapped.ciphertext(),
            &cc_tag,
            &[],
            None,
        )
        .unwrap();
    assert_eq!(cek_bytes, unwrapped.secret_bytes().unwrap().to_vec());

    let plain = unwrapped
        .aead_decrypt(
            &b64_decode("Az2IWsISEMDJvyc5XRL-3-d-RgNBOGolCsxFFoUXFYw").unwrap(),
            &iv,
            Some(&cc_tag),
            protected.as_bytes(),
        )
        .unwrap();
    assert_eq!(&message[..], &plain[..]);
}

#[test]
fn ecdh_es_direct_p256() {
    let bob = gen(KeyAlg::P256);
    let ephem = gen(KeyAlg::P256);
    let agree = EcdhEs::new(b"A256GCM", b"Alice", b"Bob");
    let enc = agree
        .encrypt_direct(KeyAlg::A256Gcm, &ephem, &bob, b"hello there", None, b"aad")
        .unwrap();

    let ephem_pub = LocalKey::from_jwk(&ephem.to_jwk_public().unwrap()).unwrap();
    let bob_pub = LocalKey::from_jwk(&bob.to_jwk_public().unwrap()).unwrap();
    let dec = agree
        .decrypt_direct(
            KeyAlg::A256Gcm,
            &ephem_pub,
            &bob,
            enc.ciphertext(),
            enc.nonce(),
            Some(enc.tag()),
            b"aad",
        )
        .unwrap();
    assert_eq!(b"hello there", &dec[..]);

    // a party without the recipient secret can't derive the key
    let err = agree
        .derive_key(KeyAlg::A256Gcm, &ephem_pub, &bob_pub, true)
        .unwrap_err();
    assert_eq!(ErrorKind::Input, err.kind());
}

#[test]
fn ecdh_es_wrapped_x25519() {
    let bob = gen(KeyAlg::X25519);
    let ephem = gen(KeyAlg::X25519);
    let cek = gen(KeyAlg::A256Gcm);
    let enc = cek.aead_encrypt(b"secret message", None, b"").unwrap();

    let agree = EcdhEs::new(b"ECDH-ES+A128KW", b"Alice", b"Bob");
    let wrapped = agree
        .sender_wrap_key(KeyAlg::A128Kw, &ephem, &bob, &cek)
        .unwrap();
    // 32 byte key plus the 8 byte integrity block
    assert_eq!(40, wrapped.ciphertext().len());

    let unwrapped = agree
        .receiver_unwrap_key(
            KeyAlg::A128Kw,
            KeyAlg::A256Gcm,
            &ephem,
            &bob,
            wrapped.ciphertext(),
            &[],
            None,
        )
        .unwrap();
    let dec = unwrapped
        .aead_decrypt(enc.ciphertext(), enc.nonce(), Some(enc.tag()), b"")
        .unwrap();
    assert_eq!(b"secret message", &dec[..]);
}

#[test]
fn ecdh_1pu_direct_p256() {
    let alice = gen(KeyAlg::P256);
    let bob = gen(KeyAlg::P256);
    let ephem = gen(KeyAlg::P256);
    let agree = Ecdh1PU::new(b"A256GCM", b"Alice", b"Bob");
    let enc = agree
        .encrypt_direct(KeyAlg::A256Gcm, &ephem, &alice, &bob, b"hello", None, b"")
        .unwrap();
    let dec = agree
        .decrypt_direct(
            KeyAlg::A256Gcm,
            &ephem,
            &alice,
            &bob,
            enc.ciphertext(),
            enc.nonce(),
            Some(enc.tag()),
            b"",
        )
        .unwrap();
    assert_eq!(b"hello", &dec[..]);

    // wrong sender
    let mallory = gen(KeyAlg::P256);
    let err = agree
        .decrypt_direct(
            KeyAlg::A256Gcm,
            &ephem,
            &mallory,
            &bob,
            enc.ciphertext(),
            enc.nonce(),
            Some(enc.tag()),
            b"",
        )
        .unwrap_err();
    assert_eq!(ErrorKind::Encryption, err.kind());
}

#[test]
fn ecdh_rejects_asymmetric_output() {
    let a = gen(KeyAlg::X25519);
    let b = gen(KeyAlg::X25519);
    let err = EcdhEs::new(b"x", b"", b"")
        .derive_key(KeyAlg::Ed25519, &a, &b, false)
        .unwrap_err();
    assert_eq!(ErrorKind::Unsupported, err.kind());
}

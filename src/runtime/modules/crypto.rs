/// AES encryption modules
///
/// Keys are null-padded up to the next AES size (16/24/32 bytes) or truncated
/// to 32; the IV is null-padded or truncated to 16 bytes and defaults to
/// zeros. Padding is PKCS#7, ciphertext is carried as base64 or hex text.

use super::{option_key, ModuleContext, ModuleHandler, ModuleOutput};
use crate::error::ModuleError;
use aes::{Aes128, Aes192, Aes256};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use std::fmt::Display;

const BLOCK_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesMode {
    Ecb,
    Cbc,
}

impl AesMode {
    fn parse(value: &str) -> Result<Self, ModuleError> {
        match option_key(value).as_str() {
            "" | "ecb" => Ok(AesMode::Ecb),
            "cbc" => Ok(AesMode::Cbc),
            other => Err(ModuleError::Validation(format!("unsupported AES mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Base64,
    Hex,
}

impl TextEncoding {
    fn parse(value: &str) -> Result<Self, ModuleError> {
        match option_key(value).as_str() {
            "" | "base64" => Ok(TextEncoding::Base64),
            "hex" => Ok(TextEncoding::Hex),
            other => Err(ModuleError::Validation(format!("unsupported encoding '{other}'"))),
        }
    }

    fn encode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Base64 => STANDARD.encode(bytes),
            TextEncoding::Hex => hex::encode(bytes),
        }
    }

    fn decode(self, text: &str) -> Result<Vec<u8>, ModuleError> {
        let compact: String = text.split_whitespace().collect();
        match self {
            TextEncoding::Base64 => STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| ModuleError::Crypto(format!("invalid base64 ciphertext: {e}"))),
            TextEncoding::Hex => hex::decode(&compact)
                .map_err(|e| ModuleError::Crypto(format!("invalid hex ciphertext: {e}"))),
        }
    }
}

/// Null-pad to 16, 24 or 32 bytes (next size up), truncate beyond 32
pub fn normalize_key(key: &[u8]) -> Vec<u8> {
    let size = match key.len() {
        0..=16 => 16,
        17..=24 => 24,
        _ => 32,
    };
    let mut normalized = key[..key.len().min(size)].to_vec();
    normalized.resize(size, 0);
    normalized
}

pub fn normalize_iv(iv: &[u8]) -> [u8; BLOCK_SIZE] {
    let mut normalized = [0u8; BLOCK_SIZE];
    let len = iv.len().min(BLOCK_SIZE);
    normalized[..len].copy_from_slice(&iv[..len]);
    normalized
}

fn crypto_error(err: impl Display) -> ModuleError {
    ModuleError::Crypto(err.to_string())
}

macro_rules! encrypt_with {
    ($mode:expr, $cipher:ty, $key:expr, $iv:expr, $data:expr) => {
        match $mode {
            AesMode::Ecb => ecb::Encryptor::<$cipher>::new_from_slice($key)
                .map_err(crypto_error)?
                .encrypt_padded_vec_mut::<Pkcs7>($data),
            AesMode::Cbc => cbc::Encryptor::<$cipher>::new_from_slices($key, $iv)
                .map_err(crypto_error)?
                .encrypt_padded_vec_mut::<Pkcs7>($data),
        }
    };
}

macro_rules! decrypt_with {
    ($mode:expr, $cipher:ty, $key:expr, $iv:expr, $data:expr) => {
        match $mode {
            AesMode::Ecb => ecb::Decryptor::<$cipher>::new_from_slice($key)
                .map_err(crypto_error)?
                .decrypt_padded_vec_mut::<Pkcs7>($data)
                .map_err(crypto_error)?,
            AesMode::Cbc => cbc::Decryptor::<$cipher>::new_from_slices($key, $iv)
                .map_err(crypto_error)?
                .decrypt_padded_vec_mut::<Pkcs7>($data)
                .map_err(crypto_error)?,
        }
    };
}

/// Encrypt with a raw key and IV (normalized first)
pub fn encrypt(plaintext: &[u8], key: &[u8], iv: &[u8], mode: AesMode) -> Result<Vec<u8>, ModuleError> {
    let key = normalize_key(key);
    let iv = normalize_iv(iv);
    Ok(match key.len() {
        16 => encrypt_with!(mode, Aes128, &key, &iv, plaintext),
        24 => encrypt_with!(mode, Aes192, &key, &iv, plaintext),
        _ => encrypt_with!(mode, Aes256, &key, &iv, plaintext),
    })
}

pub fn decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8], mode: AesMode) -> Result<Vec<u8>, ModuleError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(ModuleError::Crypto(format!(
            "ciphertext length {} is not a positive multiple of {BLOCK_SIZE}",
            ciphertext.len()
        )));
    }
    let key = normalize_key(key);
    let iv = normalize_iv(iv);
    Ok(match key.len() {
        16 => decrypt_with!(mode, Aes128, &key, &iv, ciphertext),
        24 => decrypt_with!(mode, Aes192, &key, &iv, ciphertext),
        _ => decrypt_with!(mode, Aes256, &key, &iv, ciphertext),
    })
}

struct AesParams {
    input: String,
    key: String,
    iv: String,
    mode: AesMode,
    encoding: TextEncoding,
}

impl AesParams {
    fn read(ctx: &ModuleContext<'_>) -> Result<Self, ModuleError> {
        Ok(Self {
            input: ctx.resolve("input"),
            key: ctx.resolve("key"),
            iv: ctx.resolve("iv"),
            mode: AesMode::parse(&ctx.resolve("mode"))?,
            encoding: TextEncoding::parse(&ctx.resolve("encoding"))?,
        })
    }
}

pub struct AesEncrypt;

#[async_trait]
impl ModuleHandler for AesEncrypt {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let params = AesParams::read(ctx)?;
        let ciphertext = encrypt(
            params.input.as_bytes(),
            params.key.as_bytes(),
            params.iv.as_bytes(),
            params.mode,
        )?;
        let encoded = params.encoding.encode(&ciphertext);
        ctx.store_output(encoded.as_str());
        Ok(ModuleOutput::new(encoded))
    }
}

pub struct AesDecrypt;

#[async_trait]
impl ModuleHandler for AesDecrypt {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let params = AesParams::read(ctx)?;
        let ciphertext = params.encoding.decode(&params.input)?;
        let plaintext = decrypt(
            &ciphertext,
            params.key.as_bytes(),
            params.iv.as_bytes(),
            params.mode,
        )?;
        let text = String::from_utf8(plaintext)
            .map_err(|_| ModuleError::Crypto("decrypted bytes are not UTF-8".into()))?;
        ctx.store_output(text.as_str());
        Ok(ModuleOutput::new(text))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::runtime::variables::Variables;
    use crate::workflow::types::ModuleType;
    use serde_json::json;

    #[test]
    fn keys_are_padded_to_the_next_aes_size() {
        assert_eq!(normalize_key(b"").len(), 16);
        assert_eq!(normalize_key(b"short").len(), 16);
        assert_eq!(normalize_key(&[1; 16]).len(), 16);
        assert_eq!(normalize_key(&[1; 17]).len(), 24);
        assert_eq!(normalize_key(&[1; 25]).len(), 32);
        assert_eq!(normalize_key(&[1; 64]), vec![1; 32]);
        assert_eq!(&normalize_key(b"abc")[..4], b"abc\0");
        assert_eq!(normalize_iv(b"0123456789abcdefXYZ"), *b"0123456789abcdef");
    }

    #[test]
    fn round_trips_for_every_key_length() {
        let plaintext = "attack at dawn ✓ with a message longer than one block".as_bytes();
        for mode in [AesMode::Ecb, AesMode::Cbc] {
            for key_len in 1..=64u8 {
                let key: Vec<u8> = (0..key_len).map(|i| b'a' + i % 26).collect();
                for iv in [&b""[..], &b"custom-iv"[..]] {
                    let ciphertext = encrypt(plaintext, &key, iv, mode).unwrap();
                    assert_eq!(ciphertext.len() % BLOCK_SIZE, 0);
                    assert_eq!(
                        decrypt(&ciphertext, &key, iv, mode).unwrap(),
                        plaintext,
                        "mode {mode:?} key length {key_len}"
                    );
                }
            }
        }
    }

    #[test]
    fn empty_plaintext_gets_a_full_padding_block() {
        let ciphertext = encrypt(b"", b"key", b"", AesMode::Ecb).unwrap();
        assert_eq!(ciphertext.len(), BLOCK_SIZE);
        assert_eq!(decrypt(&ciphertext, b"key", b"", AesMode::Ecb).unwrap(), b"");
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let ciphertext = encrypt(b"payload", b"key", b"", AesMode::Cbc).unwrap();
        assert!(matches!(
            decrypt(&ciphertext[..10], b"key", b"", AesMode::Cbc),
            Err(ModuleError::Crypto(_))
        ));
    }

    #[tokio::test]
    async fn modules_round_trip_through_text_encodings() {
        for encoding in ["base64", "HEX"] {
            let encrypt_module = testing::module(ModuleType::AesEncrypt)
                .with("input", "[secret]")
                .with("key", "k3y")
                .with("mode", "CBC")
                .with("iv", "vector")
                .with("encoding", encoding)
                .with("output_var", "sealed");
            let mut vars = Variables::new();
            vars.set("secret", "hunter2");
            testing::run(&AesEncrypt, &encrypt_module, &mut vars).await.unwrap();

            let decrypt_module = encrypt_module
                .clone()
                .with("input", "[sealed]")
                .with("output_var", "opened");
            let output = testing::run(&AesDecrypt, &decrypt_module, &mut vars)
                .await
                .unwrap();
            assert_eq!(output.value, json!("hunter2"));
            assert_eq!(vars.text("opened").as_deref(), Some("hunter2"));
        }
    }

    #[tokio::test]
    async fn bad_ciphertext_text_is_a_crypto_error() {
        let module = testing::module(ModuleType::AesDecrypt)
            .with("input", "zz-not-hex")
            .with("key", "k")
            .with("encoding", "hex");
        assert!(matches!(
            testing::run(&AesDecrypt, &module, &mut Variables::new()).await,
            Err(ModuleError::Crypto(_))
        ));
    }
}

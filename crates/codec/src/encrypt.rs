use aes_gcm::aead::{Aead, KeyInit};
use bytes::Bytes;
use message::{properties, Message, MessagePayload};

use crate::{CodecError, EncryptionAlgorithm, EncryptionConfig};

fn check_key_material<'a>(
    algorithm: EncryptionAlgorithm,
    config: &'a EncryptionConfig,
) -> Result<(&'a [u8], &'a [u8]), CodecError> {
    let key = config.key.as_bytes();
    if key.len() != algorithm.key_len() {
        return Err(CodecError::KeyInvalid(format!(
            "{} requires a {}-byte key, got {}",
            algorithm.as_str(),
            algorithm.key_len(),
            key.len(),
        )));
    }
    let iv = config.iv.as_bytes();
    if iv.len() < algorithm.iv_len() {
        return Err(CodecError::IvInvalid(format!(
            "{} requires at least a {}-byte IV, got {}",
            algorithm.as_str(),
            algorithm.iv_len(),
            iv.len(),
        )));
    }
    Ok((key, &iv[..algorithm.iv_len()]))
}

/// Encrypt the payload in place and mark the message. A no-op for
/// `EncryptionAlgorithm::None` and for already-encrypted messages.
pub fn encrypt_message(
    message: &mut Message,
    algorithm: EncryptionAlgorithm,
    config: &EncryptionConfig,
) -> Result<(), CodecError> {
    if algorithm == EncryptionAlgorithm::None
        || message.header.properties.contains_key(properties::ENCRYPTED)
    {
        return Ok(());
    }
    let (key, iv) = check_key_material(algorithm, config)?;

    let plaintext = message.payload.as_slice();
    let ciphertext = match algorithm {
        EncryptionAlgorithm::None => unreachable!(),
        EncryptionAlgorithm::Aes256Gcm => {
            let cipher = aes_gcm::Aes256Gcm::new_from_slice(key)
                .map_err(|err| CodecError::KeyInvalid(err.to_string()))?;
            cipher
                .encrypt(aes_gcm::Nonce::from_slice(iv), plaintext)
                .map_err(|_| CodecError::AuthFailure)?
        }
        EncryptionAlgorithm::ChaCha20Poly1305 => {
            let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
                .map_err(|err| CodecError::KeyInvalid(err.to_string()))?;
            cipher
                .encrypt(chacha20poly1305::Nonce::from_slice(iv), plaintext)
                .map_err(|_| CodecError::AuthFailure)?
        }
        EncryptionAlgorithm::Aes128Cbc => aes_128_cbc_encrypt(key, iv, plaintext)?,
    };

    message.payload = MessagePayload::Owned(Bytes::from(ciphertext));
    message
        .header
        .properties
        .insert(properties::ENCRYPTED.to_string(), algorithm.as_str().to_string());
    message.touch();
    Ok(())
}

/// Invert `encrypt_message`, recovering the algorithm from the reserved
/// `Encrypted` property and the key material from the queue's config.
pub fn decrypt_message(message: &mut Message, config: &EncryptionConfig) -> Result<(), CodecError> {
    let algorithm = match message.header.properties.get(properties::ENCRYPTED) {
        None => return Ok(()),
        Some(name) => EncryptionAlgorithm::from_str_name(name)
            .ok_or_else(|| CodecError::KeyInvalid(format!("unknown algorithm '{name}'")))?,
    };
    if algorithm == EncryptionAlgorithm::None {
        message.header.properties.remove(properties::ENCRYPTED);
        return Ok(());
    }
    let (key, iv) = check_key_material(algorithm, config)?;

    let ciphertext = message.payload.as_slice();
    let plaintext = match algorithm {
        EncryptionAlgorithm::None => unreachable!(),
        EncryptionAlgorithm::Aes256Gcm => {
            let cipher = aes_gcm::Aes256Gcm::new_from_slice(key)
                .map_err(|err| CodecError::KeyInvalid(err.to_string()))?;
            cipher
                .decrypt(aes_gcm::Nonce::from_slice(iv), ciphertext)
                .map_err(|_| CodecError::AuthFailure)?
        }
        EncryptionAlgorithm::ChaCha20Poly1305 => {
            let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
                .map_err(|err| CodecError::KeyInvalid(err.to_string()))?;
            cipher
                .decrypt(chacha20poly1305::Nonce::from_slice(iv), ciphertext)
                .map_err(|_| CodecError::AuthFailure)?
        }
        EncryptionAlgorithm::Aes128Cbc => aes_128_cbc_decrypt(key, iv, ciphertext)?,
    };

    message.payload = MessagePayload::Owned(Bytes::from(plaintext));
    message.header.properties.remove(properties::ENCRYPTED);
    message.touch();
    Ok(())
}

fn aes_128_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
    let encryptor = cbc::Encryptor::<aes::Aes128>::new_from_slices(key, iv)
        .map_err(|err| CodecError::KeyInvalid(err.to_string()))?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn aes_128_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CodecError> {
    use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
    let decryptor = cbc::Decryptor::<aes::Aes128>::new_from_slices(key, iv)
        .map_err(|err| CodecError::KeyInvalid(err.to_string()))?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CodecError::AuthFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(algorithm: EncryptionAlgorithm, key: &str, iv: &str) -> EncryptionConfig {
        EncryptionConfig {
            algorithm,
            key: key.to_string(),
            iv: iv.to_string(),
            enable_auto_encryption: true,
        }
    }

    fn round_trip(algorithm: EncryptionAlgorithm, key: &str, iv: &str) {
        let config = config(algorithm, key, iv);
        let payload = b"This is a secret message that should be encrypted";
        let mut message = Message::binary(payload.to_vec());

        encrypt_message(&mut message, algorithm, &config).unwrap();
        assert_ne!(message.payload.as_slice(), payload.as_slice());
        assert_eq!(
            message.header.properties.get(properties::ENCRYPTED).map(String::as_str),
            Some(algorithm.as_str()),
        );

        decrypt_message(&mut message, &config).unwrap();
        assert_eq!(message.payload.as_slice(), payload.as_slice());
        assert!(!message.header.properties.contains_key(properties::ENCRYPTED));
    }

    #[test]
    fn aes_128_cbc_round_trip() {
        round_trip(EncryptionAlgorithm::Aes128Cbc, "MySecretKey12345", "MyIV1234567890123");
    }

    #[test]
    fn aes_256_gcm_round_trip() {
        round_trip(
            EncryptionAlgorithm::Aes256Gcm,
            "MySecretKey123456789012345678901",
            "MyIV123456789",
        );
    }

    #[test]
    fn chacha20_round_trip() {
        round_trip(
            EncryptionAlgorithm::ChaCha20Poly1305,
            "0123456789abcdef0123456789abcdef",
            "unique-nonce",
        );
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let config = config(EncryptionAlgorithm::Aes256Gcm, "short", "MyIV123456789");
        let mut message = Message::binary(vec![1u8; 32]);
        assert!(matches!(
            encrypt_message(&mut message, EncryptionAlgorithm::Aes256Gcm, &config),
            Err(CodecError::KeyInvalid(_)),
        ));
    }

    #[test]
    fn short_iv_is_rejected() {
        let config = config(EncryptionAlgorithm::Aes128Cbc, "MySecretKey12345", "tiny");
        let mut message = Message::binary(vec![1u8; 32]);
        assert!(matches!(
            encrypt_message(&mut message, EncryptionAlgorithm::Aes128Cbc, &config),
            Err(CodecError::IvInvalid(_)),
        ));
    }

    #[test]
    fn tampered_gcm_ciphertext_fails_auth() {
        let config = config(
            EncryptionAlgorithm::Aes256Gcm,
            "MySecretKey123456789012345678901",
            "MyIV123456789",
        );
        let mut message = Message::binary(vec![9u8; 64]);
        encrypt_message(&mut message, EncryptionAlgorithm::Aes256Gcm, &config).unwrap();

        let mut tampered = message.payload.to_bytes().to_vec();
        tampered[0] ^= 0xff;
        message.payload = MessagePayload::Owned(Bytes::from(tampered));

        assert_eq!(decrypt_message(&mut message, &config), Err(CodecError::AuthFailure));
    }
}

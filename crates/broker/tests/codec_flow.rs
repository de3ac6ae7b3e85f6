mod common;

use std::time::Duration;

use broker::codec::{
    CompressionAlgorithm, CompressionConfig, EncryptionAlgorithm, EncryptionConfig,
};
use broker::message::{Message, QueueConfig, QueueError};
use common::start_default_broker;

fn gzip_config() -> CompressionConfig {
    CompressionConfig {
        algorithm: CompressionAlgorithm::Gzip,
        level: 6,
        min_size: 100,
        enable_auto_compression: true,
    }
}

fn cbc_config() -> EncryptionConfig {
    EncryptionConfig {
        algorithm: EncryptionAlgorithm::Aes128Cbc,
        key: "MySecretKey12345".to_string(),
        iv: "MyIV1234567890123".to_string(),
        enable_auto_encryption: true,
    }
}

#[tokio::test]
async fn compression_and_encryption_round_trip() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("secure")).unwrap();
    broker.set_compression_config("secure", gzip_config()).unwrap();
    broker.set_encryption_config("secure", cbc_config()).unwrap();

    let payload = vec![b'A'; 2_000];
    broker
        .send("secure", Message::binary(payload.clone()))
        .await
        .unwrap();

    let received = broker
        .receive("secure", Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(received.payload.as_slice(), payload.as_slice());
    assert!(!received
        .header
        .properties
        .contains_key(broker::message::properties::COMPRESSED));
    assert!(!received
        .header
        .properties
        .contains_key(broker::message::properties::ENCRYPTED));

    let compression = broker.compression_stats("secure").unwrap();
    assert_eq!(compression.compressed_messages, 1);
    assert!(
        compression.compression_ratio < 0.10,
        "ratio {}",
        compression.compression_ratio
    );
    let encryption = broker.encryption_stats("secure").unwrap();
    assert_eq!(encryption.encrypted_messages, 1);
    broker.shutdown().await;
}

#[tokio::test]
async fn small_payloads_skip_auto_compression() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("small")).unwrap();
    broker.set_compression_config("small", gzip_config()).unwrap();

    broker.send("small", Message::text("tiny")).await.unwrap();
    let received = broker
        .receive("small", Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(received.payload_string(), "tiny");

    let stats = broker.compression_stats("small").unwrap();
    assert_eq!(stats.total_messages, 1);
    assert_eq!(stats.compressed_messages, 0);
    broker.shutdown().await;
}

#[tokio::test]
async fn gcm_and_chacha_round_trips() {
    let broker = start_default_broker();
    for (queue, config) in [
        (
            "gcm",
            EncryptionConfig {
                algorithm: EncryptionAlgorithm::Aes256Gcm,
                key: "MySecretKey123456789012345678901".to_string(),
                iv: "MyIV123456789".to_string(),
                enable_auto_encryption: true,
            },
        ),
        (
            "chacha",
            EncryptionConfig {
                algorithm: EncryptionAlgorithm::ChaCha20Poly1305,
                key: "0123456789abcdef0123456789abcdef".to_string(),
                iv: "unique-nonce".to_string(),
                enable_auto_encryption: true,
            },
        ),
    ] {
        broker.create_queue(QueueConfig::new(queue)).unwrap();
        broker.set_encryption_config(queue, config).unwrap();
        broker
            .send(queue, Message::text("secret payload"))
            .await
            .unwrap();
        let received = broker
            .receive(queue, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(received.payload_string(), "secret payload");
    }
    broker.shutdown().await;
}

#[tokio::test]
async fn invalid_key_material_is_rejected_at_config_time() {
    let broker = start_default_broker();
    broker.create_queue(QueueConfig::new("secure")).unwrap();
    let err = broker
        .set_encryption_config(
            "secure",
            EncryptionConfig {
                algorithm: EncryptionAlgorithm::Aes256Gcm,
                key: "short".to_string(),
                iv: "MyIV123456789".to_string(),
                enable_auto_encryption: true,
            },
        )
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidConfig(_)));
    broker.shutdown().await;
}

#[tokio::test]
async fn manual_codec_calls_round_trip() {
    let broker = start_default_broker();
    let mut message = Message::binary(vec![b'Z'; 512]);

    broker
        .compress_message(&mut message, CompressionAlgorithm::Zstd, 3)
        .unwrap();
    assert!(message.payload.len() < 512);
    broker
        .encrypt_message(&mut message, EncryptionAlgorithm::Aes128Cbc, &cbc_config())
        .unwrap();
    broker.decrypt_message(&mut message, &cbc_config()).unwrap();
    broker.decompress_message(&mut message).unwrap();
    assert_eq!(message.payload.as_slice(), &[b'Z'; 512][..]);
    broker.shutdown().await;
}

#[tokio::test]
async fn snappy_is_reported_unsupported() {
    let broker = start_default_broker();
    let mut message = Message::binary(vec![0u8; 256]);
    let err = broker
        .compress_message(&mut message, CompressionAlgorithm::Snappy, 6)
        .unwrap_err();
    assert_eq!(err, QueueError::NotImplemented("SNAPPY"));
    broker.shutdown().await;
}

use std::io::{Read, Write};

use bytes::Bytes;
use message::{properties, Message, MessagePayload};

use crate::{CodecError, CompressionAlgorithm};

/// Compress the payload in place and mark the message. A no-op for
/// `CompressionAlgorithm::None` and for already-compressed messages.
pub fn compress_message(
    message: &mut Message,
    algorithm: CompressionAlgorithm,
    level: u32,
) -> Result<(), CodecError> {
    if algorithm == CompressionAlgorithm::None
        || message.header.properties.contains_key(properties::COMPRESSED)
    {
        return Ok(());
    }

    let input = message.payload.as_slice();
    let output = match algorithm {
        CompressionAlgorithm::None => unreachable!(),
        CompressionAlgorithm::Gzip => gzip_compress(input, level)?,
        CompressionAlgorithm::Lz4 => lz4_flex::compress_prepend_size(input),
        CompressionAlgorithm::Zstd => zstd::bulk::compress(input, level.min(19) as i32)
            .map_err(|err| CodecError::CorruptedInput(err.to_string()))?,
        CompressionAlgorithm::Snappy => {
            return Err(CodecError::AlgorithmUnsupported("SNAPPY"));
        }
    };

    message.payload = MessagePayload::Owned(Bytes::from(output));
    message
        .header
        .properties
        .insert(properties::COMPRESSED.to_string(), algorithm.as_str().to_string());
    message.touch();
    Ok(())
}

/// Invert `compress_message`, recovering the algorithm from the reserved
/// `Compressed` property. A no-op for unmarked messages.
pub fn decompress_message(message: &mut Message) -> Result<(), CodecError> {
    let algorithm = match message.header.properties.get(properties::COMPRESSED) {
        None => return Ok(()),
        Some(name) => CompressionAlgorithm::from_str_name(name)
            .ok_or_else(|| CodecError::CorruptedInput(format!("unknown algorithm '{name}'")))?,
    };

    let input = message.payload.as_slice();
    let output = match algorithm {
        CompressionAlgorithm::None => input.to_vec(),
        CompressionAlgorithm::Gzip => gzip_decompress(input)?,
        CompressionAlgorithm::Lz4 => lz4_flex::decompress_size_prepended(input)
            .map_err(|err| CodecError::CorruptedInput(err.to_string()))?,
        CompressionAlgorithm::Zstd => zstd::stream::decode_all(input)
            .map_err(|err| CodecError::CorruptedInput(err.to_string()))?,
        CompressionAlgorithm::Snappy => {
            return Err(CodecError::AlgorithmUnsupported("SNAPPY"));
        }
    };

    message.payload = MessagePayload::Owned(Bytes::from(output));
    message.header.properties.remove(properties::COMPRESSED);
    message.touch();
    Ok(())
}

fn gzip_compress(input: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
    encoder
        .write_all(input)
        .and_then(|()| encoder.finish())
        .map_err(|err| CodecError::CorruptedInput(err.to_string()))
}

fn gzip_decompress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = flate2::read::GzDecoder::new(input);
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|err| CodecError::CorruptedInput(err.to_string()))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(algorithm: CompressionAlgorithm, payload: &[u8]) {
        let mut message = Message::binary(payload.to_vec());
        compress_message(&mut message, algorithm, 6).unwrap();
        assert_eq!(
            message.header.properties.get(properties::COMPRESSED).map(String::as_str),
            Some(algorithm.as_str()),
        );
        decompress_message(&mut message).unwrap();
        assert_eq!(message.payload.as_slice(), payload);
        assert!(!message.header.properties.contains_key(properties::COMPRESSED));
    }

    #[test]
    fn gzip_round_trip() {
        round_trip(CompressionAlgorithm::Gzip, &vec![b'A'; 2000]);
    }

    #[test]
    fn lz4_round_trip() {
        round_trip(CompressionAlgorithm::Lz4, b"the quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn zstd_round_trip() {
        round_trip(CompressionAlgorithm::Zstd, &vec![7u8; 4096]);
    }

    #[test]
    fn repetitive_payload_shrinks_under_gzip() {
        let mut message = Message::binary(vec![b'A'; 2000]);
        compress_message(&mut message, CompressionAlgorithm::Gzip, 6).unwrap();
        assert!(message.payload.len() < 200);
    }

    #[test]
    fn snappy_reports_unsupported() {
        let mut message = Message::binary(vec![0u8; 64]);
        assert_eq!(
            compress_message(&mut message, CompressionAlgorithm::Snappy, 6),
            Err(CodecError::AlgorithmUnsupported("SNAPPY")),
        );
    }

    #[test]
    fn compress_is_idempotent_per_marker() {
        let mut message = Message::binary(vec![b'B'; 512]);
        compress_message(&mut message, CompressionAlgorithm::Gzip, 6).unwrap();
        let once = message.payload.to_bytes();
        compress_message(&mut message, CompressionAlgorithm::Gzip, 6).unwrap();
        assert_eq!(message.payload.to_bytes(), once);
    }

    #[test]
    fn corrupted_gzip_input_is_rejected() {
        let mut message = Message::binary(vec![0u8; 16]);
        message
            .header
            .properties
            .insert(properties::COMPRESSED.to_string(), "GZIP".to_string());
        assert!(matches!(
            decompress_message(&mut message),
            Err(CodecError::CorruptedInput(_)),
        ));
    }
}

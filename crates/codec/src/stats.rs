use message::{now_ms, CompressionStats, EncryptionStats};

fn roll(mean: &mut f64, count: u64, sample_ms: f64) {
    // Incremental mean; count includes the new sample.
    *mean += (sample_ms - *mean) / count as f64;
}

/// Per-queue compression accounting.
#[derive(Debug, Default)]
pub struct CompressionTracker {
    stats: CompressionStats,
}

impl CompressionTracker {
    /// Record a message passing the compression stage. `compressed_bytes` is
    /// `None` when the stage skipped the message (too small, algorithm off).
    pub fn record_compress(&mut self, original_bytes: usize, compressed: Option<(usize, f64)>) {
        self.stats.total_messages += 1;
        if let Some((compressed_bytes, elapsed_ms)) = compressed {
            self.stats.compressed_messages += 1;
            self.stats.original_bytes += original_bytes as u64;
            self.stats.compressed_bytes += compressed_bytes as u64;
            self.stats.compression_ratio = if self.stats.original_bytes == 0 {
                0.0
            } else {
                self.stats.compressed_bytes as f64 / self.stats.original_bytes as f64
            };
            roll(
                &mut self.stats.average_compression_time_ms,
                self.stats.compressed_messages,
                elapsed_ms,
            );
        }
        self.stats.last_update_time = now_ms();
    }

    pub fn record_decompress(&mut self, elapsed_ms: f64) {
        // Decompression count tracks compressed messages one-for-one.
        let count = self.stats.compressed_messages.max(1);
        roll(&mut self.stats.average_decompression_time_ms, count, elapsed_ms);
        self.stats.last_update_time = now_ms();
    }

    pub fn snapshot(&self) -> CompressionStats {
        self.stats.clone()
    }
}

/// Per-queue encryption accounting.
#[derive(Debug, Default)]
pub struct EncryptionTracker {
    stats: EncryptionStats,
}

impl EncryptionTracker {
    pub fn record_encrypt(&mut self, encrypted: Option<f64>) {
        self.stats.total_messages += 1;
        if let Some(elapsed_ms) = encrypted {
            self.stats.encrypted_messages += 1;
            roll(
                &mut self.stats.average_encryption_time_ms,
                self.stats.encrypted_messages,
                elapsed_ms,
            );
        }
        self.stats.last_update_time = now_ms();
    }

    pub fn record_decrypt(&mut self, elapsed_ms: f64) {
        let count = self.stats.encrypted_messages.max(1);
        roll(&mut self.stats.average_decryption_time_ms, count, elapsed_ms);
        self.stats.last_update_time = now_ms();
    }

    pub fn snapshot(&self) -> EncryptionStats {
        self.stats.clone()
    }
}

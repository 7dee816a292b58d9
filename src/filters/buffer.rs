//! Byte-level packet transforms.

use crate::error::FilterError;

/// A reversible transform over a serialized packet.
///
/// `decode(encode(b)) == b` must hold for every buffer the filter accepts.
/// Both directions work in place and may change the buffer length, but not
/// beyond `max_size`.
pub trait BufferFilter: Send + Sync {
    /// Short name used in errors and logs.
    fn id(&self) -> &str;

    /// Transforms an outgoing buffer.
    fn encode(&self, buffer: &mut Vec<u8>, max_size: usize) -> Result<(), FilterError>;

    /// Reverses [`BufferFilter::encode`] on an incoming buffer.
    fn decode(&self, buffer: &mut Vec<u8>, max_size: usize) -> Result<(), FilterError>;
}

fn ensure_room(filter: &str, size: usize, max_size: usize) -> Result<(), FilterError> {
    if size > max_size {
        return Err(FilterError::BufferTooLarge {
            filter: filter.to_string(),
            size,
            max_size,
        });
    }
    Ok(())
}

/// XOR with a repeating key. Obfuscation only.
#[derive(Debug, Clone)]
pub struct XorBufferFilter {
    key: Vec<u8>,
}

impl XorBufferFilter {
    /// Creates a filter; an empty key leaves buffers unchanged.
    #[must_use]
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }

    fn apply(&self, buffer: &mut [u8]) {
        if self.key.is_empty() {
            return;
        }
        for (byte, k) in buffer.iter_mut().zip(self.key.iter().cycle()) {
            *byte ^= k;
        }
    }
}

impl BufferFilter for XorBufferFilter {
    fn id(&self) -> &str {
        "xor"
    }

    fn encode(&self, buffer: &mut Vec<u8>, _max_size: usize) -> Result<(), FilterError> {
        self.apply(buffer);
        Ok(())
    }

    fn decode(&self, buffer: &mut Vec<u8>, _max_size: usize) -> Result<(), FilterError> {
        self.apply(buffer);
        Ok(())
    }
}

const NONCE_LEN: usize = 16;

/// Stream cipher keyed from a passphrase.
///
/// Each packet gets a random nonce, appended after the ciphertext. The
/// keystream is the blake3 keyed-hash XOF of the nonce.
#[derive(Clone)]
pub struct StreamCipherFilter {
    key: [u8; 32],
}

impl std::fmt::Debug for StreamCipherFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCipherFilter").finish_non_exhaustive()
    }
}

impl StreamCipherFilter {
    /// Derives the cipher key from `passphrase`.
    #[must_use]
    pub fn new(passphrase: &str) -> Self {
        Self {
            key: blake3::derive_key("madara buffer filter 2024-01 stream cipher", passphrase.as_bytes()),
        }
    }

    fn apply(&self, nonce: &[u8], data: &mut [u8]) {
        let mut keystream = vec![0u8; data.len()];
        blake3::Hasher::new_keyed(&self.key)
            .update(nonce)
            .finalize_xof()
            .fill(&mut keystream);
        for (byte, k) in data.iter_mut().zip(keystream) {
            *byte ^= k;
        }
    }
}

impl BufferFilter for StreamCipherFilter {
    fn id(&self) -> &str {
        "stream-cipher"
    }

    fn encode(&self, buffer: &mut Vec<u8>, max_size: usize) -> Result<(), FilterError> {
        ensure_room(self.id(), buffer.len() + NONCE_LEN, max_size)?;
        let nonce: [u8; NONCE_LEN] = rand::random();
        self.apply(&nonce, buffer);
        buffer.extend_from_slice(&nonce);
        Ok(())
    }

    fn decode(&self, buffer: &mut Vec<u8>, _max_size: usize) -> Result<(), FilterError> {
        let Some(split) = buffer.len().checked_sub(NONCE_LEN) else {
            return Err(FilterError::Corrupted {
                filter: self.id().to_string(),
                reason: format!("{} bytes is shorter than the nonce", buffer.len()),
            });
        };
        let nonce = buffer.split_off(split);
        self.apply(&nonce, buffer);
        Ok(())
    }
}

/// Appends a CRC32 of the buffer; decoding verifies and strips it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumFilter;

impl ChecksumFilter {
    /// Creates the filter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl BufferFilter for ChecksumFilter {
    fn id(&self) -> &str {
        "crc32"
    }

    fn encode(&self, buffer: &mut Vec<u8>, max_size: usize) -> Result<(), FilterError> {
        ensure_room(self.id(), buffer.len() + 4, max_size)?;
        let checksum = crc32fast::hash(buffer);
        buffer.extend_from_slice(&checksum.to_le_bytes());
        Ok(())
    }

    fn decode(&self, buffer: &mut Vec<u8>, _max_size: usize) -> Result<(), FilterError> {
        let corrupted = |reason: String| FilterError::Corrupted {
            filter: "crc32".to_string(),
            reason,
        };
        let split = buffer
            .len()
            .checked_sub(4)
            .ok_or_else(|| corrupted(format!("{} bytes has no checksum", buffer.len())))?;
        let trailer = buffer.split_off(split);
        let mut expected = [0u8; 4];
        expected.copy_from_slice(&trailer);
        let expected = u32::from_le_bytes(expected);
        let actual = crc32fast::hash(buffer);
        if actual != expected {
            return Err(corrupted(format!("checksum {actual:08x} != {expected:08x}")));
        }
        Ok(())
    }
}

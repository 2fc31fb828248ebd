//! Seeded MD5 strong digests.
//!
//! Block checksums hash the block bytes followed by the 16-byte session seed
//! so that digests cannot be precomputed across sessions. The whole-file
//! digest is a plain MD5 over the file content in strict file order.

use digest::Digest;

/// The 16-byte nonce established during handshake and mixed into every block
/// digest.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChecksumSeed([u8; 16]);

impl ChecksumSeed {
    /// Wraps a seed received from session negotiation.
    #[must_use]
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw seed bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for ChecksumSeed {
    fn from(bytes: [u8; 16]) -> Self {
        Self::new(bytes)
    }
}

/// Streaming MD5 hasher.
///
/// A thin wrapper over the RustCrypto backend so higher layers do not depend
/// on the `digest` traits directly.
#[derive(Clone, Default)]
pub struct Md5 {
    inner: md5::Md5,
}

impl Md5 {
    /// Creates a hasher with an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: md5::Md5::new() }
    }

    /// Feeds additional bytes into the digest state.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalises the digest and returns the 128-bit MD5 output.
    #[must_use]
    pub fn finalize(self) -> [u8; 16] {
        self.inner.finalize().into()
    }

    /// Computes the MD5 digest of `data` in one shot.
    #[must_use]
    pub fn digest(data: &[u8]) -> [u8; 16] {
        md5::Md5::digest(data).into()
    }
}

impl std::fmt::Debug for Md5 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Md5")
    }
}

/// Computes the seeded digest of one block: MD5(block ‖ seed).
#[must_use]
pub fn block_digest(block: &[u8], seed: &ChecksumSeed) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(block);
    hasher.update(seed.as_bytes());
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_hex(bytes: &[u8]) -> String {
        use std::fmt::Write as _;

        let mut out = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            write!(&mut out, "{byte:02x}").expect("write! to String cannot fail");
        }
        out
    }

    #[test]
    fn md5_streaming_matches_rfc_vectors() {
        let vectors = [
            (b"".as_slice(), "d41d8cd98f00b204e9800998ecf8427e"),
            (b"a".as_slice(), "0cc175b9c0f1b6a831c399e269772661"),
            (b"abc".as_slice(), "900150983cd24fb0d6963f7d28e17f72"),
            (
                b"message digest".as_slice(),
                "f96b697d7cb7938d525a2f31aaf161d0",
            ),
        ];

        for (input, expected_hex) in vectors {
            let mut hasher = Md5::new();
            let mid = input.len() / 2;
            hasher.update(&input[..mid]);
            hasher.update(&input[mid..]);
            assert_eq!(to_hex(&hasher.finalize()), expected_hex);

            assert_eq!(to_hex(&Md5::digest(input)), expected_hex);
        }
    }

    #[test]
    fn block_digest_appends_seed_after_data() {
        let seed = ChecksumSeed::new(*b"0123456789abcdef");
        let data = b"block contents";

        let mut manual = Md5::new();
        manual.update(data);
        manual.update(seed.as_bytes());

        assert_eq!(block_digest(data, &seed), manual.finalize());
    }

    #[test]
    fn seeded_digest_differs_from_plain() {
        let seed = ChecksumSeed::new([7u8; 16]);
        let data = b"same data";
        assert_ne!(block_digest(data, &seed), Md5::digest(data));
    }

    #[test]
    fn zero_seed_still_lengthens_input() {
        // A zero seed is a valid seed, not the absence of one.
        let seed = ChecksumSeed::default();
        assert_ne!(block_digest(b"x", &seed), Md5::digest(b"x"));
    }
}

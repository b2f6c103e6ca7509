//! Blob references: hash-algorithm-tagged digests.
//!
//! A reference is written as `<algo>-<lowercase hex digest>`, e.g.
//! `sha224-d14a028c2a3a2bc9476102bb288234c415a2b01f828ea62ac5b3e42f`.

use std::cmp::Ordering;
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Digest;
use thiserror::Error;

/// Errors produced while parsing or computing a [`BlobRef`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefError {
    #[error("unknown hash algorithm {0:?}")]
    UnknownAlgorithm(String),

    #[error("malformed blob reference {0:?}")]
    Malformed(String),

    #[error("{algo} digest must be {expected} bytes, got {actual}")]
    DigestLength {
        algo: HashAlgo,
        expected: usize,
        actual: usize,
    },

    #[error("{0} digests cannot be computed, only addressed")]
    NotComputable(HashAlgo),
}

/// Hash algorithms a reference may be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgo {
    /// Legacy references. Addressable, not computable.
    Sha1,
    Sha224,
    Sha256,
    Blake3,
}

impl HashAlgo {
    pub const ALL: [HashAlgo; 4] = [
        HashAlgo::Sha1,
        HashAlgo::Sha224,
        HashAlgo::Sha256,
        HashAlgo::Blake3,
    ];

    /// Lowercase name used in reference strings and as the top-level
    /// directory of the storage tree.
    pub fn name(self) -> &'static str {
        match self {
            HashAlgo::Sha1 => "sha1",
            HashAlgo::Sha224 => "sha224",
            HashAlgo::Sha256 => "sha256",
            HashAlgo::Blake3 => "blake3",
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgo::Sha1 => 20,
            HashAlgo::Sha224 => 28,
            HashAlgo::Sha256 => 32,
            HashAlgo::Blake3 => 32,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|algo| algo.name() == name)
    }
}

impl fmt::Display for HashAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgo {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| RefError::UnknownAlgorithm(s.to_string()))
    }
}

/// Content address of a blob.
///
/// Immutable; equality and hashing are structural. The engine never looks
/// inside the blob to check that the digest matches.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BlobRef {
    algo: HashAlgo,
    digest: Box<[u8]>,
}

impl BlobRef {
    /// Build a reference from raw digest bytes.
    pub fn new(algo: HashAlgo, digest: &[u8]) -> Result<Self, RefError> {
        if digest.len() != algo.digest_len() {
            return Err(RefError::DigestLength {
                algo,
                expected: algo.digest_len(),
                actual: digest.len(),
            });
        }
        Ok(Self {
            algo,
            digest: digest.into(),
        })
    }

    /// Compute the reference of `data` under `algo`.
    pub fn compute(algo: HashAlgo, data: &[u8]) -> Result<Self, RefError> {
        let digest: Vec<u8> = match algo {
            HashAlgo::Sha1 => return Err(RefError::NotComputable(algo)),
            HashAlgo::Sha224 => sha2::Sha224::digest(data).to_vec(),
            HashAlgo::Sha256 => sha2::Sha256::digest(data).to_vec(),
            HashAlgo::Blake3 => blake3::hash(data).as_bytes().to_vec(),
        };
        Self::new(algo, &digest)
    }

    /// Compute the reference of everything `reader` yields, in one pass.
    ///
    /// Returns the reference and the number of bytes hashed. An algorithm
    /// that cannot be computed fails with `InvalidInput` before anything
    /// is read.
    pub fn compute_reader<R: Read + ?Sized>(
        algo: HashAlgo,
        reader: &mut R,
    ) -> io::Result<(Self, u64)> {
        let mut hasher = match algo {
            HashAlgo::Sha1 => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    RefError::NotComputable(algo),
                ))
            }
            HashAlgo::Sha224 => Hasher::Sha224(sha2::Sha224::new()),
            HashAlgo::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            HashAlgo::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        };

        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
            total += n as u64;
        }

        let digest = hasher.finalize();
        let blob =
            Self::new(algo, &digest).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok((blob, total))
    }

    /// Parse `<algo>-<hex>`. Hex digits must be lowercase.
    pub fn parse(s: &str) -> Result<Self, RefError> {
        let (name, hex_digest) = s
            .split_once('-')
            .ok_or_else(|| RefError::Malformed(s.to_string()))?;
        let algo = HashAlgo::from_str(name)?;
        if hex_digest
            .bytes()
            .any(|b| !(b.is_ascii_digit() || (b'a'..=b'f').contains(&b)))
        {
            return Err(RefError::Malformed(s.to_string()));
        }
        let digest = hex::decode(hex_digest).map_err(|_| RefError::Malformed(s.to_string()))?;
        Self::new(algo, &digest)
    }

    pub fn algo(&self) -> HashAlgo {
        self.algo
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Lowercase hex rendering of the digest.
    pub fn hex(&self) -> String {
        hex::encode(&self.digest)
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.algo.name(), self.hex())
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobRef({self})")
    }
}

impl FromStr for BlobRef {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Text order: algorithm name, then digest. Equal-length digests compare the
// same as their hex renderings.
impl Ord for BlobRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.algo
            .name()
            .cmp(other.algo.name())
            .then_with(|| self.digest.cmp(&other.digest))
    }
}

impl PartialOrd for BlobRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for BlobRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlobRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A reference together with the size of the stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SizedRef {
    pub blob: BlobRef,
    pub size: u32,
}

enum Hasher {
    Sha224(sha2::Sha224),
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha224(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Sha224(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Blake3(h) => h.finalize().as_bytes().to_vec(),
        }
    }
}

/// Convert an on-disk size to the 32-bit blob size.
///
/// # Panics
///
/// If `n` does not fit in a `u32`. Blobs that large cannot have been
/// written through this engine, so this is a broken invariant rather than
/// an I/O condition.
pub fn u32_size(n: u64) -> u32 {
    match u32::try_from(n) {
        Ok(size) => size,
        Err(_) => panic!("bad blob size {n}: does not fit in u32"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA224: &str = "sha224-ea09ae9cc6768c50fcee903ed054556e5bfc8347907f12598aa24193";

    #[test]
    fn test_parse_display_roundtrip() {
        let blob = BlobRef::parse(HELLO_SHA224).unwrap();
        assert_eq!(blob.algo(), HashAlgo::Sha224);
        assert_eq!(blob.to_string(), HELLO_SHA224);
    }

    #[test]
    fn test_compute_sha224() {
        let blob = BlobRef::compute(HashAlgo::Sha224, b"hello").unwrap();
        assert_eq!(blob.to_string(), HELLO_SHA224);
    }

    #[test]
    fn test_compute_blake3_matches_crate() {
        let blob = BlobRef::compute(HashAlgo::Blake3, b"hello").unwrap();
        assert_eq!(blob.digest(), blake3::hash(b"hello").as_bytes());
    }

    #[test]
    fn test_compute_reader_matches_compute() {
        let data = vec![7u8; 200 * 1024];
        for algo in [HashAlgo::Sha224, HashAlgo::Sha256, HashAlgo::Blake3] {
            let (blob, n) = BlobRef::compute_reader(algo, &mut data.as_slice()).unwrap();
            assert_eq!(n, data.len() as u64);
            assert_eq!(blob, BlobRef::compute(algo, &data).unwrap());
        }
        let err = BlobRef::compute_reader(HashAlgo::Sha1, &mut &b"x"[..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_sha1_not_computable_but_parseable() {
        assert_eq!(
            BlobRef::compute(HashAlgo::Sha1, b"x"),
            Err(RefError::NotComputable(HashAlgo::Sha1))
        );
        let blob = BlobRef::parse(&format!("sha1-{}", "a".repeat(40))).unwrap();
        assert_eq!(blob.algo(), HashAlgo::Sha1);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            BlobRef::parse("md5-00"),
            Err(RefError::UnknownAlgorithm(_))
        ));
        assert!(matches!(
            BlobRef::parse("sha224"),
            Err(RefError::Malformed(_))
        ));
        assert!(matches!(
            BlobRef::parse(&format!("sha1-{}", "A".repeat(40))),
            Err(RefError::Malformed(_))
        ));
        assert!(matches!(
            BlobRef::parse("sha1-abcd"),
            Err(RefError::DigestLength { expected: 20, actual: 2, .. })
        ));
    }

    #[test]
    fn test_ordering_follows_text() {
        let mut refs = vec![
            BlobRef::parse(&format!("sha224-{}", "1".repeat(56))).unwrap(),
            BlobRef::parse(&format!("sha1-{}", "f".repeat(40))).unwrap(),
            BlobRef::parse(&format!("sha1-{}", "0".repeat(40))).unwrap(),
        ];
        refs.sort();
        let mut texts: Vec<String> = refs.iter().map(ToString::to_string).collect();
        let sorted = texts.clone();
        texts.sort();
        assert_eq!(texts, sorted);
    }

    #[test]
    fn test_sized_ref_json() {
        let sized = SizedRef {
            blob: BlobRef::parse(HELLO_SHA224).unwrap(),
            size: 5,
        };
        let json = serde_json::to_string(&sized).unwrap();
        assert_eq!(json, format!(r#"{{"blob":"{HELLO_SHA224}","size":5}}"#));
        let back: SizedRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sized);
    }

    #[test]
    fn test_u32_size_in_range() {
        assert_eq!(u32_size(0), 0);
        assert_eq!(u32_size(u64::from(u32::MAX)), u32::MAX);
    }

    #[test]
    #[should_panic(expected = "bad blob size")]
    fn test_u32_size_overflow_panics() {
        u32_size(u64::from(u32::MAX) + 1);
    }
}

//! Content addressing
//!
//! A [`Digest`] is the `(function, hash, size)` triple that names one object in
//! the content-addressable store. Its canonical text form is
//! `[<function>/]<hex>/<size>`. Functions in the default set (MD5, SHA-1,
//! SHA-256, SHA-384, SHA-512) omit the prefix and are recovered from the hex
//! length, so legacy digests parse and print byte-identical. Every other
//! function carries its name as a prefix.

pub mod hasher;

pub use hasher::{BlobHasher, HashRegistry, HasherConstructor};

use crate::error::DigestError;
use crate::proto::remote_execution as re;
use std::fmt;
use std::str::FromStr;

/// Hash algorithm that produced a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DigestFunction {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Blake3,
    Sha256Tree,
}

impl DigestFunction {
    pub const ALL: [DigestFunction; 7] = [
        DigestFunction::Md5,
        DigestFunction::Sha1,
        DigestFunction::Sha256,
        DigestFunction::Sha384,
        DigestFunction::Sha512,
        DigestFunction::Blake3,
        DigestFunction::Sha256Tree,
    ];

    /// Raw output length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            DigestFunction::Md5 => 16,
            DigestFunction::Sha1 => 20,
            DigestFunction::Sha256 | DigestFunction::Blake3 | DigestFunction::Sha256Tree => 32,
            DigestFunction::Sha384 => 48,
            DigestFunction::Sha512 => 64,
        }
    }

    /// Length of the hex encoding.
    pub fn hex_len(self) -> usize {
        self.output_len() * 2
    }

    /// Whether the function is recovered from hash length alone.
    pub fn is_default(self) -> bool {
        matches!(
            self,
            DigestFunction::Md5
                | DigestFunction::Sha1
                | DigestFunction::Sha256
                | DigestFunction::Sha384
                | DigestFunction::Sha512
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            DigestFunction::Md5 => "md5",
            DigestFunction::Sha1 => "sha1",
            DigestFunction::Sha256 => "sha256",
            DigestFunction::Sha384 => "sha384",
            DigestFunction::Sha512 => "sha512",
            DigestFunction::Blake3 => "blake3",
            DigestFunction::Sha256Tree => "sha256tree",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|function| function.name().eq_ignore_ascii_case(name))
    }

    /// Default-set function whose hex length is `len`.
    pub fn infer(len: usize) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|function| function.is_default() && function.hex_len() == len)
    }

    /// `build.bazel.remote.execution.v2.DigestFunction.Value` number.
    pub fn to_wire(self) -> i32 {
        match self {
            DigestFunction::Sha256 => 1,
            DigestFunction::Sha1 => 2,
            DigestFunction::Md5 => 3,
            DigestFunction::Sha384 => 5,
            DigestFunction::Sha512 => 6,
            DigestFunction::Sha256Tree => 8,
            DigestFunction::Blake3 => 9,
        }
    }

    /// `None` for `UNKNOWN` and functions this client does not model.
    pub fn from_wire(value: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|function| function.to_wire() == value)
    }
}

impl fmt::Display for DigestFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable content address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    function: DigestFunction,
    hash: String,
    size_bytes: i64,
}

impl Digest {
    /// Build a digest, checking that `hash` is hex of the right length.
    pub fn new(
        function: DigestFunction,
        hash: impl Into<String>,
        size_bytes: i64,
    ) -> Result<Self, DigestError> {
        let hash = hash.into();
        let malformed = |reason: String| DigestError::Malformed {
            raw: format!("{}/{}/{}", function, hash, size_bytes),
            reason,
        };
        if size_bytes < 0 {
            return Err(malformed(format!("negative size {}", size_bytes)));
        }
        if hash.len() != function.hex_len() {
            return Err(malformed(format!(
                "{} hashes are {} hex characters, got {}",
                function,
                function.hex_len(),
                hash.len()
            )));
        }
        if !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(malformed("hash is not hexadecimal".to_string()));
        }
        Ok(Self {
            function,
            hash,
            size_bytes,
        })
    }

    /// Hash `blob` with the process-wide registry.
    pub fn from_blob(blob: &[u8], function: DigestFunction) -> Result<Self, DigestError> {
        Self::from_blob_with(HashRegistry::global(), blob, function)
    }

    pub fn from_blob_with(
        registry: &HashRegistry,
        blob: &[u8],
        function: DigestFunction,
    ) -> Result<Self, DigestError> {
        let raw = registry.hash(function, blob)?;
        Self::new(function, hex::encode(raw), blob.len() as i64)
    }

    /// Digest of a message's canonical binary encoding.
    pub fn of_message<M: prost::Message>(
        message: &M,
        function: DigestFunction,
    ) -> Result<Self, DigestError> {
        Self::from_blob(&message.encode_to_vec(), function)
    }

    /// Lift a wire digest. The wire form carries no function, so the caller
    /// supplies the one in effect for the surrounding request.
    pub fn from_wire(digest: &re::Digest, function: DigestFunction) -> Result<Self, DigestError> {
        Self::new(function, digest.hash.clone(), digest.size_bytes)
    }

    pub fn to_wire(&self) -> re::Digest {
        re::Digest {
            hash: self.hash.clone(),
            size_bytes: self.size_bytes,
        }
    }

    pub fn function(&self) -> DigestFunction {
        self.function
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn size_bytes(&self) -> i64 {
        self.size_bytes
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.function.is_default() {
            write!(f, "{}/", self.function)?;
        }
        write!(f, "{}/{}", self.hash, self.size_bytes)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| DigestError::Malformed {
            raw: raw.to_string(),
            reason: reason.to_string(),
        };
        let parts: Vec<&str> = raw.split('/').collect();
        let (function, hash, size) = match parts.as_slice() {
            [hash, size] => {
                let function = DigestFunction::infer(hash.len()).ok_or_else(|| {
                    DigestError::UnknownAlgorithm {
                        raw: raw.to_string(),
                    }
                })?;
                (function, *hash, *size)
            }
            [name, hash, size] => {
                let function =
                    DigestFunction::from_name(name).ok_or_else(|| DigestError::UnknownAlgorithm {
                        raw: raw.to_string(),
                    })?;
                (function, *hash, *size)
            }
            _ => return Err(malformed("expected [<function>/]<hash>/<size>")),
        };
        let size_bytes: i64 = size
            .parse()
            .map_err(|_| malformed("size is not an integer"))?;
        Digest::new(function, hash, size_bytes).map_err(|err| match err {
            DigestError::Malformed { reason, .. } => DigestError::Malformed {
                raw: raw.to_string(),
                reason,
            },
            other => other,
        })
    }
}

//! Hash function registry
//!
//! Maps each [`DigestFunction`] to a constructor for a streaming hasher. The
//! registry is populated once; functions without a constructor (such as
//! `sha256tree`) can still be parsed and printed but not computed.

use super::DigestFunction;
use crate::error::DigestError;
use sha2::Digest as CryptoDigest;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Incremental hasher over blob bytes.
pub trait BlobHasher: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Vec<u8>;
}

/// Constructor stored in the registry.
pub type HasherConstructor = fn() -> Box<dyn BlobHasher>;

struct RustCryptoHasher<D>(D);

impl<D> BlobHasher for RustCryptoHasher<D>
where
    D: CryptoDigest + Send,
{
    fn update(&mut self, data: &[u8]) {
        CryptoDigest::update(&mut self.0, data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        CryptoDigest::finalize(self.0).to_vec()
    }
}

struct Blake3Hasher(blake3::Hasher);

impl BlobHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().as_bytes().to_vec()
    }
}

fn rust_crypto<D>() -> Box<dyn BlobHasher>
where
    D: CryptoDigest + Send + 'static,
{
    Box::new(RustCryptoHasher(D::new()))
}

fn blake3_hasher() -> Box<dyn BlobHasher> {
    Box::new(Blake3Hasher(blake3::Hasher::new()))
}

/// Registry of hash constructors keyed by digest function.
#[derive(Clone)]
pub struct HashRegistry {
    constructors: HashMap<DigestFunction, HasherConstructor>,
}

impl HashRegistry {
    /// A registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// The default set plus BLAKE3.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(DigestFunction::Md5, rust_crypto::<md5::Md5>);
        registry.register(DigestFunction::Sha1, rust_crypto::<sha1::Sha1>);
        registry.register(DigestFunction::Sha256, rust_crypto::<sha2::Sha256>);
        registry.register(DigestFunction::Sha384, rust_crypto::<sha2::Sha384>);
        registry.register(DigestFunction::Sha512, rust_crypto::<sha2::Sha512>);
        registry.register(DigestFunction::Blake3, blake3_hasher);
        registry
    }

    /// Process-wide registry, built on first use.
    pub fn global() -> &'static HashRegistry {
        static REGISTRY: OnceLock<HashRegistry> = OnceLock::new();
        REGISTRY.get_or_init(HashRegistry::with_defaults)
    }

    pub fn register(&mut self, function: DigestFunction, constructor: HasherConstructor) {
        self.constructors.insert(function, constructor);
    }

    pub fn is_registered(&self, function: DigestFunction) -> bool {
        self.constructors.contains_key(&function)
    }

    /// Fresh hasher for `function`.
    pub fn hasher(&self, function: DigestFunction) -> Result<Box<dyn BlobHasher>, DigestError> {
        self.constructors
            .get(&function)
            .map(|construct| construct())
            .ok_or(DigestError::UnsupportedAlgorithm(function))
    }

    /// Hash a complete blob in one call.
    pub fn hash(&self, function: DigestFunction, blob: &[u8]) -> Result<Vec<u8>, DigestError> {
        let mut hasher = self.hasher(function)?;
        hasher.update(blob);
        Ok(hasher.finalize())
    }
}

impl Default for HashRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

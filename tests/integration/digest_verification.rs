use bfscope::digest::{Digest, DigestFunction};
use bfscope::error::DigestError;
use proptest::prelude::*;

#[test]
fn known_vectors_for_every_registered_function() {
    let cases = [
        (DigestFunction::Md5, "900150983cd24fb0d6963f7d28e17f72"),
        (DigestFunction::Sha1, "a9993e364706816aba3e25717850c26c9cd0d89d"),
        (
            DigestFunction::Sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        ),
        (
            DigestFunction::Sha384,
            "cb00753f45a35e8bb5a03d699ac65007272c32ab0eded1631a8b605a43ff5bed8086072ba1e7cc2358baeca134c825a7",
        ),
    ];
    for (function, expected) in cases {
        let digest = Digest::from_blob(b"abc", function).unwrap();
        assert_eq!(digest.hash(), expected, "{}", function);
        assert_eq!(digest.size_bytes(), 3);
        assert_eq!(digest.to_string(), format!("{}/3", expected));
    }
}

#[test]
fn non_default_functions_keep_their_prefix() {
    let digest = Digest::from_blob(b"abc", DigestFunction::Blake3).unwrap();
    let text = digest.to_string();

    assert!(text.starts_with("blake3/"));
    let parsed: Digest = text.parse().unwrap();
    assert_eq!(parsed, digest);
    assert_eq!(parsed.function(), DigestFunction::Blake3);
}

#[test]
fn hash_length_without_a_default_function_is_rejected() {
    let err = "abcd/4".parse::<Digest>().unwrap_err();
    assert!(matches!(err, DigestError::UnknownAlgorithm { .. }));
}

#[test]
fn tree_hashing_has_no_registered_constructor() {
    let err = Digest::from_blob(b"abc", DigestFunction::Sha256Tree).unwrap_err();
    assert_eq!(err, DigestError::UnsupportedAlgorithm(DigestFunction::Sha256Tree));
}

proptest! {
    #[test]
    fn parsed_text_form_names_the_same_blob(blob in proptest::collection::vec(any::<u8>(), 0..256)) {
        for function in [DigestFunction::Sha1, DigestFunction::Sha256, DigestFunction::Blake3] {
            let digest = Digest::from_blob(&blob, function).unwrap();
            let parsed: Digest = digest.to_string().parse().unwrap();
            prop_assert_eq!(parsed.function(), function);
            prop_assert_eq!(parsed.size_bytes(), blob.len() as i64);
            prop_assert_eq!(parsed.hash().len(), function.hex_len());
        }
    }
}

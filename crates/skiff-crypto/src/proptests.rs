//! Property-based tests for the wire primitives.

use proptest::prelude::*;

use crate::artifact::ArtifactKey;
use crate::manifest::VersionManifest;
use crate::signing::ManifestSigner;

fn arb_version() -> impl Strategy<Value = String> {
    "[A-Za-z0-9._+-]{1,32}".prop_filter("not a dot path", |v| v != "." && v != "..")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A signature from the real key verifies for any version string.
    #[test]
    fn prop_signed_version_verifies(seed in any::<[u8; 32]>(), version in arb_version()) {
        let signer = ManifestSigner::from_seed(&seed);
        let manifest = VersionManifest::signed(&version, &signer).unwrap();
        prop_assert!(manifest.verify(&signer.verifier()).is_ok());
    }

    /// Flipping any single bit of the signature breaks verification.
    #[test]
    fn prop_signature_bit_flip_fails(
        seed in any::<[u8; 32]>(),
        version in arb_version(),
        bit in 0usize..512,
    ) {
        let signer = ManifestSigner::from_seed(&seed);
        let mut sig = signer.sign_version(&version);
        sig[bit / 8] ^= 1 << (bit % 8);

        prop_assert!(signer.verifier().verify_version(&version, &sig).is_err());
    }

    /// Flipping any single bit of the signed version bytes breaks verification.
    #[test]
    fn prop_version_bit_flip_fails(
        seed in any::<[u8; 32]>(),
        version in arb_version(),
        bit in any::<prop::sample::Index>(),
    ) {
        let signer = ManifestSigner::from_seed(&seed);
        let sig = signer.sign_version(&version);

        let mut message = version.into_bytes();
        let bit = bit.index(message.len() * 8);
        message[bit / 8] ^= 1 << (bit % 8);

        prop_assert!(signer.verifier().verify_message(&message, &sig).is_err());
    }

    /// Sealing then opening with the same key reproduces the payload.
    #[test]
    fn prop_seal_open_round_trip(
        key in any::<[u8; 32]>(),
        payload in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        let key = ArtifactKey::from_bytes(&key).unwrap();
        let sealed = key.seal(&payload).unwrap();
        prop_assert_eq!(key.open(&sealed).unwrap(), payload);
    }

    /// Opening with any other key fails.
    #[test]
    fn prop_open_with_wrong_key_fails(
        key in any::<[u8; 32]>(),
        other in any::<[u8; 32]>(),
        payload in prop::collection::vec(any::<u8>(), 0..1024),
    ) {
        prop_assume!(key != other);
        let sealed = ArtifactKey::from_bytes(&key).unwrap().seal(&payload).unwrap();
        prop_assert!(ArtifactKey::from_bytes(&other).unwrap().open(&sealed).is_err());
    }
}

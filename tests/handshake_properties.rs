//! Property-based tests for the handshake
//!
//! 1. **Round-trip**: any two valid identities complete the handshake and can talk
//! 2. **Tamper sensitivity**: any single flipped bit in any act is rejected by the peer
//! 3. **Version gate**: any non-zero version byte is rejected before cryptography runs

use peerwire::{
    Act, Error, ErrorKind, HandshakeStage, Machine, MachineConfig, Phase, ACT_ONE_SIZE,
    ACT_THREE_SIZE, ACT_TWO_SIZE,
};
use proptest::prelude::*;
use secp256k1::{PublicKey, Secp256k1, SecretKey};

fn secret_key() -> impl Strategy<Value = SecretKey> {
    any::<[u8; 32]>().prop_filter_map("not a valid scalar", |bytes| SecretKey::from_slice(&bytes).ok())
}

fn public(key: &SecretKey) -> PublicKey {
    PublicKey::from_secret_key(&Secp256k1::new(), key)
}

fn pair(initiator_key: SecretKey, responder_key: SecretKey) -> (Machine, Machine) {
    (
        Machine::new(MachineConfig::initiator(initiator_key, public(&responder_key))),
        Machine::new(MachineConfig::responder(responder_key)),
    )
}

// A flipped bit in a clear key field may still decode to a curve point (then the tag fails)
// or not (then the key parse fails); both are authentication failures. Bits in the tag bytes
// must always fail the tag itself.
fn assert_rejected(err: &Error, byte: usize, tag_start: usize, act: Act) {
    if byte == 0 {
        assert!(matches!(err, Error::InvalidVersion { .. }), "unexpected {err:?}");
        return;
    }
    assert_eq!(err.kind(), ErrorKind::Authentication, "unexpected {err:?}");
    if byte >= tag_start {
        assert!(
            matches!(err, Error::Authentication { phase: Phase::Act(a) } if *a == act),
            "unexpected {err:?}"
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_handshake_round_trip(
        initiator_key in secret_key(),
        responder_key in secret_key(),
        payload in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let (mut initiator, mut responder) = pair(initiator_key, responder_key);

        let act_one = initiator.gen_act_one().unwrap();
        responder.recv_act_one(&act_one).unwrap();
        let act_two = responder.gen_act_two().unwrap();
        initiator.recv_act_two(&act_two).unwrap();
        let act_three = initiator.gen_act_three().unwrap();
        responder.recv_act_three(&act_three).unwrap();

        prop_assert_eq!(initiator.stage(), HandshakeStage::Complete);
        prop_assert_eq!(responder.remote_static(), Some(public(&initiator_key)));

        let mut wire: Vec<u8> = Vec::new();
        initiator.write_message(&mut wire, &payload).unwrap();
        let got = responder.read_message(&mut wire.as_slice()).unwrap();
        prop_assert_eq!(&got[..], &payload[..]);

        let mut wire: Vec<u8> = Vec::new();
        responder.write_message(&mut wire, &payload).unwrap();
        let got = initiator.read_message(&mut wire.as_slice()).unwrap();
        prop_assert_eq!(&got[..], &payload[..]);
    }

    #[test]
    fn prop_act_one_tamper(byte in 0..ACT_ONE_SIZE, bit in 0u8..8) {
        let (mut initiator, mut responder) = pair(
            SecretKey::from_slice(&[0x11; 32]).unwrap(),
            SecretKey::from_slice(&[0x21; 32]).unwrap(),
        );
        let mut act_one = initiator.gen_act_one().unwrap();
        act_one[byte] ^= 1 << bit;

        let err = responder.recv_act_one(&act_one).unwrap_err();
        assert_rejected(&err, byte, 1 + 33, Act::One);
        prop_assert_eq!(responder.stage(), HandshakeStage::Failed);
    }

    #[test]
    fn prop_act_two_tamper(byte in 0..ACT_TWO_SIZE, bit in 0u8..8) {
        let (mut initiator, mut responder) = pair(
            SecretKey::from_slice(&[0x11; 32]).unwrap(),
            SecretKey::from_slice(&[0x21; 32]).unwrap(),
        );
        let act_one = initiator.gen_act_one().unwrap();
        responder.recv_act_one(&act_one).unwrap();
        let mut act_two = responder.gen_act_two().unwrap();
        act_two[byte] ^= 1 << bit;

        let err = initiator.recv_act_two(&act_two).unwrap_err();
        assert_rejected(&err, byte, 1 + 33, Act::Two);
        prop_assert_eq!(initiator.stage(), HandshakeStage::Failed);
    }

    #[test]
    fn prop_act_three_tamper(byte in 0..ACT_THREE_SIZE, bit in 0u8..8) {
        let (mut initiator, mut responder) = pair(
            SecretKey::from_slice(&[0x11; 32]).unwrap(),
            SecretKey::from_slice(&[0x21; 32]).unwrap(),
        );
        let act_one = initiator.gen_act_one().unwrap();
        responder.recv_act_one(&act_one).unwrap();
        let act_two = responder.gen_act_two().unwrap();
        initiator.recv_act_two(&act_two).unwrap();
        let mut act_three = initiator.gen_act_three().unwrap();
        act_three[byte] ^= 1 << bit;

        // the static key travels encrypted, so every byte after the version is under a tag
        let err = responder.recv_act_three(&act_three).unwrap_err();
        assert_rejected(&err, byte, 1, Act::Three);
        prop_assert_eq!(responder.remote_static(), None);
    }

    #[test]
    fn prop_version_gate(version in 1u8..=255, act in 0usize..3) {
        let (mut initiator, mut responder) = pair(
            SecretKey::from_slice(&[0x11; 32]).unwrap(),
            SecretKey::from_slice(&[0x21; 32]).unwrap(),
        );

        let mut act_one = initiator.gen_act_one().unwrap();
        if act == 0 {
            act_one[0] = version;
            let err = responder.recv_act_one(&act_one).unwrap_err();
            let rejected =
                matches!(err, Error::InvalidVersion { act: Act::One, version: v } if v == version);
            prop_assert!(rejected);
            return Ok(());
        }
        responder.recv_act_one(&act_one).unwrap();

        let mut act_two = responder.gen_act_two().unwrap();
        if act == 1 {
            act_two[0] = version;
            let err = initiator.recv_act_two(&act_two).unwrap_err();
            let rejected =
                matches!(err, Error::InvalidVersion { act: Act::Two, version: v } if v == version);
            prop_assert!(rejected);
            return Ok(());
        }
        initiator.recv_act_two(&act_two).unwrap();

        let mut act_three = initiator.gen_act_three().unwrap();
        act_three[0] = version;
        let err = responder.recv_act_three(&act_three).unwrap_err();
        let rejected =
            matches!(err, Error::InvalidVersion { act: Act::Three, version: v } if v == version);
        prop_assert!(rejected);
    }
}

#[test]
fn wrong_initiator_view_of_responder_fails() {
    let responder_key = SecretKey::from_slice(&[0x21; 32]).unwrap();
    let impostor = SecretKey::from_slice(&[0x22; 32]).unwrap();

    let mut initiator = Machine::new(MachineConfig::initiator(
        SecretKey::from_slice(&[0x11; 32]).unwrap(),
        public(&impostor),
    ));
    let mut responder = Machine::new(MachineConfig::responder(responder_key));

    let act_one = initiator.gen_act_one().unwrap();
    let err = responder.recv_act_one(&act_one).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

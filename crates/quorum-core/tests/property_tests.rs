//! Property-based tests for quorum-core using proptest
//!
//! These tests verify invariants that should hold for all valid inputs.

use chrono::Utc;
use k256::ecdsa::{signature::hazmat::PrehashSigner, Signature as K256Signature, SigningKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use proptest::prelude::*;
use quorum_core::{
    Hash, KeyId, KeyState, KeygenSession, Participant, PublicKey, QuorumError, RequesterModule,
    SessionState, Signature, SigningSession, Snapshot, Threshold, ValAddress,
};

// ============================================
// Arbitrary Implementations
// ============================================

fn arb_threshold() -> impl Strategy<Value = Threshold> {
    (1u64..=100).prop_flat_map(|den| (1u64..=den).prop_map(move |num| Threshold::new(num, den)))
}

/// Weights for 1..=8 participants, each at least 1
fn arb_weights() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1u64..=50, 1..=8)
}

/// Submission order as a permutation of participant indices
fn arb_order(len: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..len).collect::<Vec<_>>()).prop_shuffle()
}

fn signing_key(i: usize) -> SigningKey {
    SigningKey::from_slice(&[i as u8 + 1; 32]).unwrap()
}

fn pub_key(i: usize) -> PublicKey {
    let encoded = signing_key(i).verifying_key().to_encoded_point(true);
    PublicKey::from_slice(encoded.as_bytes()).unwrap()
}

fn addr(i: usize) -> ValAddress {
    ValAddress::new(vec![0x10, i as u8])
}

fn snapshot(weights: &[u64], slack: u64) -> Snapshot {
    let participants = weights
        .iter()
        .enumerate()
        .map(|(i, w)| Participant::new(addr(i), *w))
        .collect();
    Snapshot::new(Utc::now(), 1, participants, weights.iter().sum::<u64>() + slack)
}

fn keygen(weights: &[u64], slack: u64, threshold: Threshold) -> KeygenSession {
    KeygenSession::new(
        KeyId::new("prop-key"),
        threshold,
        threshold,
        snapshot(weights, slack),
        100,
        5,
    )
}

// ============================================
// Property Tests
// ============================================

proptest! {
    // ----------------------------------------
    // Threshold Properties
    // ----------------------------------------

    #[test]
    fn min_passing_weight_is_tight(threshold in arb_threshold(), total in 1u64..=1_000_000) {
        let min = threshold.min_passing_weight(total);
        let num = threshold.numerator as u128;
        let den = threshold.denominator as u128;

        prop_assert!(min as u128 * den >= total as u128 * num);
        if min > 0 {
            prop_assert!(((min - 1) as u128) * den < total as u128 * num);
        }
    }

    #[test]
    fn min_passing_weight_is_monotonic(threshold in arb_threshold(), a in 1u64..=10_000, b in 1u64..=10_000) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(threshold.min_passing_weight(lo) <= threshold.min_passing_weight(hi));
    }

    // ----------------------------------------
    // Keygen Session Properties
    // ----------------------------------------

    #[test]
    fn keygen_completed_iff_weight_reached(
        (weights, order) in arb_weights().prop_flat_map(|w| { let n = w.len(); (Just(w), arb_order(n)) }),
        threshold in arb_threshold(),
        slack in 0u64..=20,
        submit_count in 0usize..=8,
    ) {
        let mut session = keygen(&weights, slack, threshold);
        let min = session.key.snapshot.min_passing_weight(&threshold) as u128;

        for &i in order.iter().take(submit_count) {
            session.add_key(1, &addr(i), pub_key(i)).unwrap();
            let completed = session.state == SessionState::Completed;
            prop_assert_eq!(completed, session.key.participants_weight() >= min);
        }

        if session.state == SessionState::Completed {
            let key = session.result().unwrap();
            prop_assert!(key.validate_basic().is_ok());
            prop_assert_eq!(key.state, KeyState::Inactive);
        }
        prop_assert!(session.validate_basic().is_ok());
    }

    #[test]
    fn keygen_rejects_duplicate_participant_and_key(weights in arb_weights()) {
        let mut session = keygen(&weights, 0, Threshold::new(1, 1));
        session.add_key(1, &addr(0), pub_key(0)).unwrap();

        let before = session.clone();
        let dup_participant = session.add_key(1, &addr(0), pub_key(99));
        let is_duplicate_submission = matches!(dup_participant, Err(QuorumError::DuplicateSubmission { .. }));
        prop_assert!(is_duplicate_submission);
        prop_assert_eq!(&session, &before);

        if weights.len() > 1 {
            prop_assert_eq!(
                session.add_key(1, &addr(1), pub_key(0)),
                Err(QuorumError::DuplicatePublicKey)
            );
            prop_assert_eq!(&session, &before);
        }
    }

    #[test]
    fn keygen_expired_never_mutates(weights in arb_weights(), past in 0u64..=50) {
        let mut session = keygen(&weights, 0, Threshold::new(1, 2));
        let before = session.clone();
        let height = session.expires_at + past;
        let expired = session.add_key(height, &addr(0), pub_key(0));
        prop_assert!(matches!(expired, Err(QuorumError::Expired { .. })), "expected Expired, got {:?}", expired);
        prop_assert_eq!(session, before);
    }

    #[test]
    fn keygen_closed_after_grace_period(extra in 1u64..=10) {
        // weights 5 + 1: the first submission alone completes the session
        let mut session = keygen(&[5, 1], 0, Threshold::new(1, 2));
        session.add_key(10, &addr(0), pub_key(0)).unwrap();
        prop_assert_eq!(session.state, SessionState::Completed);

        let height = session.completed_at + session.grace_period + extra;
        prop_assume!(height < session.expires_at);
        let closed = session.add_key(height, &addr(1), pub_key(1));
        prop_assert!(matches!(closed, Err(QuorumError::Closed { .. })), "expected Closed, got {:?}", closed);
    }

    // ----------------------------------------
    // Signing Session Properties
    // ----------------------------------------

    #[test]
    fn signing_completed_iff_weight_reached(
        (weights, order) in arb_weights().prop_flat_map(|w| { let n = w.len(); (Just(w), arb_order(n)) }),
        threshold in arb_threshold(),
        payload in any::<[u8; 32]>().prop_filter("non-zero", |p| *p != [0u8; 32]),
    ) {
        let mut keygen = keygen(&weights, 0, Threshold::new(1, 1));
        for i in 0..weights.len() {
            keygen.add_key(1, &addr(i), pub_key(i)).unwrap();
        }
        let mut key = keygen.result().unwrap();
        key.signing_threshold = threshold;
        key.state = KeyState::Active;
        let min = key.min_passing_weight() as u128;

        let mut session = SigningSession::new(0, key, Hash::new(payload), 50, 0, RequesterModule::Evm, None);
        let mut signed = 0u128;
        for &i in &order {
            if session.is_completed() {
                break;
            }
            let sig: K256Signature = signing_key(i).sign_prehash(&payload).unwrap();
            session.add_sig(2, &addr(i), Signature::from(sig)).unwrap();
            signed += weights[i] as u128;
            prop_assert_eq!(session.is_completed(), signed >= min);
        }

        prop_assert!(session.is_completed());
        prop_assert!(session.result().unwrap().validate_basic().is_ok());
    }
}

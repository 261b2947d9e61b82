//! Fixed-term policy flows

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use rust_decimal_macros::dec;
use umbrella_common::{
    units::units, AdmissionError, Amount, AuthorizationError, ClaimSignature, Clock, CoverEvent,
    HolderId, ManualClock, PolicyId, PolicyStateError, StrategyId, UmbrellaError,
};
use umbrella_engine::{
    CapacityLedger, ClaimRequest, Collaborators, CoverEngine, CoverScope, Ed25519ClaimVerifier,
    EngineConfig, EventLog, InMemoryFunds, Role, RoleTable, StaticRiskBudget,
};
use umbrella_term::{FixedAppraiser, PositionRef, TermBook, TermConfig};

const START: u64 = 1_700_000_000;
const PERIOD: u64 = 1_000_000;

struct TermHarness {
    book: TermBook,
    adapter: Arc<FixedAppraiser>,
    funds: Arc<InMemoryFunds>,
    risk: Arc<StaticRiskBudget>,
    events: Arc<EventLog>,
    clock: Arc<ManualClock>,
    collaborators: Collaborators,
    governor: HolderId,
    claim_signer: SigningKey,
}

/// 1e-7 of cover per second, one-unit cancel fee
fn term_config() -> TermConfig {
    TermConfig {
        rate_numerator: 1,
        rate_denominator: 10_000_000,
        min_period_secs: 1_000,
        max_period_secs: 10 * PERIOD,
        cancel_fee: dec!(1),
        ..Default::default()
    }
}

fn holder(seed: u8) -> HolderId {
    HolderId::from(&SigningKey::from_bytes(&[seed; 32]).verifying_key())
}

fn vault() -> PositionRef {
    PositionRef::new("lending", "vault-1")
}

impl TermHarness {
    fn new() -> Self {
        Self::with_capacity(Arc::new(CapacityLedger::new()))
    }

    fn with_capacity(capacity: Arc<CapacityLedger>) -> Self {
        let funds = Arc::new(InMemoryFunds::new());
        let risk = Arc::new(StaticRiskBudget::new(units(1_000_000)));
        let roles = Arc::new(RoleTable::new());
        let events = Arc::new(EventLog::new());
        let clock = Arc::new(ManualClock::new(START));
        let adapter = Arc::new(FixedAppraiser::new("lending"));

        let governor = HolderId([0xAA; 32]);
        roles.grant(governor, Role::Governor);

        let collaborators = Collaborators {
            risk_budget: risk.clone(),
            funds: funds.clone(),
            authority: roles,
            verifier: Arc::new(Ed25519ClaimVerifier),
            events: events.clone(),
            clock: clock.clone(),
        };
        let book = TermBook::with_capacity_ledger(
            &term_config(),
            collaborators.clone(),
            adapter.clone(),
            capacity,
        )
        .unwrap();

        let claim_signer = SigningKey::from_bytes(&[0xCC; 32]);
        book.add_claim_signer(&governor, claim_signer.verifying_key().to_bytes())
            .unwrap();

        Self {
            book,
            adapter,
            funds,
            risk,
            events,
            clock,
            collaborators,
            governor,
            claim_signer,
        }
    }

    /// Alice holds vault-1 worth 80 units and buys the full 100 requested
    async fn alice_buys(&self) -> PolicyId {
        let alice = holder(1);
        self.adapter.set_value(&alice, "vault-1", units(80));
        self.funds.mint(&alice, units(20));
        self.book
            .buy_policy(&alice, &vault(), units(100), PERIOD, units(20))
            .await
            .unwrap()
            .policy_id
    }

    fn claim(&self, policy_id: PolicyId, claimant: &HolderId, amount: Amount) -> ClaimRequest {
        let deadline = self.clock.now() + 10;
        ClaimRequest {
            policy_id,
            amount_out: amount,
            deadline,
            signature: ClaimSignature::sign(&self.claim_signer, policy_id, claimant, amount, deadline),
        }
    }
}

mod buying {
    use super::*;

    #[tokio::test]
    async fn test_cover_clamped_to_appraisal() {
        let h = TermHarness::new();
        let alice = holder(1);
        h.adapter.set_value(&alice, "vault-1", units(80));
        h.funds.mint(&alice, units(20));

        let receipt = h
            .book
            .buy_policy(&alice, &vault(), units(100), PERIOD, units(20))
            .await
            .unwrap();

        assert_eq!(receipt.policy_id, PolicyId(1));
        assert_eq!(receipt.cover_limit, units(80));
        assert_eq!(receipt.expires_at, START + PERIOD);
        assert_eq!(receipt.charged, units(8));
        assert_eq!(receipt.unused_payment, units(12));
        assert_eq!(h.adapter.appraisals(), 1);

        assert_eq!(h.funds.wallet(&alice), units(12));
        assert_eq!(h.funds.custody(), units(8));
        assert_eq!(h.book.active_cover_limit(), units(80));
        assert_eq!(h.book.audit().await, units(80));
        assert_eq!(h.events.names(), vec!["PolicyCreated"]);
    }

    #[tokio::test]
    async fn test_buy_rejections() {
        let h = TermHarness::new();
        let alice = holder(1);
        let bob = holder(2);
        h.adapter.set_value(&alice, "vault-1", units(80));
        h.funds.mint(&alice, units(20));

        assert_eq!(
            h.book.buy_policy(&alice, &vault(), 0, PERIOD, units(20)).await,
            Err(UmbrellaError::Admission(AdmissionError::ZeroCoverValue))
        );
        assert_eq!(
            h.book.buy_policy(&alice, &vault(), units(10), 999, units(20)).await,
            Err(UmbrellaError::Admission(AdmissionError::InvalidDuration))
        );
        assert_eq!(
            h.book
                .buy_policy(&alice, &vault(), units(10), 10 * PERIOD + 1, units(20))
                .await,
            Err(UmbrellaError::Admission(AdmissionError::InvalidDuration))
        );
        assert_eq!(
            h.book
                .buy_policy(&alice, &PositionRef::new("dex", "vault-1"), units(10), PERIOD, units(20))
                .await,
            Err(UmbrellaError::Authorization(AuthorizationError::WrongProduct))
        );
        assert_eq!(
            h.book
                .buy_policy(&alice, &PositionRef::new("lending", "vault-9"), units(10), PERIOD, units(20))
                .await,
            Err(UmbrellaError::Admission(AdmissionError::InvalidPosition))
        );
        // position exists but is worth nothing to bob
        assert_eq!(
            h.book.buy_policy(&bob, &vault(), units(10), PERIOD, units(20)).await,
            Err(UmbrellaError::Admission(AdmissionError::ZeroCoverValue))
        );
        assert_eq!(
            h.book.buy_policy(&alice, &vault(), units(100), PERIOD, units(1)).await,
            Err(UmbrellaError::Admission(AdmissionError::InsufficientDeposit {
                required: units(8),
                provided: units(1),
            }))
        );

        assert_eq!(h.book.active_cover_limit(), 0);
        assert_eq!(h.funds.wallet(&alice), units(20));
        assert!(h.events.is_empty());
    }

    #[tokio::test]
    async fn test_one_policy_per_holder() {
        let h = TermHarness::new();
        h.alice_buys().await;

        assert_eq!(
            h.book
                .buy_policy(&holder(1), &vault(), units(10), PERIOD, units(10))
                .await,
            Err(UmbrellaError::State(PolicyStateError::PolicyAlreadyActive))
        );
    }

    #[tokio::test]
    async fn test_capacity_exact_fit_rejected() {
        let h = TermHarness::new();
        h.risk
            .set_max_cover(CoverScope::Strategy(StrategyId::new("term")), units(80));
        let alice = holder(1);
        h.adapter.set_value(&alice, "vault-1", units(80));
        h.funds.mint(&alice, units(20));

        let result = h
            .book
            .buy_policy(&alice, &vault(), units(80), PERIOD, units(20))
            .await;
        assert!(matches!(
            result,
            Err(UmbrellaError::Admission(AdmissionError::InsufficientCapacity { .. }))
        ));
        assert_eq!(h.funds.custody(), 0);
    }

    #[tokio::test]
    async fn test_pause_blocks_purchases() {
        let h = TermHarness::new();
        let alice = holder(1);
        h.adapter.set_value(&alice, "vault-1", units(80));
        h.funds.mint(&alice, units(20));

        assert!(h.book.set_paused(&alice, true).is_err());
        h.book.set_paused(&h.governor, true).unwrap();
        assert_eq!(
            h.book.buy_policy(&alice, &vault(), units(10), PERIOD, units(20)).await,
            Err(UmbrellaError::State(PolicyStateError::ProductPaused))
        );

        h.book.set_paused(&h.governor, false).unwrap();
        h.book
            .buy_policy(&alice, &vault(), units(10), PERIOD, units(20))
            .await
            .unwrap();
    }
}

mod repricing {
    use super::*;

    #[tokio::test]
    async fn test_update_cover_charges_then_refunds() {
        let h = TermHarness::new();
        let alice = holder(1);
        h.alice_buys().await;
        h.clock.advance(PERIOD / 2);

        // clamped back to the same 80 units
        let receipt = h.book.update_cover(&alice, units(100), 0).await.unwrap();
        assert_eq!(receipt.cover_limit, units(80));
        assert_eq!((receipt.charged, receipt.refunded), (0, 0));

        h.adapter.set_value(&alice, "vault-1", units(200));
        let receipt = h.book.update_cover(&alice, units(160), units(10)).await.unwrap();
        assert_eq!(receipt.cover_limit, units(160));
        assert_eq!(receipt.charged, units(4));
        assert_eq!(receipt.unused_payment, units(6));
        assert_eq!(receipt.expires_at, START + PERIOD);

        let receipt = h.book.update_cover(&alice, units(40), 0).await.unwrap();
        assert_eq!(receipt.refunded, units(6));
        assert_eq!(h.adapter.appraisals(), 4);

        let policy = h.book.policy_of(&alice).await.unwrap();
        assert_eq!(policy.premium_paid, units(6));
        assert_eq!(h.book.active_cover_limit(), units(40));
        assert_eq!(h.funds.wallet(&alice), units(12) - units(4) + units(6));
        assert_eq!(h.book.audit().await, units(40));
    }

    #[tokio::test]
    async fn test_update_cover_needs_payment_for_increase() {
        let h = TermHarness::new();
        let alice = holder(1);
        h.alice_buys().await;
        h.adapter.set_value(&alice, "vault-1", units(200));

        assert_eq!(
            h.book.update_cover(&alice, units(160), units(1)).await,
            Err(UmbrellaError::Admission(AdmissionError::InsufficientDeposit {
                required: units(8),
                provided: units(1),
            }))
        );
        assert_eq!(h.book.active_cover_limit(), units(80));
    }

    #[tokio::test]
    async fn test_pause_blocks_cover_increase_only() {
        let h = TermHarness::new();
        let alice = holder(1);
        h.alice_buys().await;
        h.adapter.set_value(&alice, "vault-1", units(200));
        h.book.set_paused(&h.governor, true).unwrap();

        assert_eq!(
            h.book.update_cover(&alice, units(100), units(10)).await,
            Err(UmbrellaError::State(PolicyStateError::ProductPaused))
        );
        h.book.update_cover(&alice, units(50), 0).await.unwrap();
        h.book.extend_policy(&alice, PERIOD, units(10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_extend_policy() {
        let h = TermHarness::new();
        let alice = holder(1);
        h.alice_buys().await;

        let receipt = h.book.extend_policy(&alice, PERIOD, units(10)).await.unwrap();
        assert_eq!(receipt.expires_at, START + 2 * PERIOD);
        assert_eq!(receipt.charged, units(8));
        assert_eq!(receipt.unused_payment, units(2));
        assert!(h.events.events().contains(&CoverEvent::PolicyExtended {
            policy_id: receipt.policy_id,
            holder: alice,
            expires_at: START + 2 * PERIOD,
        }));

        assert_eq!(
            h.book.extend_policy(&alice, 0, units(10)).await,
            Err(UmbrellaError::Admission(AdmissionError::InvalidDuration))
        );
        // already 2 periods ahead; 8 more would exceed the 10 period maximum
        assert_eq!(
            h.book.extend_policy(&alice, 8 * PERIOD + 1, units(100)).await,
            Err(UmbrellaError::Admission(AdmissionError::InvalidDuration))
        );
        assert_eq!(h.adapter.appraisals(), 1);
    }

    #[tokio::test]
    async fn test_update_policy_restarts_period() {
        let h = TermHarness::new();
        let alice = holder(1);
        h.alice_buys().await;
        h.clock.advance(PERIOD / 2);
        h.events.clear();

        let receipt = h
            .book
            .update_policy(&alice, units(80), 2 * PERIOD, units(20))
            .await
            .unwrap();
        // 16 for the new period less 4 still paid for the old remainder
        assert_eq!(receipt.charged, units(12));
        assert_eq!(receipt.expires_at, START + PERIOD / 2 + 2 * PERIOD);
        assert_eq!(h.events.names(), vec!["PolicyUpdated", "PolicyExtended"]);

        assert_eq!(
            h.book.update_policy(&alice, units(80), 10, units(20)).await,
            Err(UmbrellaError::Admission(AdmissionError::InvalidDuration))
        );
    }
}

mod ending {
    use super::*;

    #[tokio::test]
    async fn test_cancel_refunds_remainder_minus_fee() {
        let h = TermHarness::new();
        let alice = holder(1);
        let policy_id = h.alice_buys().await;
        h.clock.advance(PERIOD / 4);

        // 6 units of premium remain unexpired, less the 1 unit fee
        let refund = h.book.cancel_policy(&alice).await.unwrap();
        assert_eq!(refund, units(5));
        assert_eq!(h.funds.wallet(&alice), units(17));
        assert_eq!(h.book.pending_settlement().await, units(3));
        assert_eq!(h.book.active_cover_limit(), 0);
        assert!(h.events.events().contains(&CoverEvent::PolicyCanceled {
            policy_id,
            holder: alice,
            refund: units(5),
        }));

        assert_eq!(
            h.book.cancel_policy(&alice).await,
            Err(UmbrellaError::State(PolicyStateError::InvalidPolicy))
        );
        assert!(h.book.policy(policy_id).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_policy_must_be_swept() {
        let h = TermHarness::new();
        let alice = holder(1);
        let policy_id = h.alice_buys().await;
        h.clock.advance(PERIOD);

        let expired = Err(UmbrellaError::State(PolicyStateError::PolicyExpired));
        assert_eq!(h.book.update_cover(&alice, units(10), 0).await.map(|_| ()), expired);
        assert_eq!(h.book.extend_policy(&alice, PERIOD, units(10)).await.map(|_| ()), expired);
        assert_eq!(h.book.cancel_policy(&alice).await.map(|_| ()), expired);
        assert_eq!(
            h.book
                .buy_policy(&alice, &vault(), units(10), PERIOD, units(10))
                .await
                .map(|_| ()),
            expired
        );
        let request = h.claim(policy_id, &alice, units(10));
        assert_eq!(h.book.submit_claim(&alice, &request).await, expired);

        // capacity stays booked until the sweep
        assert_eq!(h.book.audit().await, units(80));

        let report = h.book.sweep_expired().await.unwrap();
        assert_eq!(report.expired, vec![policy_id]);
        assert_eq!(report.settled, units(8));
        assert_eq!(h.funds.pool(), units(8));
        assert_eq!(h.book.active_cover_limit(), 0);
        assert_eq!(h.book.audit().await, 0);
        assert!(h.events.names().contains(&"PolicyExpired"));

        let receipt = h
            .book
            .buy_policy(&alice, &vault(), units(10), PERIOD, units(10))
            .await
            .unwrap();
        assert_eq!(receipt.policy_id, PolicyId(2));
    }

    #[tokio::test]
    async fn test_sweep_settles_canceled_premium() {
        let h = TermHarness::new();
        let alice = holder(1);
        h.alice_buys().await;
        h.clock.advance(PERIOD / 4);
        h.book.cancel_policy(&alice).await.unwrap();

        let report = h.book.sweep_expired().await.unwrap();
        assert!(report.expired.is_empty());
        assert_eq!(report.settled, units(3));
        assert_eq!(h.book.pending_settlement().await, 0);
        assert_eq!(h.funds.pool(), units(3));
    }

    #[tokio::test]
    async fn test_claim_burns_term_policy() {
        let h = TermHarness::new();
        let alice = holder(1);
        let bob = holder(2);
        let policy_id = h.alice_buys().await;

        let forged = h.claim(policy_id, &bob, units(50));
        assert_eq!(
            h.book.submit_claim(&bob, &forged).await,
            Err(UmbrellaError::Authorization(AuthorizationError::NotPolicyHolder))
        );
        let too_much = h.claim(policy_id, &alice, units(81));
        assert_eq!(
            h.book.submit_claim(&alice, &too_much).await,
            Err(UmbrellaError::State(PolicyStateError::ClaimExceedsCover))
        );

        let request = h.claim(policy_id, &alice, units(50));
        h.book.submit_claim(&alice, &request).await.unwrap();
        assert_eq!(h.funds.claims_paid(&alice), units(50));
        assert_eq!(h.book.active_cover_limit(), 0);
        assert_eq!(h.book.pending_settlement().await, units(8));
        assert!(h.book.policy_of(&alice).await.unwrap().burned);

        assert_eq!(
            h.book.submit_claim(&alice, &request).await,
            Err(UmbrellaError::State(PolicyStateError::InvalidPolicy))
        );
    }
}

mod atomicity {
    use super::*;

    #[tokio::test]
    async fn test_failed_premium_pull_leaves_no_trace() {
        let h = TermHarness::new();
        let alice = holder(1);
        h.adapter.set_value(&alice, "vault-1", units(80));
        h.funds.mint(&alice, units(20));
        h.funds.fail_next_call();

        let result = h
            .book
            .buy_policy(&alice, &vault(), units(80), PERIOD, units(20))
            .await;
        assert!(matches!(result, Err(UmbrellaError::Collaborator(_))));
        assert_eq!(h.book.active_cover_limit(), 0);
        assert!(h.book.policy_of(&alice).await.is_none());
        assert!(h.events.is_empty());

        // the aborted purchase consumed an id
        let receipt = h
            .book
            .buy_policy(&alice, &vault(), units(80), PERIOD, units(20))
            .await
            .unwrap();
        assert_eq!(receipt.policy_id, PolicyId(2));
    }

    #[tokio::test]
    async fn test_failed_settlement_keeps_policies_live() {
        let h = TermHarness::new();
        h.alice_buys().await;
        h.clock.advance(PERIOD);
        h.funds.fail_next_call();

        assert!(h.book.sweep_expired().await.is_err());
        assert_eq!(h.book.audit().await, units(80));
        assert_eq!(h.funds.pool(), 0);

        assert_eq!(h.book.sweep_expired().await.unwrap().settled, units(8));
    }

    #[tokio::test]
    async fn test_capacity_shared_with_subscription_engine() {
        let capacity = Arc::new(CapacityLedger::new());
        let h = TermHarness::with_capacity(capacity.clone());
        let engine =
            CoverEngine::with_capacity_ledger(&EngineConfig::default(), h.collaborators.clone(), capacity.clone())
                .unwrap();

        let carol = holder(3);
        h.funds.mint(&carol, units(10));
        engine.activate(&carol, units(100), units(10), None).await.unwrap();
        h.alice_buys().await;

        assert_eq!(capacity.active_cover(&CoverScope::Global), units(180));
        assert_eq!(engine.audit().await, units(100));
        assert_eq!(h.book.audit().await, units(80));
    }
}

mod common;

use barter_core::blockchain::{Asset, Currency, Hash256, UnlockHash, MINER_FEE};
use barter_core::swap::{self, Error, Stage, SwapTransaction, Violation};
use barter_core::transaction::FundOutput;
use barter_core::wallet::{self, owned_addresses, Wallet};

use common::FakeWallet;

fn stage(swap: &SwapTransaction, wallet: &FakeWallet) -> Stage {
    swap::derive_stage(swap, &owned_addresses(wallet).unwrap())
}

// A offers 7 fund for 2 coin, B accepts and pays the fee.
fn accepted_swap() -> (FakeWallet, FakeWallet, SwapTransaction) {
    let alice = FakeWallet::new(1);
    alice.fund(Asset::Fund, Currency::new(9));
    let bob = FakeWallet::new(2);
    bob.fund(Asset::Coin, Currency::from_coins(10));

    let proposed = swap::create(&alice, Currency::new(7), Currency::from_coins(2), true).unwrap();
    assert_eq!(stage(&proposed, &alice), Stage::WaitingForCounterpartyToAccept);

    // exchanged as text
    let received = SwapTransaction::from_base64(&proposed.to_base64()).unwrap();
    assert_eq!(stage(&received, &bob), Stage::WaitingForYouToAccept);
    swap::check_accept(&received).unwrap();

    let accepted = swap::accept(&received, &bob).unwrap();
    assert_eq!(stage(&accepted, &bob), Stage::WaitingForCounterpartyToFinish);
    (alice, bob, accepted)
}

#[test]
fn fund_for_coin_end_to_end() {
    let (alice, bob, accepted) = accepted_swap();
    assert_eq!(stage(&accepted, &alice), Stage::WaitingForYouToFinish);
    swap::check_finish(&accepted, &alice).unwrap();

    let finished = swap::finish(&accepted, &alice).unwrap();
    assert_eq!(stage(&finished, &alice), Stage::Completed);
    assert_eq!(stage(&finished, &bob), Stage::Completed);

    // fund inputs all from A, coin inputs all from B
    assert_eq!(finished.fund_inputs.len(), 1);
    assert!(alice.owns(&finished.fund_inputs[0].unlock_conditions.unlock_hash()));
    assert_eq!(finished.coin_inputs.len(), 1);
    assert!(bob.owns(&finished.coin_inputs[0].unlock_conditions.unlock_hash()));

    // primary outputs pay the counterparty, change goes back
    assert!(alice.owns(&finished.coin_outputs[0].unlock_hash));
    assert_eq!(finished.coin_outputs[0].value, Currency::from_coins(2));
    assert!(bob.owns(&finished.fund_outputs[0].unlock_hash));
    assert_eq!(finished.fund_outputs[0].value, Currency::new(7));
    assert!(alice.owns(&finished.fund_outputs[1].unlock_hash));
    assert_eq!(finished.fund_outputs[1].value, Currency::new(2));
    assert!(bob.owns(&finished.coin_outputs[1].unlock_hash));
    assert_eq!(
        finished.coin_outputs[1].value,
        Currency::from_coins(8).checked_sub(MINER_FEE).unwrap()
    );

    // each party covers only its own inputs
    assert_eq!(finished.signatures.len(), 2);
    let bob_sig = &finished.signatures[0];
    assert_eq!(bob_sig.parent_id, Hash256::from(finished.coin_inputs[0].parent_id));
    assert_eq!(bob_sig.covered_fields.coin_inputs, vec![0]);
    assert!(bob_sig.covered_fields.fund_inputs.is_empty());
    let alice_sig = &finished.signatures[1];
    assert_eq!(alice_sig.parent_id, Hash256::from(finished.fund_inputs[0].parent_id));
    assert_eq!(alice_sig.covered_fields.fund_inputs, vec![0]);
    assert!(alice_sig.covered_fields.coin_inputs.is_empty());

    let broadcast = alice.last_broadcast();
    assert_eq!(broadcast, finished.as_full_transaction());
    broadcast.standalone_valid(0).unwrap();
    assert!(bob.broadcasts().is_empty());
}

#[test]
fn coin_for_fund_end_to_end() {
    let alice = FakeWallet::new(3);
    alice.fund(Asset::Coin, Currency::from_coins(4));
    alice.fund(Asset::Coin, Currency::from_coins(4));
    let bob = FakeWallet::new(4);
    bob.fund(Asset::Fund, Currency::new(3));

    let proposed = swap::create(&alice, Currency::from_coins(2), Currency::new(3), false).unwrap();
    // 2 coin plus the fee needs both outputs
    assert_eq!(proposed.coin_inputs.len(), 2);
    assert!(proposed.fund_outputs[0].unlock_hash != UnlockHash::zero());

    let accepted = swap::accept(&proposed, &bob).unwrap();
    // exact amount, no fund change
    assert_eq!(accepted.fund_outputs.len(), 1);
    let finished = swap::finish(&accepted, &alice).unwrap();
    assert_eq!(finished.signatures.len(), 3);
    alice.last_broadcast().standalone_valid(0).unwrap();

    let summary = swap::summarize(&finished, &owned_addresses(&alice).unwrap()).unwrap();
    assert!(summary.receive_fund);
    assert!(summary.pay_fee);
    assert_eq!(summary.stage, Stage::Completed);
}

#[test]
fn check_finish_rejects_foreign_change() {
    let (alice, _bob, accepted) = accepted_swap();
    let mut tampered = accepted.clone();
    tampered.fund_outputs.push(FundOutput {
        value: Currency::new(1),
        unlock_hash: UnlockHash::repeat_byte(0xee),
    });
    assert!(matches!(
        swap::check_finish(&tampered, &alice),
        Err(Error::ProtocolViolation(Violation::ForeignChangeOutput(
            Asset::Fund
        )))
    ));
    assert!(swap::finish(&tampered, &alice).is_err());
    assert!(alice.broadcasts().is_empty());
}

#[test]
fn check_finish_rejects_redirected_payment() {
    let (alice, _bob, accepted) = accepted_swap();
    let mut tampered = accepted;
    tampered.coin_outputs[0].unlock_hash = UnlockHash::repeat_byte(0xee);
    assert!(matches!(
        swap::check_finish(&tampered, &alice),
        Err(Error::ProtocolViolation(Violation::ForeignOutput(Asset::Coin)))
    ));
}

#[test]
fn check_finish_rejects_stolen_inputs() {
    let (alice, bob, accepted) = accepted_swap();
    // from B's side the fund inputs are not B's own
    assert!(matches!(
        swap::check_finish(&accepted, &bob),
        Err(Error::ProtocolViolation(Violation::ForeignInput(Asset::Fund)))
    ));
    // an unfinished swap stays unchanged for A
    swap::check_finish(&accepted, &alice).unwrap();
}

#[test]
fn accept_without_funds_fails() {
    let alice = FakeWallet::new(5);
    alice.fund(Asset::Fund, Currency::new(9));
    let broke = FakeWallet::new(6);
    broke.fund(Asset::Coin, Currency::from_coins(2));

    let proposed = swap::create(&alice, Currency::new(7), Currency::from_coins(2), true).unwrap();
    // 2 coin does not cover the fee on top
    assert!(matches!(
        swap::accept(&proposed, &broke),
        Err(Error::Wallet(wallet::Error::InsufficientFunds {
            asset: Asset::Coin,
            ..
        }))
    ));
    assert!(broke.unspent_outputs(Asset::Coin).unwrap().len() == 1);
}

#[test]
fn create_rejects_zero_amounts() {
    let alice = FakeWallet::new(7);
    alice.fund(Asset::Fund, Currency::new(9));
    assert!(matches!(
        swap::create(&alice, Currency::ZERO, Currency::from_coins(2), true),
        Err(Error::InvalidAmount)
    ));
}

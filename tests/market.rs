mod common;

use barter_core::bid::{self, Bid};
use barter_core::blockchain::{Asset, Currency, MINER_FEE};
use barter_core::market::{self, BidSource, BidTransport, Error, Placement};
use barter_core::wallet::{self, Wallet};

use common::{FakeWallet, MemoryBlobStore};

// 3 fund offered for 5 coin
fn fund_bid(bidder: &FakeWallet, transport: BidTransport) -> Placement {
    bidder.fund(Asset::Fund, Currency::new(10));
    market::place_bid(
        bidder,
        Currency::new(3),
        Currency::from_coins(5),
        true,
        transport,
    )
    .unwrap()
}

#[test]
fn create_bid_reserves_offered_output() {
    let bidder = FakeWallet::new(1);
    bidder.fund(Asset::Fund, Currency::new(10));
    let (setup, bid) =
        market::create_bid(&bidder, Currency::new(3), Currency::from_coins(5), true).unwrap();

    setup.standalone_valid(0).unwrap();
    assert_eq!(setup.fund_outputs[0].value, Currency::new(3));
    assert_eq!(setup.fund_outputs[1].value, Currency::new(7));
    assert_eq!(bid.id, setup.fund_output_id(0));
    assert_eq!(bid.offered_asset(), Asset::Fund);
    assert_eq!(bid.offered(), Currency::new(3));
    assert_eq!(bid.requested(), Currency::from_coins(5));

    // the fragment holds the reserved input, the requested output and one narrow signature
    let fragment = &bid.transaction;
    assert_eq!(fragment.input_parent_ids(), vec![bid.id]);
    assert_eq!(fragment.coin_outputs[0].value, Currency::from_coins(5));
    assert!(bidder.owns(&fragment.coin_outputs[0].unlock_hash));
    assert!(!fragment.signatures[0].covered_fields.whole_transaction);
    fragment.standalone_valid(0).unwrap();
    assert_eq!(bid::extract_bid_transaction(0, fragment).unwrap(), *fragment);

    // nothing broadcast yet
    assert!(bidder.broadcasts().is_empty());
}

#[test]
fn place_bid_on_chain() {
    let bidder = FakeWallet::new(2);
    let id = match fund_bid(&bidder, BidTransport::OnChain) {
        Placement::OnChain(id) => id,
        other => panic!("unexpected placement {:?}", other),
    };
    let broadcasts = bidder.broadcasts();
    assert_eq!(broadcasts.len(), 2);

    let (bids, fills) = bid::find_bids(42, &broadcasts);
    assert!(fills.is_empty());
    assert_eq!(bids.len(), 1);
    assert_eq!(bids[0].id, id);
    assert_eq!(bids[0].height, 42);
    assert_eq!(bids[0].id, broadcasts[0].fund_output_id(0));
}

#[test]
fn fill_fund_bid() {
    let bidder = FakeWallet::new(3);
    let text = match fund_bid(&bidder, BidTransport::Base64) {
        Placement::Text(text) => text,
        other => panic!("unexpected placement {:?}", other),
    };
    let bid = market::load_bid(BidSource::Base64(&text)).unwrap();

    let filler = FakeWallet::new(4);
    filler.fund(Asset::Coin, Currency::from_coins(20));
    let fill = market::fill_bid(&filler, &bid).unwrap();
    assert_eq!(filler.last_broadcast(), fill);

    // every signature verifies, the bidder's one included
    fill.standalone_valid(0).unwrap();
    assert!(bid::is_probable_fill(&fill));
    assert_eq!(fill.miner_fees, vec![MINER_FEE]);
    assert!(bidder.owns(&fill.coin_outputs[0].unlock_hash));
    assert_eq!(fill.coin_outputs[0].value, Currency::from_coins(5));
    let received = fill.fund_outputs.last().unwrap();
    assert!(filler.owns(&received.unlock_hash));
    assert_eq!(received.value, Currency::new(3));

    // coin balances: 20 in, 5 to the bidder, the fee, 10 back as change
    let coin_out = fill
        .coin_outputs
        .iter()
        .fold(Currency::ZERO, |sum, o| sum.checked_add(o.value).unwrap());
    assert_eq!(
        coin_out.checked_add(MINER_FEE).unwrap(),
        Currency::from_coins(20)
    );
}

#[test]
fn fill_coin_bid() {
    let bidder = FakeWallet::new(5);
    bidder.fund(Asset::Coin, Currency::from_coins(5));
    let (_, bid) =
        market::create_bid(&bidder, Currency::from_coins(5), Currency::new(3), false).unwrap();
    assert_eq!(bid.offered_asset(), Asset::Coin);

    let filler = FakeWallet::new(6);
    filler.fund(Asset::Fund, Currency::new(3));
    filler.fund(Asset::Coin, MINER_FEE);
    let fill = market::fill_bid(&filler, &bid).unwrap();
    fill.standalone_valid(0).unwrap();
    assert!(bid::is_probable_fill(&fill));
    assert!(bidder.owns(&fill.fund_outputs[0].unlock_hash));
    assert_eq!(fill.fund_outputs[0].value, Currency::new(3));
    // exact amounts, no change
    assert_eq!(fill.coin_outputs.len(), 1);
    assert!(filler.owns(&fill.coin_outputs[0].unlock_hash));
    assert_eq!(fill.coin_outputs[0].value, Currency::from_coins(5));
}

#[test]
fn fill_without_funds() {
    let bidder = FakeWallet::new(7);
    let text = match fund_bid(&bidder, BidTransport::Base64) {
        Placement::Text(text) => text,
        other => panic!("unexpected placement {:?}", other),
    };
    let bid: Bid = text.parse().unwrap();
    let filler = FakeWallet::new(8);
    // covers the payment but not the fee
    filler.fund(Asset::Coin, Currency::from_coins(5));
    assert!(matches!(
        market::fill_bid(&filler, &bid),
        Err(Error::Wallet(wallet::Error::InsufficientFunds {
            asset: Asset::Coin,
            ..
        }))
    ));
    assert!(filler.broadcasts().is_empty());
}

#[test]
fn tampered_bid_is_rejected() {
    let bidder = FakeWallet::new(9);
    let text = match fund_bid(&bidder, BidTransport::Base64) {
        Placement::Text(text) => text,
        other => panic!("unexpected placement {:?}", other),
    };
    let mut bid: Bid = text.parse().unwrap();
    bid.transaction.coin_outputs[0].value = Currency::from_coins(1);

    let filler = FakeWallet::new(10);
    filler.fund(Asset::Coin, Currency::from_coins(20));
    assert!(market::fill_bid(&filler, &bid).is_err());
    assert!(filler.broadcasts().is_empty());
}

#[test]
fn fill_rejects_misstated_amount() {
    let bidder = FakeWallet::new(12);
    let text = match fund_bid(&bidder, BidTransport::Base64) {
        Placement::Text(text) => text,
        other => panic!("unexpected placement {:?}", other),
    };
    let mut bid: Bid = text.parse().unwrap();
    // the fragment still asks for 5 coin
    bid.coin = Currency::from_coins(10);

    let filler = FakeWallet::new(13);
    filler.fund(Asset::Coin, Currency::from_coins(20));
    assert!(matches!(
        market::fill_bid(&filler, &bid),
        Err(Error::Bid(bid::Error::InconsistentBid))
    ));
    assert!(filler.broadcasts().is_empty());
}

#[test]
fn fill_drops_uncovered_entries() {
    let bidder = FakeWallet::new(14);
    let text = match fund_bid(&bidder, BidTransport::Base64) {
        Placement::Text(text) => text,
        other => panic!("unexpected placement {:?}", other),
    };
    let mut bid: Bid = text.parse().unwrap();
    let mut extra = bid.transaction.coin_outputs[0].clone();
    extra.value = Currency::from_coins(7);
    bid.transaction.coin_outputs.push(extra);
    bid.transaction.arbitrary_data.push(b"noise".to_vec());

    let filler = FakeWallet::new(15);
    filler.fund(Asset::Coin, Currency::from_coins(20));
    let fill = market::fill_bid(&filler, &bid).unwrap();
    fill.standalone_valid(0).unwrap();
    assert!(fill.arbitrary_data.is_empty());
    assert_eq!(fill.coin_outputs[0].value, Currency::from_coins(5));
    assert!(fill
        .coin_outputs
        .iter()
        .all(|o| o.value != Currency::from_coins(7)));
}

#[test]
fn bids_through_blob_store() {
    let store = MemoryBlobStore::default();
    let bidder = FakeWallet::new(11);
    let link = match fund_bid(&bidder, BidTransport::Blob(&store)) {
        Placement::Link(link) => link,
        other => panic!("unexpected placement {:?}", other),
    };
    let bid = market::load_bid(BidSource::Blob(&store, &link)).unwrap();
    assert_eq!(bid.offered(), Currency::new(3));
    assert!(bidder.owns(&bid.transaction.coin_outputs[0].unlock_hash));
    assert!(market::load_bid(BidSource::Blob(&store, "mem://missing")).is_err());
    // the setup transaction still went out
    assert_eq!(bidder.broadcasts().len(), 1);
    assert_eq!(
        bidder.unspent_outputs(Asset::Fund).unwrap().len(),
        2,
        "reserved output and change"
    );
}

//! Property tests for the order book invariants: the book is never crossed
//! and never stores a zero-size level, no matter what update stream it sees.

use super::book::{BookAction, BookUpdate, OrderBook};
use crate::core::Side;
use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;

fn arb_side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Buy), Just(Side::Sell)]
}

fn arb_action() -> impl Strategy<Value = BookAction> {
    prop_oneof![
        Just(BookAction::Add),
        Just(BookAction::Update),
        Just(BookAction::Delete),
    ]
}

prop_compose! {
    fn arb_update()(
        side in arb_side(),
        action in arb_action(),
        // Prices in [90.00, 110.00] in cents, sizes in [0, 50]
        price_cents in 9_000u64..=11_000,
        size in 0u64..=50,
    ) -> (Side, BookAction, Decimal, Decimal) {
        (side, action, Decimal::new(price_cents as i64, 2), Decimal::from(size))
    }
}

proptest! {
    #[test]
    fn book_never_crossed_and_no_zero_levels(updates in prop::collection::vec(arb_update(), 1..200)) {
        let mut book = OrderBook::new("PROP", "SIM");
        let now = Utc::now();
        for (side, action, price, size) in updates {
            let seq = book.sequence_number() + 1;
            // Crossing updates are refused; that refusal is itself the invariant
            let _ = book.apply_update(&BookUpdate {
                side,
                price,
                size,
                action,
                sequence: seq,
                timestamp: now,
            });

            if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
                prop_assert!(bid.price < ask.price, "book crossed: {} >= {}", bid.price, ask.price);
            }
            prop_assert!(book.bid_levels().all(|l| l.size > Decimal::ZERO));
            prop_assert!(book.ask_levels().all(|l| l.size > Decimal::ZERO));
        }
    }

    #[test]
    fn sorted_views_match_side_semantics(updates in prop::collection::vec(arb_update(), 1..100)) {
        let mut book = OrderBook::new("PROP", "SIM");
        let now = Utc::now();
        for (side, action, price, size) in updates {
            let seq = book.sequence_number() + 1;
            let _ = book.apply_update(&BookUpdate { side, price, size, action, sequence: seq, timestamp: now });
        }
        let bids: Vec<_> = book.bid_levels().map(|l| l.price).collect();
        let asks: Vec<_> = book.ask_levels().map(|l| l.price).collect();
        prop_assert!(bids.windows(2).all(|w| w[0] > w[1]), "bids not descending");
        prop_assert!(asks.windows(2).all(|w| w[0] < w[1]), "asks not ascending");
    }
}

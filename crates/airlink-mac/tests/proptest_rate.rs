//! Property-based tests for the rate adaptation strategies.
//!
//! Mode selection must be a pure function of the feedback snapshot: asking
//! twice gives the same answer and never moves the strategy's current mode.
//! Every answer must come from the configured table.

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use airlink_mac::phy_mode::RateTable;
use airlink_mac::rate::{create_strategy, LinkFeedback, RateConfig, StrategyKind};

// ─── Strategies ──────────────────────────────────────────────────────────────

fn strategy_kind() -> impl Strategy<Value = StrategyKind> {
    prop_oneof![
        Just(StrategyKind::Arf),
        Just(StrategyKind::Per),
        Just(StrategyKind::Sinr),
        Just(StrategyKind::Opportunistic),
        Just(StrategyKind::Constant),
        Just(StrategyKind::ConstantLow),
        Just(StrategyKind::SinrWithMimo),
        Just(StrategyKind::PerWithMimo),
        Just(StrategyKind::ArfWithMimo),
        Just(StrategyKind::OpportunisticWithMimo),
    ]
}

fn feedback() -> impl Strategy<Value = LinkFeedback> {
    (
        0u64..10_000,
        prop::option::of(0.0f64..=1.0),
        0u32..200,
        prop::option::of(-10.0f64..45.0),
        1u8..=4,
        1u8..=4,
    )
        .prop_map(|(now_ms, per, successes, peer_sinr_db, local, peer)| LinkFeedback {
            now: Duration::from_millis(now_ms),
            per,
            successes,
            peer_sinr_db,
            local_antennas: local,
            peer_antennas: peer,
        })
}

// ─── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn selection_is_pure(
        kind in strategy_kind(),
        initial_mcs in 0usize..8,
        attempt in 1u32..8,
        fb in feedback(),
    ) {
        let table = Arc::new(RateTable::ieee80211n());
        let config = RateConfig {
            strategy: kind,
            initial_mcs,
            local_antennas: fb.local_antennas,
            ..RateConfig::default()
        };
        let strategy = create_strategy(&config, &table, fb.max_streams());
        let current = strategy.current_phy_mode();

        let first = strategy.phy_mode(attempt, &fb);
        let second = strategy.phy_mode(attempt, &fb);
        prop_assert_eq!(first, second);
        prop_assert_eq!(strategy.current_phy_mode(), current);

        if let Some(sinr) = fb.peer_sinr_db {
            let a = strategy.phy_mode_with_quality(attempt, sinr, &fb);
            let b = strategy.phy_mode_with_quality(attempt, sinr, &fb);
            prop_assert_eq!(a, b);
            prop_assert_eq!(strategy.current_phy_mode(), current);
        }

        prop_assert!(table.index_of(&first).is_some(), "{} not in table", first);
        prop_assert!(first.spatial_streams() >= 1);
    }

    #[test]
    fn more_retransmissions_never_speed_up_sinr(
        sinr in -5.0f64..40.0,
        attempt in 1u32..7,
    ) {
        let table = Arc::new(RateTable::ieee80211a());
        let config = RateConfig {
            strategy: StrategyKind::Sinr,
            ..RateConfig::default()
        };
        let strategy = create_strategy(&config, &table, 1);
        let fb = LinkFeedback {
            peer_sinr_db: Some(sinr),
            ..LinkFeedback::empty(Duration::ZERO)
        };
        let now = strategy.phy_mode_with_quality(attempt, sinr, &fb);
        let later = strategy.phy_mode_with_quality(attempt + 1, sinr, &fb);
        prop_assert!(later.data_bits_per_symbol() <= now.data_bits_per_symbol());
    }

    #[test]
    fn constant_ignores_feedback(fb in feedback(), attempt in 1u32..8, mcs in 0usize..8) {
        let table = Arc::new(RateTable::ieee80211a());
        let config = RateConfig {
            strategy: StrategyKind::Constant,
            constant_mcs: mcs,
            ..RateConfig::default()
        };
        let strategy = create_strategy(&config, &table, 1);
        prop_assert_eq!(strategy.phy_mode(attempt, &fb), table.phy_mode(mcs, 1));
    }
}

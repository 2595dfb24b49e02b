//! Liquidation flow tests: close factors, price/bonus arithmetic, collateral
//! clamping, and the reuse of the repay/withdraw paths for both legs.

use peerlend_engine::testing::{MockOracle, MockPool, RecordingRewards};
use peerlend_engine::PeerLendEngine;
use peerlend_types::{
    EngineConfig, MarketParams, PauseStatuses, PeerlendError, UserId,
};
use rust_decimal::Decimal;

type Engine = PeerLendEngine<MockPool, MockOracle, RecordingRewards>;

fn dec(n: i64) -> Decimal {
    Decimal::new(n, 0)
}

/// Default mock reserve: LTV 80%, liquidation threshold 85%, bonus 5%.
const BONUS: &str = "1.05";

/// An engine with a borrower holding 1_000 WETH collateral (price 1) and a
/// 700 USDC pool-side debt.
fn engine_with_borrower() -> (Engine, UserId) {
    let mut engine = PeerLendEngine::new(
        EngineConfig::default(),
        MockPool::new(),
        MockOracle::new(),
        RecordingRewards::new(),
    );
    engine.create_market("USDC", MarketParams::default()).unwrap();
    engine.create_market("WETH", MarketParams::default()).unwrap();

    let borrower = UserId::new();
    engine
        .supply_collateral("WETH", dec(1_000), borrower)
        .unwrap();
    engine
        .borrow("USDC", dec(700), borrower, borrower, None)
        .unwrap();
    (engine, borrower)
}

fn bonus() -> Decimal {
    BONUS.parse().unwrap()
}

#[test]
fn healthy_borrower_cannot_be_liquidated() {
    let (mut engine, borrower) = engine_with_borrower();

    // Health factor: 1_000 * 0.85 / 700 > 1.
    assert!(engine.health_factor(&borrower).unwrap() > Decimal::ONE);

    let err = engine
        .liquidate("USDC", "WETH", borrower, dec(100))
        .unwrap_err();
    assert!(matches!(err, PeerlendError::LiquidationNotAllowed { .. }));
}

#[test]
fn mildly_unhealthy_position_closes_at_half() {
    let (mut engine, borrower) = engine_with_borrower();

    // Collateral at 0.82: max debt 697 < 700, health factor ~0.996 — above
    // the full-close floor, so the default 50% close factor applies.
    let price = Decimal::new(82, 2);
    engine.oracle_mut().set_price("WETH", price);
    let health_factor = engine.health_factor(&borrower).unwrap();
    assert!(health_factor < Decimal::ONE);
    assert!(health_factor >= Decimal::new(95, 2));

    let receipt = engine
        .liquidate("USDC", "WETH", borrower, dec(1_000))
        .unwrap();

    assert_eq!(receipt.repaid, dec(350));
    let expected_seized = (dec(350) * bonus() / price).round_dp(18);
    assert_eq!(receipt.seized, expected_seized);
    assert_eq!(receipt.repay.repaid_on_pool, dec(350));
    assert_eq!(engine.borrow_balance("USDC", &borrower), dec(350));
    assert_eq!(
        engine.collateral_balance("WETH", &borrower),
        dec(1_000) - expected_seized
    );
}

#[test]
fn deeply_unhealthy_position_closes_in_full_and_clamps_to_collateral() {
    let (mut engine, borrower) = engine_with_borrower();

    // Collateral at 0.5: health factor ~0.61, below the full-close floor.
    let price = Decimal::new(5, 1);
    engine.oracle_mut().set_price("WETH", price);

    let receipt = engine
        .liquidate("USDC", "WETH", borrower, dec(10_000))
        .unwrap();

    // Full close would seize 700 * 1.05 / 0.5 = 1_470 units, clamped to the
    // 1_000 available; the repaid debt is recomputed from the seized amount.
    assert_eq!(receipt.seized, dec(1_000));
    let expected_repaid = (dec(1_000) * price / bonus()).round_dp(18);
    assert_eq!(receipt.repaid, expected_repaid);

    // The collateral bucket is emptied and its membership dropped: a second
    // liquidation no longer finds the borrower in the collateral market.
    assert_eq!(
        engine.scaled_collateral("WETH", &borrower),
        Decimal::ZERO
    );
    let err = engine
        .liquidate("USDC", "WETH", borrower, dec(100))
        .unwrap_err();
    assert!(matches!(err, PeerlendError::UserNotInMarket { .. }));
}

#[test]
fn deprecated_market_allows_full_close_of_healthy_positions() {
    let (mut engine, borrower) = engine_with_borrower();
    engine
        .set_pause_statuses(
            "USDC",
            PauseStatuses {
                deprecated: true,
                ..PauseStatuses::default()
            },
        )
        .unwrap();

    assert!(engine.health_factor(&borrower).unwrap() > Decimal::ONE);
    let receipt = engine
        .liquidate("USDC", "WETH", borrower, dec(10_000))
        .unwrap();

    // Full close factor despite the healthy position.
    assert_eq!(receipt.repaid, dec(700));
    assert_eq!(engine.borrow_balance("USDC", &borrower), Decimal::ZERO);
}

#[test]
fn liquidating_a_non_participant_is_rejected() {
    let (mut engine, _) = engine_with_borrower();
    let bystander = UserId::new();
    let err = engine
        .liquidate("USDC", "WETH", bystander, dec(100))
        .unwrap_err();
    assert!(matches!(err, PeerlendError::UserNotInMarket { .. }));
}

#[test]
fn paused_liquidation_is_rejected() {
    let (mut engine, borrower) = engine_with_borrower();
    engine
        .set_pause_statuses(
            "WETH",
            PauseStatuses {
                liquidate: true,
                ..PauseStatuses::default()
            },
        )
        .unwrap();
    engine.oracle_mut().set_price("WETH", Decimal::new(5, 1));

    let err = engine
        .liquidate("USDC", "WETH", borrower, dec(100))
        .unwrap_err();
    assert!(matches!(err, PeerlendError::OperationPaused { .. }));
}

#[test]
fn liquidation_repay_leg_uses_delta_fallback() {
    let (mut engine, borrower) = engine_with_borrower();

    // Match the borrower peer-to-peer before the price drop.
    let supplier = UserId::new();
    engine.supply("USDC", dec(700), supplier, None).unwrap();
    assert_eq!(engine.scaled_p2p_borrow("USDC", &borrower), dec(700));

    engine.oracle_mut().set_price("WETH", Decimal::new(82, 2));
    let receipt = engine
        .liquidate("USDC", "WETH", borrower, dec(350))
        .unwrap();

    // The debt leg ran with a zero iteration budget: nothing was demoted,
    // the freed liquidity rests in the pool behind the supply delta.
    assert_eq!(receipt.repaid, dec(350));
    assert_eq!(receipt.repay.repaid_p2p, dec(350));
    assert_eq!(receipt.repay.resupplied_to_pool, dec(350));
    let market = engine.market("USDC").unwrap();
    assert_eq!(market.deltas.supply.scaled_delta_pool, dec(350));
    assert_eq!(engine.scaled_p2p_supply("USDC", &supplier), dec(700));
}

#[test]
fn oracle_failure_aborts_liquidation() {
    let (mut engine, borrower) = engine_with_borrower();
    engine.oracle_mut().set_price("WETH", Decimal::ZERO);

    let err = engine
        .liquidate("USDC", "WETH", borrower, dec(100))
        .unwrap_err();
    assert!(matches!(err, PeerlendError::PriceUnavailable(_)));
    assert_eq!(engine.borrow_balance("USDC", &borrower), dec(700));
}

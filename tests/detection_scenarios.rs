mod common;

use common::{Harness, config, minute_ticks, patterns, pivots, prices};
use rust_decimal_macros::dec;
use std::sync::Arc;
use swingscope::application::detection::pivot_detector::PivotDetector;
use swingscope::config::PivotConfig;
use swingscope::domain::detection::pattern::PatternType;
use swingscope::domain::detection::pivot::{PivotKind, PivotTransition};
use swingscope::domain::events::EventKind;
use swingscope::domain::market::bucketing::Bucket;
use swingscope::domain::market::candle::Candle;
use swingscope::domain::market::timeframe::{MINUTE_MS, Timeframe};
use swingscope::infrastructure::InMemoryEntityStore;

fn flat_candle(i: i64, price: rust_decimal::Decimal) -> Candle {
    Candle::opening(
        common::SYMBOL,
        Timeframe::ONE_MIN,
        Bucket {
            start: i * MINUTE_MS,
            end: (i + 1) * MINUTE_MS,
        },
        price,
        10,
    )
    .into_closed()
}

#[test]
fn test_low_at_8_confirms_only_after_candle_13_closes() {
    let mut detector = PivotDetector::new(common::SYMBOL, Timeframe::ONE_MIN, PivotConfig::new(1, 1));
    let series = prices(&[10, 12, 9, 11, 8, 13]);

    let mut confirmed_low_8_at = None;
    for (i, price) in series.iter().enumerate() {
        for t in detector.on_candle(i as u64, &flat_candle(i as i64, *price)) {
            if let PivotTransition::Confirmed(p) = t
                && p.kind == PivotKind::Low
                && p.price == dec!(8)
            {
                confirmed_low_8_at = Some(i);
            }
        }
        if i < 5 {
            assert!(confirmed_low_8_at.is_none(), "confirmed too early at {}", i);
        }
    }
    assert_eq!(confirmed_low_8_at, Some(5));
}

#[tokio::test]
async fn test_low_at_8_published_once_locked() {
    let store = Arc::new(InMemoryEntityStore::new());
    let mut h = Harness::start(&config(), store).await;

    // The tick at 13 closes the candle at 8; 12 closes the candle at 13.
    h.feed(&minute_ticks(&prices(&[10, 12, 9, 11, 8, 13]))).await;
    let before = pivots(&h.drain());
    assert!(before.iter().all(|p| p.price != dec!(8)));

    h.feed(&minute_ticks(&prices(&[10, 12, 9, 11, 8, 13, 12, 11]))[6..])
        .await;
    let after = pivots(&h.drain());
    assert!(
        after
            .iter()
            .any(|p| p.kind == PivotKind::Low && p.price == dec!(8))
    );
}

#[tokio::test]
async fn test_double_top_confirmed_once() {
    let store = Arc::new(InMemoryEntityStore::new());
    let ticks = minute_ticks(&prices(&[95, 100, 96, 90, 95, 101, 97, 89, 88]));

    let mut h = Harness::start(&config(), store.clone()).await;
    h.feed(&ticks).await;
    let events = h.drain();
    let tops = patterns(&events, PatternType::DoubleTop);

    assert_eq!(tops.len(), 1);
    let identity: Vec<_> = tops[0].identity_pivots().iter().map(|p| p.price).collect();
    assert_eq!(identity, vec![dec!(100), dec!(101)]);
    assert_eq!(tops[0].breakout_price, Some(dec!(89)));
    assert_eq!(tops[0].confirmation_time, Some(7 * MINUTE_MS));

    // Same sequence through a pipeline that never saw it: the gate suppresses all
    let mut again = Harness::cold(&config(), store).await;
    again.feed(&ticks).await;
    assert!(again.drain().is_empty());
}

#[tokio::test]
async fn test_vcp_three_contractions_then_breakout() {
    let store = Arc::new(InMemoryEntityStore::new());
    let mut h = Harness::start(&config(), store).await;

    // Legs 110-100, 108-101, 106-102; 111 breaks out above 110
    h.feed(&minute_ticks(&prices(&[
        105, 110, 104, 100, 105, 108, 103, 101, 104, 106, 103, 102, 105, 111, 112,
    ])))
    .await;
    let events = h.drain();
    let vcp = patterns(&events, PatternType::Vcp);

    assert_eq!(vcp.len(), 1);
    let ranges: Vec<_> = vcp[0]
        .pivots
        .chunks(2)
        .map(|leg| leg[0].price - leg[1].price)
        .collect();
    assert_eq!(ranges, vec![dec!(10), dec!(7), dec!(4)]);
    assert_eq!(vcp[0].breakout_price, Some(dec!(111)));
}

#[tokio::test]
async fn test_vcp_two_contractions_do_not_confirm() {
    let store = Arc::new(InMemoryEntityStore::new());
    let mut h = Harness::start(&config(), store).await;

    h.feed(&minute_ticks(&prices(&[
        105, 110, 104, 100, 105, 108, 103, 101, 104, 112, 113,
    ])))
    .await;
    assert!(patterns(&h.drain(), PatternType::Vcp).is_empty());
}

#[tokio::test]
async fn test_published_pivots_alternate_and_never_retracted() {
    let series = common::walk(600, 7);

    // Every retracted identity, straight from a detector on the same candles
    let mut detector = PivotDetector::new(common::SYMBOL, Timeframe::ONE_MIN, PivotConfig::new(1, 1));
    let mut retracted = std::collections::HashSet::new();
    for (i, price) in series.iter().enumerate() {
        for t in detector.on_candle(i as u64, &flat_candle(i as i64, *price)) {
            if let PivotTransition::Retracted(p) = t {
                retracted.insert(p.identity_key());
            }
        }
    }
    assert!(!retracted.is_empty());

    let store = Arc::new(InMemoryEntityStore::new());
    let mut h = Harness::start(&config(), store).await;
    h.feed(&minute_ticks(&series)).await;
    let published = pivots(&h.drain());

    assert!(published.len() > 10);
    for pair in published.windows(2) {
        assert_ne!(pair[0].kind, pair[1].kind, "two {} in a row", pair[0].kind);
        assert!(pair[0].time < pair[1].time);
    }
    for pivot in &published {
        assert!(!retracted.contains(&pivot.identity_key()));
    }
}

#[tokio::test]
async fn test_replaying_stream_emits_nothing_new() {
    let store = Arc::new(InMemoryEntityStore::new());
    let ticks = minute_ticks(&common::walk(300, 11));

    let mut first = Harness::start(&config(), store.clone()).await;
    first.feed(&ticks).await;
    first.pipeline.flush().await.unwrap();
    let events = first.drain();
    assert!(events.iter().any(|e| e.kind == EventKind::PivotConfirmed));

    // Same pipeline: everything is below the watermark
    first.feed(&ticks).await;
    assert!(first.drain().is_empty());

    // Fresh pipeline, no watermark: the identity gate catches everything
    let mut second = Harness::cold(&config(), store).await;
    second.feed(&ticks).await;
    second.pipeline.flush().await.unwrap();
    assert!(second.drain().is_empty());
}

#[tokio::test]
async fn test_resampled_candles_match_direct_aggregation() {
    use swingscope::application::market_data::tick_aggregator::TickAggregator;
    use swingscope::domain::market::bucketing::BucketClock;
    use swingscope::domain::market::tick::Tick;

    let mut config = config();
    config.aggregation.timeframes = vec![Timeframe::ONE_MIN, Timeframe::FIFTEEN_MIN];

    // Several ticks per minute over 90 minutes
    let walk = common::walk(90 * 6, 3);
    let ticks: Vec<Tick> = walk
        .iter()
        .enumerate()
        .map(|(i, p)| Tick::new(common::SYMBOL, i as i64 * 10_000, *p, (i % 7) as u64 + 1))
        .collect();

    let store = Arc::new(InMemoryEntityStore::new());
    let mut h = Harness::start(&config, store).await;
    h.feed(&ticks).await;
    h.pipeline.flush().await.unwrap();
    let resampled: Vec<Candle> = common::candles(&h.drain())
        .into_iter()
        .filter(|c| c.timeframe == Timeframe::FIFTEEN_MIN)
        .collect();

    let mut direct = TickAggregator::new(
        common::SYMBOL,
        Timeframe::FIFTEEN_MIN,
        BucketClock::utc(),
        2_000,
    );
    let mut expected = Vec::new();
    for tick in &ticks {
        if let Some(c) = direct.ingest(tick).unwrap() {
            expected.push(c);
        }
    }
    expected.extend(direct.flush());

    assert_eq!(resampled.len(), 6);
    assert_eq!(resampled, expected);
}

#[tokio::test]
async fn test_bars_and_ticks_emit_the_same_identities() {
    use swingscope::domain::market::candle::HistoricalBar;

    let series = common::walk(240, 5);

    let mut from_ticks = Harness::start(&config(), Arc::new(InMemoryEntityStore::new())).await;
    from_ticks.feed(&minute_ticks(&series)).await;
    from_ticks.pipeline.flush().await.unwrap();
    let mut tick_keys = common::keys(&from_ticks.drain());

    let bars: Vec<HistoricalBar> = series
        .iter()
        .enumerate()
        .map(|(i, p)| HistoricalBar {
            symbol: common::SYMBOL.to_string(),
            timeframe: Timeframe::ONE_MIN,
            bucket_start: i as i64 * MINUTE_MS,
            open: *p,
            high: *p,
            low: *p,
            close: *p,
            volume: 10,
        })
        .collect();
    let mut from_bars = Harness::start(&config(), Arc::new(InMemoryEntityStore::new())).await;
    let accepted = from_bars.pipeline.on_bars(bars).await.unwrap();
    let mut bar_keys = common::keys(&from_bars.drain());

    assert_eq!(accepted, 240);
    assert!(tick_keys.len() > 240);
    tick_keys.sort_by(|a, b| a.1.cmp(&b.1));
    bar_keys.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(tick_keys, bar_keys);
}

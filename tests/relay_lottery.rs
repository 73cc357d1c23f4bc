//! Scenario 3 (spec §8): weighted relay draw frequencies match the
//! configured reputation weights within chi-squared p>0.01 over 10,000
//! draws.

#![cfg(feature = "vrf")]

use std::net::SocketAddr;

use fogmix::lottery::{LotteryEntry, RelayLottery};

fn entries() -> Vec<LotteryEntry> {
    vec![
        LotteryEntry {
            address: "127.0.0.1:9001".parse().unwrap(),
            reputation_score: 200.0,
            age_days: 30,
        },
        LotteryEntry {
            address: "127.0.0.1:9002".parse().unwrap(),
            reputation_score: 100.0,
            age_days: 30,
        },
        LotteryEntry {
            address: "127.0.0.1:9003".parse().unwrap(),
            reputation_score: 100.0,
            age_days: 30,
        },
    ]
}

#[test]
fn weighted_draw_frequencies_match_expected_distribution() {
    let lottery = RelayLottery::new(0.0);
    let candidates = entries();
    let addresses: Vec<SocketAddr> = candidates.iter().map(|c| c.address).collect();

    let draws = 10_000u64;
    let mut counts = [0u64; 3];
    for circuit_id in 0..draws {
        let (selected, _) = lottery.draw(&candidates, circuit_id, 0).unwrap();
        let idx = addresses.iter().position(|a| *a == selected).unwrap();
        counts[idx] += 1;
    }

    // Weights 200:100:100 normalize to 0.5:0.25:0.25.
    let expected = [draws as f64 * 0.5, draws as f64 * 0.25, draws as f64 * 0.25];
    let chi_squared: f64 = counts
        .iter()
        .zip(expected.iter())
        .map(|(&observed, &expected)| (observed as f64 - expected).powi(2) / expected)
        .sum();

    // Critical value for df=2 (3 categories) at p=0.01 is 9.21.
    assert!(
        chi_squared < 9.21,
        "chi-squared {chi_squared} exceeds the p>0.01 critical value; counts={counts:?}"
    );
}

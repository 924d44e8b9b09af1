use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use matchday_edge::config::FusionConfig;
use matchday_edge::ensemble::{self, ModelPrediction, Strategy};

fn random_vector(rng: &mut StdRng) -> (f64, f64, f64) {
    let raw: [f64; 3] = [
        rng.gen_range(0.01..1.0),
        rng.gen_range(0.01..1.0),
        rng.gen_range(0.01..1.0),
    ];
    let sum: f64 = raw.iter().sum();
    (raw[0] / sum, raw[1] / sum, raw[2] / sum)
}

/// Models scattered around a clear home favourite.
fn agreeing_vector(rng: &mut StdRng, favourite: f64) -> (f64, f64, f64) {
    let home = favourite + rng.gen_range(-0.01..0.01);
    let draw = (1.0 - home) * rng.gen_range(0.45..0.55);
    (home, draw, 1.0 - home - draw)
}

fn models(fixture_id: u64, vectors: &[(f64, f64, f64)]) -> Vec<ModelPrediction> {
    vectors
        .iter()
        .enumerate()
        .map(|(i, (h, d, a))| ModelPrediction::new(fixture_id, format!("m{i}"), *h, *d, *a))
        .collect()
}

#[test]
fn fused_probabilities_always_sum_to_one() {
    let cfg = FusionConfig::default();
    let mut rng = StdRng::seed_from_u64(2025);
    let mut seen = HashSet::new();

    for fixture_id in 0..3_000u64 {
        let count = rng.gen_range(1..=6);
        let vectors: Vec<_> = if fixture_id % 3 == 0 {
            let favourite = rng.gen_range(0.55..0.70);
            (0..count.max(3))
                .map(|_| agreeing_vector(&mut rng, favourite))
                .collect()
        } else {
            (0..count).map(|_| random_vector(&mut rng)).collect()
        };

        let fused = ensemble::fuse(fixture_id, &models(fixture_id, &vectors), &cfg).unwrap();
        let p = fused.probabilities;
        assert!(
            (p.home + p.draw + p.away - 1.0).abs() < 1e-6,
            "fixture {fixture_id}: {p:?}"
        );
        assert!([p.home, p.draw, p.away].iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((0.0..=1.0).contains(&fused.consensus));
        assert!(fused.consensus > 0.0 || fused.strategy == Strategy::EnsembleAverage);
        seen.insert(fused.strategy);
    }

    assert!(seen.contains(&Strategy::EnsembleAverage));
    assert!(seen.contains(&Strategy::HighestConfidenceWithConsensus));
    assert!(seen.contains(&Strategy::HighestConfidence));
}

use approx::assert_abs_diff_eq;
use ndarray::{Array2, Array3};
use proptest::prelude::*;
use seqloss::{LossError, MaskedNllLoss, NllLossConfig, Tensor};

const PAD: i64 = -1;

/// Deterministic log-probabilities for a `[batch, seq_len, classes]` batch.
fn log_probs(batch: usize, seq_len: usize, classes: usize, seed: u32) -> Array3<f32> {
    let mut out = Array3::zeros((batch, seq_len, classes));
    for b in 0..batch {
        for t in 0..seq_len {
            let logits: Vec<f32> = (0..classes)
                .map(|c| (((b * 31 + t * 7 + c) as f32 + seed as f32) * 0.37).sin() * 3.0)
                .collect();
            let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let lse = logits.iter().map(|&x| (x - max).exp()).sum::<f32>().ln() + max;
            for c in 0..classes {
                out[[b, t, c]] = logits[c] - lse;
            }
        }
    }
    out
}

fn targets_from(raw: &[i64], batch: usize, seq_len: usize, classes: usize) -> Array2<i64> {
    Array2::from_shape_fn((batch, seq_len), |(b, t)| {
        let v = raw[(b * seq_len + t) % raw.len()];
        if v < 0 {
            PAD
        } else {
            v % classes as i64
        }
    })
}

fn masked_sum(preds: &Array3<f32>, targets: &Array2<i64>) -> f32 {
    let mut sum = 0.0;
    for ((b, t), &target) in targets.indexed_iter() {
        if target != PAD {
            sum -= preds[[b, t, target as usize]];
        }
    }
    sum
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn loss_is_finite_and_non_negative(
        batch in 1..4usize,
        seq_len in 1..6usize,
        classes in 2..8usize,
        raw in prop::collection::vec(-3i64..8, 1..24),
        seed in 0..1000u32,
        normalize in any::<bool>(),
    ) {
        let mut targets = targets_from(&raw, batch, seq_len, classes);
        targets[[0, 0]] = 0;
        let preds = log_probs(batch, seq_len, classes, seed);
        let loss_fn = MaskedNllLoss::new(classes, PAD).with_normalize_length(normalize);

        let loss = loss_fn
            .compute(&Tensor::from_data(preds.into_dyn()), targets.view())
            .unwrap()
            .item();
        prop_assert!(loss.is_finite());
        prop_assert!(loss >= 0.0);
    }

    #[test]
    fn appending_padding_row_is_invariant_under_length_normalization(
        batch in 1..4usize,
        seq_len in 1..6usize,
        classes in 2..8usize,
        raw in prop::collection::vec(-3i64..8, 1..24),
        seed in 0..1000u32,
    ) {
        let mut targets = targets_from(&raw, batch, seq_len, classes);
        targets[[0, 0]] = 0;
        let preds = log_probs(batch, seq_len, classes, seed);
        let loss_fn = MaskedNllLoss::new(classes, PAD).with_normalize_length(true);

        let base = loss_fn
            .compute(&Tensor::from_data(preds.clone().into_dyn()), targets.view())
            .unwrap()
            .item();

        let extra = log_probs(1, seq_len, classes, seed + 1);
        let padded_preds = ndarray::concatenate![ndarray::Axis(0), preds, extra];
        let padded_targets = ndarray::concatenate![
            ndarray::Axis(0),
            targets,
            Array2::from_elem((1, seq_len), PAD)
        ];
        let padded = loss_fn
            .compute(&Tensor::from_data(padded_preds.into_dyn()), padded_targets.view())
            .unwrap()
            .item();

        prop_assert!((base - padded).abs() <= 1e-5 * base.abs().max(1.0));
    }

    #[test]
    fn normalization_switch_selects_denominator(
        batch in 1..4usize,
        seq_len in 1..6usize,
        classes in 2..8usize,
        raw in prop::collection::vec(-3i64..8, 1..24),
        seed in 0..1000u32,
    ) {
        let mut targets = targets_from(&raw, batch, seq_len, classes);
        targets[[0, 0]] = 1;
        let preds = log_probs(batch, seq_len, classes, seed);
        let expected_sum = masked_sum(&preds, &targets);
        let total = targets.iter().filter(|&&t| t != PAD).count() as f32;

        let by_batch = MaskedNllLoss::new(classes, PAD);
        let out = by_batch
            .forward_with_stats(&Tensor::from_data(preds.clone().into_dyn()), targets.view())
            .unwrap();
        prop_assert_eq!(out.stats.total as f32, total);
        prop_assert!((out.loss.item() - expected_sum / batch as f32).abs() <= 1e-4);

        let by_length = by_batch.with_normalize_length(true);
        let loss = by_length
            .compute(&Tensor::from_data(preds.into_dyn()), targets.view())
            .unwrap()
            .item();
        prop_assert!((loss - expected_sum / total).abs() <= 1e-4);
    }

    #[test]
    fn class_dimension_mismatch_always_fails(
        size in 1..10usize,
        classes in 1..10usize,
    ) {
        prop_assume!(size != classes);
        let loss_fn = MaskedNllLoss::new(size, PAD);
        let preds = Tensor::zeros(vec![2, 3, classes]);
        let targets = Array2::<i64>::zeros((2, 3));
        let err = loss_fn.compute(&preds, targets.view()).unwrap_err();
        let is_mismatch = matches!(
            err,
            LossError::ClassDimMismatch { expected, actual } if expected == size && actual == classes
        );
        prop_assert!(is_mismatch);
    }
}

#[test]
fn gradient_step_lowers_loss_on_real_tokens() {
    let config = NllLossConfig::from_json_str(
        r#"{ "size": 6, "padding_idx": -1, "normalize_length": true, "criterion": "log_softmax_nll" }"#,
    )
    .unwrap();
    let loss_fn = config.build().unwrap();
    let targets = ndarray::array![[1_i64, 4, 2, -1], [5, 0, -1, -1]];

    let logits = Tensor::rand(vec![2, 4, 6], -0.1, 0.1);
    let before = loss_fn.compute(&logits, targets.view()).unwrap();
    let before_value = before.item();
    before.backward();

    let grad = logits.grad().unwrap();
    let stepped = &*logits.data() - &(&*grad.data() * 0.5);
    let after = loss_fn
        .compute(&Tensor::from_data(stepped), targets.view())
        .unwrap()
        .item();

    assert!(after < before_value);
    // Padded positions never receive gradient.
    for &(b, t) in &[(0usize, 3usize), (1, 2), (1, 3)] {
        for c in 0..6 {
            assert_eq!(grad.data()[[b, t, c]], 0.0);
        }
    }
}

#[test]
fn all_padding_batch_documents_non_finite_result() {
    let loss_fn = MaskedNllLoss::new(3, PAD).with_normalize_length(true);
    let preds = Tensor::from_data(log_probs(1, 2, 3, 0).into_dyn());
    let loss = loss_fn
        .compute(&preds, ndarray::array![[PAD, PAD]].view())
        .unwrap();
    assert!(loss.item().is_nan());
}

#[test]
fn padding_positions_do_not_affect_loss_value() {
    let loss_fn = MaskedNllLoss::new(4, PAD).with_normalize_length(true);
    let targets = ndarray::array![[2_i64, PAD, 1]];
    let mut preds = log_probs(1, 3, 4, 11);
    let base = loss_fn
        .compute(&Tensor::from_data(preds.clone().into_dyn()), targets.view())
        .unwrap()
        .item();

    // Arbitrary garbage in the padded step.
    preds.slice_mut(ndarray::s![0, 1, ..]).fill(-1e6);
    let scrambled = loss_fn
        .compute(&Tensor::from_data(preds.into_dyn()), targets.view())
        .unwrap()
        .item();
    assert_abs_diff_eq!(base, scrambled, epsilon = 1e-6);
}

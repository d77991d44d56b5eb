//! End-to-end training scenarios.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dataset::Dataset;
use crate::interface::model_file;
use crate::kernels::KernelKind;
use crate::model::Model;
use crate::semiparametric::{self, CentroidSelection, SemiparametricIrwls};
use crate::{E, Status, TrainHooks, TrainProperties, full};

fn separable_pair() -> Dataset {
    Dataset::labeled(&[
        (1.0, vec![(1, 1.0)]),
        (1.0, vec![(1, 2.0)]),
        (-1.0, vec![(1, -1.0)]),
        (-1.0, vec![(1, -2.0)]),
    ])
}

fn xor() -> Dataset {
    Dataset::labeled(&[
        (1.0, vec![(1, 1.0), (2, 1.0)]),
        (1.0, vec![(1, -1.0), (2, -1.0)]),
        (-1.0, vec![(1, 1.0), (2, -1.0)]),
        (-1.0, vec![(1, -1.0), (2, 1.0)]),
    ])
}

#[test]
fn linearly_separable_pair_trains_to_full_accuracy() {
    let dataset = separable_pair();
    let props = TrainProperties::default()
        .with_kernel(KernelKind::Linear)
        .with_working_set_size(4)
        .with_eta(1e-3);
    let outcome = full::train_full(
        &dataset,
        &props,
        &mut TrainHooks::silent(),
        &mut StdRng::seed_from_u64(0),
    )
    .unwrap();
    let model = Model::from_full(&dataset, &props, &outcome.beta);

    // At least one support vector per class.
    let positive_sv = (0..dataset.len())
        .any(|i| dataset.label(i) > 0.0 && outcome.beta[i] != 0.0);
    let negative_sv = (0..dataset.len())
        .any(|i| dataset.label(i) < 0.0 && outcome.beta[i] != 0.0);
    assert!(positive_sv && negative_sv);

    // Training accuracy 1.0.
    let predictions = model.predict(&dataset, 1);
    assert_eq!(
        Model::accuracy(&predictions, &dataset.labels()[..dataset.len()]),
        1.0
    );

    // Fresh points classify by side.
    let fresh = Dataset::unlabeled(&[vec![(1, 3.0)], vec![(1, -3.0)]]);
    let fresh_predictions = model.predict(&fresh, 1);
    assert!(fresh_predictions[0] > 0.0);
    assert!(fresh_predictions[1] < 0.0);
}

#[test]
fn xor_with_rbf_kernel_is_separated() {
    let dataset = xor();
    let props = TrainProperties::default()
        .with_gamma(1.0)
        .with_c(10.0)
        .with_working_set_size(4);
    let outcome = full::train_full(
        &dataset,
        &props,
        &mut TrainHooks::silent(),
        &mut StdRng::seed_from_u64(0),
    )
    .unwrap();
    let model = Model::from_full(&dataset, &props, &outcome.beta);

    let predictions = model.predict(&dataset, 1);
    assert_eq!(
        Model::accuracy(&predictions, &dataset.labels()[..dataset.len()]),
        1.0
    );
    assert!(model.len() >= 3);
    // The four points are fully symmetric, so the separator needs no
    // offset.
    assert!(model.bias().abs() < 1e-6);
}

fn uniform_cube(n: usize, dim: i32, flip_rate: f64, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let rows: Vec<(E, Vec<(i32, E)>)> = (0..n)
        .map(|_| {
            let features: Vec<(i32, E)> = (1..=dim)
                .map(|d| (d, rng.random_range(-1.0..1.0)))
                .collect();
            let mut label = if features[0].1 > 0.0 { 1.0 } else { -1.0 };
            if flip_rate > 0.0 && rng.random_range(0.0..1.0) < flip_rate {
                label = -label;
            }
            (label, features)
        })
        .collect();
    Dataset::labeled(&rows)
}

#[test]
fn sgma_selection_is_reproducible() {
    let dataset = uniform_cube(200, 10, 0.0, 42);
    let props = TrainProperties::default()
        .with_model_size(8)
        .with_selection(CentroidSelection::Sgma);

    let select = || {
        semiparametric::sgma::select(
            &dataset,
            &props,
            &crate::linalg::blas::Backend::default(),
            &mut StdRng::seed_from_u64(0),
        )
        .unwrap()
    };
    let first = select();
    let second = select();
    assert_eq!(first, second);
    assert_eq!(first.len(), 8);
    assert_eq!(&first[..2], &[dataset.len(), dataset.len() + 1]);
}

#[test]
fn semiparametric_matches_full_on_tiny_data() {
    let dataset = separable_pair();

    let full_props = TrainProperties::default()
        .with_kernel(KernelKind::Linear)
        .with_working_set_size(4);
    let outcome = full::train_full(
        &dataset,
        &full_props,
        &mut TrainHooks::silent(),
        &mut StdRng::seed_from_u64(0),
    )
    .unwrap();
    let full_model = Model::from_full(&dataset, &full_props, &outcome.beta);

    // The semiparametric path needs the RBF kernel for SGMA scoring.
    let semi_props = TrainProperties::default()
        .with_model_size(4)
        .with_selection(CentroidSelection::Sgma);
    let (semi_outcome, centroids) = SemiparametricIrwls::new(&dataset, &semi_props)
        .unwrap()
        .solve(&mut TrainHooks::silent(), &mut StdRng::seed_from_u64(0))
        .unwrap();
    let semi_model =
        Model::from_semiparametric(&dataset, &semi_props, &semi_outcome.beta, &centroids);

    let held_out = Dataset::unlabeled(&[vec![(1, 3.0)], vec![(1, -3.0)]]);
    for data in [&dataset, &held_out] {
        let full_predictions = full_model.predict(data, 1);
        let semi_predictions = semi_model.predict(data, 1);
        for (f, s) in full_predictions.iter().zip(&semi_predictions) {
            assert_eq!(*f > 0.0, *s > 0.0, "models disagree: {f} vs {s}");
        }
    }
}

#[test]
fn noisy_training_stops_at_the_stall_guard() {
    let dataset = uniform_cube(1000, 10, 0.3, 7);
    let props = TrainProperties::default()
        .with_working_set_size(200)
        .with_eta(1e-6);
    let outcome = full::train_full(
        &dataset,
        &props,
        &mut TrainHooks::silent(),
        &mut StdRng::seed_from_u64(0),
    )
    .unwrap();

    assert!(matches!(
        outcome.status,
        Status::Converged | Status::Stalled
    ));
    // The reported best ratio can never exceed the final one.
    assert!(outcome.best_ratio <= outcome.last_ratio || outcome.last_ratio.is_nan());
    for i in 0..dataset.len() {
        assert!(outcome.beta[i].abs() <= props.c + 1e-9);
    }
}

#[test]
fn serialized_model_round_trips_bit_identically() {
    let dataset = xor();
    let props = TrainProperties::default()
        .with_gamma(1.0)
        .with_c(10.0)
        .with_working_set_size(4);
    let outcome = full::train_full(
        &dataset,
        &props,
        &mut TrainHooks::silent(),
        &mut StdRng::seed_from_u64(0),
    )
    .unwrap();
    let model = Model::from_full(&dataset, &props, &outcome.beta);
    let before = model.predict(&dataset, 1);

    let file = tempfile::NamedTempFile::new().unwrap();
    model_file::store_to_path(&model, file.path()).unwrap();
    let reloaded = model_file::load_from_path(file.path()).unwrap();
    let after = reloaded.predict(&dataset, 1);

    // Bit-identical predictions: same bytes in, same arithmetic out.
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(b.to_bits(), a.to_bits());
    }
}

#[test]
fn libsvm_file_to_trained_model() {
    let text = "+1 1:1\n+1 1:2\n-1 1:-1\n-1 1:-2\n";
    let raw = loaders::libsvm::parse(text.as_bytes(), true).unwrap();
    let dataset = crate::interface::labeled_dataset(&raw).unwrap();
    let props = TrainProperties::default()
        .with_kernel(KernelKind::Linear)
        .with_working_set_size(4);
    let outcome = full::train_full(
        &dataset,
        &props,
        &mut TrainHooks::silent(),
        &mut StdRng::seed_from_u64(0),
    )
    .unwrap();
    let model = Model::from_full(&dataset, &props, &outcome.beta);
    let predictions = model.predict(&dataset, 2);
    assert_eq!(
        Model::accuracy(&predictions, &dataset.labels()[..dataset.len()]),
        1.0
    );
}

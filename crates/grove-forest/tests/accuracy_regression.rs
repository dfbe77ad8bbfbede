//! Accuracy regression tests for grove-forest.
//!
//! These tests verify that algorithmic changes do not degrade batch, chain
//! and online ensembles on deterministic synthetic datasets.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use grove_data::{Attribute, AttributeId, Dataset, FeatureRecord, Schema};
use grove_forest::{
    ChainConfig, ChainType, CollectorSchema, CollectorSpec, EnsembleConfig, PredictType, PredictionMode,
    QuantileConfig, SplitStrategy, TrainingMode,
};

// ---------------------------------------------------------------------------
// Helpers: deterministic synthetic datasets
// ---------------------------------------------------------------------------

const N_FEATURES: usize = 10;
const CLASS: usize = N_FEATURES;

/// `n_samples` records with 10 numeric features and a 3-class nominal target.
///
/// Features 0-2 are informative (class * 3.0 + noise in [0, 0.5]).
/// Features 3-9 are pure noise in [0, 0.5].
/// Samples are assigned round-robin across classes.
fn make_classification(n_samples: usize, seed: u64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut attributes: Vec<Attribute> = (0..N_FEATURES).map(|f| Attribute::numeric(format!("f{f}"))).collect();
    attributes.push(Attribute::nominal("class", ["c0", "c1", "c2"]));
    let schema = Schema::new(attributes);

    let records = (0..n_samples)
        .map(|i| {
            let class = i % 3;
            let mut values: Vec<f64> = (0..N_FEATURES)
                .map(|f| {
                    let base = if f < 3 { class as f64 * 3.0 } else { 0.0 };
                    base + rng.r#gen::<f64>() * 0.5
                })
                .collect();
            values.push(class as f64);
            FeatureRecord::from_values(&values)
        })
        .collect();
    Dataset::new(schema, records).unwrap()
}

fn class_collectors() -> CollectorSchema {
    CollectorSchema::new(vec![CollectorSpec::Classification {
        target: AttributeId::new(CLASS),
    }])
    .unwrap()
}

fn true_class(record: &FeatureRecord) -> f64 {
    record.value(AttributeId::new(CLASS)).unwrap()
}

/// Fraction of records whose predicted class matches, given a predictor.
fn accuracy(records: &[FeatureRecord], predict: impl Fn(&FeatureRecord) -> f64) -> f64 {
    let correct = records.iter().filter(|r| predict(r) == true_class(r)).count();
    correct as f64 / records.len() as f64
}

/// Three features in [0, 1) and three binary labels:
/// `l0 = x0 > 0.5`, `l1 = x1 > 0.5`, `l2 = l0 && l1`.
fn make_multilabel(n_samples: usize, seed: u64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let schema = Schema::new(vec![
        Attribute::numeric("x0"),
        Attribute::numeric("x1"),
        Attribute::numeric("x2"),
        Attribute::binary("l0"),
        Attribute::binary("l1"),
        Attribute::binary("l2"),
    ]);
    let records = (0..n_samples)
        .map(|_| {
            let x: [f64; 3] = [rng.r#gen(), rng.r#gen(), rng.r#gen()];
            let l0 = x[0] > 0.5;
            let l1 = x[1] > 0.5;
            let flag = |b: bool| if b { 1.0 } else { 0.0 };
            FeatureRecord::from_values(&[x[0], x[1], x[2], flag(l0), flag(l1), flag(l0 && l1)])
        })
        .collect();
    Dataset::new(schema, records).unwrap()
}

fn label_group() -> Vec<Vec<AttributeId>> {
    vec![(3..6).map(AttributeId::new).collect()]
}

// ---------------------------------------------------------------------------
// a) batch_accuracy_above_threshold
// ---------------------------------------------------------------------------

/// Held-out accuracy of a 50-tree batch ensemble must exceed 0.85.
#[test]
fn batch_accuracy_above_threshold() {
    let train = make_classification(300, 42);
    let test = make_classification(150, 7);
    let ensemble = EnsembleConfig::new(50)
        .unwrap()
        .with_seed(42)
        .fit(&train, &class_collectors())
        .unwrap();

    let acc = accuracy(test.records(), |r| ensemble.predict(r).unwrap()[0].prediction().unwrap()[0]);
    assert!(acc > 0.85, "batch accuracy {acc} <= 0.85");
}

// ---------------------------------------------------------------------------
// b) missing_informative_feature_still_predicts
// ---------------------------------------------------------------------------

/// Hiding one informative feature fans records out at its splitters; the
/// other two informative features must carry the prediction.
#[test]
fn missing_informative_feature_still_predicts() {
    let train = make_classification(300, 42);
    let test = make_classification(150, 7);
    let ensemble = EnsembleConfig::new(50)
        .unwrap()
        .fit(&train, &class_collectors())
        .unwrap();

    let hidden: Vec<FeatureRecord> = test
        .records()
        .iter()
        .map(|r| {
            let mut r = r.clone();
            r.set_missing(AttributeId::new(0));
            r
        })
        .collect();
    let acc = accuracy(&hidden, |r| ensemble.predict(r).unwrap()[0].prediction().unwrap()[0]);
    assert!(acc > 0.8, "accuracy with f0 missing {acc} <= 0.8");
}

// ---------------------------------------------------------------------------
// c) training_is_deterministic
// ---------------------------------------------------------------------------

/// The same seed yields the same ensemble in both training modes, and the
/// parallel batch prediction agrees with record-by-record prediction.
#[test]
fn training_is_deterministic() {
    let train = make_classification(120, 1);
    for mode in [TrainingMode::Sequential, TrainingMode::Parallel] {
        let config = EnsembleConfig::new(8).unwrap().with_seed(9).with_training_mode(mode);
        let a = config.fit(&train, &class_collectors()).unwrap();
        let b = config.fit(&train, &class_collectors()).unwrap();
        assert_eq!(a, b, "{mode:?} training is not reproducible");

        let batch = a.predict_batch(train.records()).unwrap();
        for (record, predicted) in train.records().iter().zip(&batch) {
            assert_eq!(&a.predict(record).unwrap(), predicted);
        }
    }

    let other = EnsembleConfig::new(8)
        .unwrap()
        .with_seed(10)
        .fit(&train, &class_collectors())
        .unwrap();
    let base = EnsembleConfig::new(8)
        .unwrap()
        .with_seed(9)
        .fit(&train, &class_collectors())
        .unwrap();
    assert_ne!(other, base);
}

// ---------------------------------------------------------------------------
// d) weight_is_conserved
// ---------------------------------------------------------------------------

/// Every tree distributes exactly the total training weight over its leaves,
/// whatever the split strategy.
#[test]
fn weight_is_conserved() {
    let mut train = make_classification(90, 3);
    let (schema, mut records) = train.clone().into_parts();
    for (i, record) in records.iter_mut().enumerate() {
        if i % 4 == 0 {
            record.set_missing(AttributeId::new(i % 3));
        }
        record.set_weight(if i % 2 == 0 { 1.0 } else { 0.5 });
    }
    train = Dataset::new(schema, records).unwrap();
    let total: f64 = train.records().iter().map(FeatureRecord::weight).sum();

    for strategy in [SplitStrategy::Random, SplitStrategy::InstanceTagged] {
        let ensemble = EnsembleConfig::new(5)
            .unwrap()
            .with_split_strategy(strategy)
            .fit(&train, &class_collectors())
            .unwrap();
        for tree in ensemble.trees() {
            let leaves: f64 = tree
                .nodes()
                .iter()
                .filter_map(|n| n.collectors())
                .map(|c| c[0].instance_count())
                .sum();
            assert!((leaves - total).abs() < 1e-9, "{strategy:?}: {leaves} != {total}");
        }
    }
}

// ---------------------------------------------------------------------------
// e) chain_hamming_accuracy_above_threshold
// ---------------------------------------------------------------------------

/// Chain prediction must fix every label to 0 or 1 and reach a Hamming
/// accuracy above 0.8 for every chain type.
#[test]
fn chain_hamming_accuracy_above_threshold() {
    let train = make_multilabel(400, 42);
    let test = make_multilabel(100, 8);

    for chain_type in [ChainType::Hybrid, ChainType::Highest, ChainType::Lowest, ChainType::GivenChain] {
        let ensemble = ChainConfig::new(30)
            .unwrap()
            .with_chain_type(chain_type)
            .with_label_fraction(0.3)
            .fit(&train, &label_group())
            .unwrap();

        let mut correct = 0usize;
        for record in test.records() {
            let out = ensemble.predict(record).unwrap();
            let counts = out[0].label_counts().unwrap();
            assert_eq!(counts.len(), 3);
            for (i, &c) in counts.iter().enumerate() {
                assert!(c == 0.0 || c == 1.0, "label {i} not fixed: {c}");
                if Some(c) == record.value(AttributeId::new(3 + i)) {
                    correct += 1;
                }
            }
        }
        let acc = correct as f64 / (3 * test.len()) as f64;
        assert!(acc > 0.8, "{chain_type:?} hamming accuracy {acc} <= 0.8");
    }
}

// ---------------------------------------------------------------------------
// f) chain_modes_and_predict_types
// ---------------------------------------------------------------------------

/// Independent mode and every predict type produce usable predictions; the
/// number of active label splitters follows the configured fraction.
#[test]
fn chain_modes_and_predict_types() {
    let train = make_multilabel(200, 5);
    let query = &train.records()[0];

    for predict_type in [PredictType::Percentage, PredictType::LabelCount, PredictType::Powerset] {
        let mut ensemble = ChainConfig::new(10)
            .unwrap()
            .with_predict_type(predict_type)
            .with_label_fraction(0.5)
            .fit(&train, &label_group())
            .unwrap();
        let chained = ensemble.predict(query).unwrap();
        assert_eq!(chained[0].used_attributes().len(), 3);

        ensemble.set_prediction_mode(PredictionMode::Independent);
        let independent = ensemble.predict(query).unwrap();
        assert!(independent[0].can_make_prediction(), "{predict_type:?}");

        let n = ensemble.n_label_splitters();
        ensemble.set_active_label_fraction(0.5).unwrap();
        assert_eq!(ensemble.n_active_label_splitters(), n / 2);
    }
}

// ---------------------------------------------------------------------------
// g) online_shards_merge_to_accurate_model
// ---------------------------------------------------------------------------

/// Two replicas trained on disjoint halves and merged must see every record
/// and classify held-out data with accuracy above 0.8.
#[test]
fn online_shards_merge_to_accurate_model() {
    let train = make_classification(300, 42);
    let test = make_classification(150, 7);
    let config = QuantileConfig::new(20).unwrap().with_max_depth(6).with_seed(4);

    let mut left = config.build(train.schema(), &class_collectors()).unwrap();
    let mut right = left.replica();
    for (i, record) in train.records().iter().enumerate() {
        if i % 2 == 0 {
            left.update(record).unwrap();
        } else {
            right.update(record).unwrap();
        }
    }
    left.merge(&right).unwrap();

    for tree in left.trees() {
        let seen: f64 = tree
            .tree()
            .nodes()
            .iter()
            .filter_map(|n| n.collectors())
            .map(|c| c[0].instance_count())
            .sum();
        assert!((seen - 300.0).abs() < 1e-9);
    }

    let acc = accuracy(test.records(), |r| left.predict(r).unwrap()[0].prediction().unwrap()[0]);
    assert!(acc > 0.8, "merged online accuracy {acc} <= 0.8");
}

// ---------------------------------------------------------------------------
// h) online_fit_matches_incremental_updates
// ---------------------------------------------------------------------------

/// `fit` is equivalent to building and updating record by record.
#[test]
fn online_fit_matches_incremental_updates() {
    let train = make_classification(60, 2);
    let config = QuantileConfig::new(4).unwrap().with_random_quantile(true);

    let fitted = config.fit(&train, &class_collectors()).unwrap();
    let mut incremental = config.build(train.schema(), &class_collectors()).unwrap();
    for record in train.records() {
        incremental.update(record).unwrap();
    }
    for (a, b) in fitted.trees().iter().zip(incremental.trees()) {
        assert_eq!(a.plan(), b.plan());
        assert_eq!(a.tree(), b.tree());
    }

    let short = FeatureRecord::missing(3);
    assert!(incremental.update(&short).is_err());
}

//! Behavioural checks of the selection, sampling and persistence building blocks

use burn::tensor::{Int, Tensor};
use burn_ndarray::NdArray;

use coteaching::config::{LossKind, NegativeSelection, RunConfig};
use coteaching::dataset::BalancedBatchSampler;
use coteaching::losses::CoTeachingCriterion;
use coteaching::model::{load_checkpoint, save_checkpoint, CoTeachingNetConfig};
use coteaching::training::{joint_logits, DropRateSchedule};
use coteaching::utils::argmax_rows;

type TestBackend = NdArray;

fn values<const D: usize>(t: Tensor<TestBackend, D>) -> Vec<f32> {
    t.into_data().to_vec::<f32>().unwrap()
}

#[test]
fn drop_schedule_matches_reference_ramp() {
    let schedule = DropRateSchedule::new(50, 0.7, 10, 1.0).unwrap();
    let expected_ramp: Vec<f64> = (0..10).map(|i| 1.0 - 0.3 * i as f64 / 9.0).collect();

    for (epoch, expected) in expected_ramp.iter().enumerate() {
        assert!((schedule.at(epoch + 1) - expected).abs() < 1e-9);
    }
    for epoch in 11..=50 {
        assert_eq!(schedule.at(epoch), 0.7);
    }
}

#[test]
fn balanced_batches_hold_every_class_equally() {
    let labels: Vec<usize> = (0..4).flat_map(|c| std::iter::repeat(c).take(5)).collect();
    let mut sampler = BalancedBatchSampler::new(&labels, 2, 6, true, 3).unwrap();

    for _ in 0..2 {
        let batches = sampler.next_epoch();
        assert_eq!(batches.len(), 6);
        for batch in batches {
            assert_eq!(batch.len(), 8);
            for class in 0..4 {
                let count = batch.iter().filter(|&&i| labels[i] == class).count();
                assert_eq!(count, 2);
            }
            let mut unique = batch.clone();
            unique.sort_unstable();
            unique.dedup();
            assert_eq!(unique.len(), 8);
        }
    }
}

#[test]
fn each_network_trains_on_its_peers_selection() {
    let device = Default::default();
    let config = RunConfig::default();
    let mut criterion = CoTeachingCriterion::from_config(&config, None);

    // logits [0, s] against target 0: the loss grows with s
    let strengths_1 = [0.0f32, 4.0, 0.5, 3.0, 1.0, 2.0, 6.0, 5.0];
    let strengths_2 = [6.0f32, 0.0, 5.0, 0.5, 4.0, 1.0, 3.0, 2.0];
    let logits = |s: &[f32]| {
        let data: Vec<f32> = s.iter().flat_map(|&v| [0.0, v]).collect();
        Tensor::<TestBackend, 1>::from_floats(data.as_slice(), &device).reshape([8, 2])
    };
    let targets = Tensor::<TestBackend, 1, Int>::zeros([8], &device);

    let step = criterion
        .step(logits(&strengths_1), logits(&strengths_2), targets, 0.75)
        .unwrap();

    // six smallest of each ranking
    assert_eq!(step.selected_by_1, vec![0, 2, 4, 5, 3, 1]);
    assert_eq!(step.selected_by_2, vec![1, 3, 5, 7, 6, 4]);

    // network 1's loss is averaged over network 2's picks
    let loss = |s: f32| (1.0 + s.exp()).ln() as f64;
    let expected: f64 = step.selected_by_2.iter().map(|&i| loss(strengths_1[i])).sum::<f64>() / 6.0;
    assert!((step.loss_1_value - expected).abs() < 1e-5);
    assert!((values(step.loss_1)[0] as f64 - expected).abs() < 1e-4);
}

#[test]
fn satisfied_hardest_triplets_add_nothing() {
    let device = Default::default();
    let mut config = RunConfig::default();
    config.loss_fn = LossKind::CoTeachingTriplet;
    config.negative_selection = NegativeSelection::Hardest;
    config.triplet_margin = 0.2;
    let mut criterion = CoTeachingCriterion::from_config(&config, None);

    // every negative is at least 1.0 farther than every positive
    let embeddings = Tensor::<TestBackend, 2>::from_floats(
        [[0.0, 0.0], [0.1, 0.0], [2.0, 2.0], [2.0, 2.1]],
        &device,
    );
    let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 0, 1, 1], &device);

    let step = criterion
        .step(embeddings.clone(), embeddings, targets, 1.0)
        .unwrap();

    assert_eq!(step.selected_by_1.len(), 4);
    assert_eq!(step.total_loss_1, 0.0);
    assert_eq!(values(step.loss_1)[0], 0.0);
    assert_eq!(values(step.loss_2)[0], 0.0);
}

#[test]
fn checkpoint_roundtrip_reproduces_outputs() {
    let device = Default::default();
    let config = CoTeachingNetConfig::new(3)
        .with_depth(2)
        .with_base_filters(4)
        .with_hidden_units(8);

    let model = config.init::<TestBackend>(&device);
    let input = Tensor::<TestBackend, 4>::ones([2, 3, 8, 8], &device);
    let expected = values(model.forward(input.clone()));

    let dir = tempfile::tempdir().unwrap();
    let path = save_checkpoint(&model, dir.path(), "SAR_8A_co_teaching_0.70_1_10").unwrap();
    assert!(path.to_string_lossy().ends_with("SAR_8A_co_teaching_0.70_1_10.mpk"));

    let fresh = config.init::<TestBackend>(&device);
    let restored = load_checkpoint(fresh, &path, &device).unwrap();
    let actual = values(restored.forward(input));

    assert_eq!(expected.len(), actual.len());
    for (a, b) in expected.iter().zip(&actual) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn joint_prediction_uses_elementwise_max() {
    let device = Default::default();
    let logits_1 = Tensor::<TestBackend, 2>::from_floats([[0.2, 0.8]], &device);
    let logits_2 = Tensor::<TestBackend, 2>::from_floats([[0.6, 0.4]], &device);

    let joint = values(joint_logits(logits_1, logits_2));
    assert_eq!(joint, vec![0.6, 0.8]);
    assert_eq!(argmax_rows(&joint, 2), vec![1]);
}

use docsplit::descriptor::PartitionDescriptor;
use docsplit::split::shard::{plan_shard_splits, round_robin_merge};
use docsplit::testing::{labelled_partition, shard_queues};
use std::collections::{HashMap, HashSet};

fn labels(parts: &[PartitionDescriptor]) -> Vec<String> {
    parts
        .iter()
        .map(|p| p.source().rsplit('.').next().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn single_shard_keeps_its_order() {
    let out = plan_shard_splits(shard_queues(&[("shard1", 2)]), Some(2));
    assert_eq!(labels(&out), vec!["shard1_0", "shard1_1"]);
}

#[test]
fn two_equal_shards_alternate() {
    let out = plan_shard_splits(shard_queues(&[("shard1", 2), ("shard2", 2)]), Some(4));
    assert_eq!(labels(&out), vec!["shard1_0", "shard2_0", "shard1_1", "shard2_1"]);
}

#[test]
fn longer_shard_fills_the_tail() {
    let out = plan_shard_splits(shard_queues(&[("shard1", 2), ("shard2", 4)]), Some(6));
    assert_eq!(
        labels(&out),
        vec!["shard1_0", "shard2_0", "shard1_1", "shard2_1", "shard2_2", "shard2_3"]
    );
}

#[test]
fn empty_mapping_is_an_empty_plan() {
    let out = plan_shard_splits(Vec::<(String, Vec<PartitionDescriptor>)>::new(), None);
    assert!(out.is_empty());
}

#[test]
fn wrong_hint_changes_nothing() {
    let queues = shard_queues(&[("a", 3), ("b", 1)]);
    let with_hint = plan_shard_splits(queues.clone(), Some(999));
    let without = plan_shard_splits(queues, None);
    assert_eq!(with_hint, without);
}

#[test]
fn input_order_of_shards_does_not_matter() {
    let forward = shard_queues(&[("alpha", 2), ("beta", 3), ("gamma", 1)]);
    let mut backward = forward.clone();
    backward.reverse();
    let from_map: HashMap<_, _> = forward.clone().into_iter().collect();
    let a = plan_shard_splits(forward, None);
    let b = plan_shard_splits(backward, None);
    let c = plan_shard_splits(from_map, None);
    assert_eq!(a, b);
    assert_eq!(a, c);
    assert_eq!(labels(&a)[..3], ["alpha_0", "beta_0", "gamma_0"]);
}

#[test]
fn merge_is_a_permutation_preserving_per_shard_order() {
    let layout = [("s0", 5), ("s1", 0), ("s2", 7), ("s3", 1), ("s4", 3)];
    let out = plan_shard_splits(shard_queues(&layout), None);
    let total: usize = layout.iter().map(|(_, n)| n).sum();
    assert_eq!(out.len(), total);

    let unique: HashSet<_> = labels(&out).into_iter().collect();
    assert_eq!(unique.len(), total);

    for (shard, count) in layout {
        let seen: Vec<String> = labels(&out)
            .into_iter()
            .filter(|l| l.starts_with(&format!("{shard}_")))
            .collect();
        let expected: Vec<String> = (0..count).map(|j| format!("{shard}_{j}")).collect();
        assert_eq!(seen, expected, "order within {shard}");
    }
}

#[test]
fn each_pass_visits_every_remaining_shard_once() {
    let out = round_robin_merge(vec![
        ("b".to_string(), vec!["b0", "b1", "b2"]),
        ("a".to_string(), vec!["a0"]),
        ("c".to_string(), vec!["c0", "c1"]),
    ]);
    assert_eq!(out, vec!["a0", "b0", "c0", "b1", "c1", "b2"]);
}

#[test]
fn descriptors_keep_their_fields_through_the_merge() {
    let special = labelled_partition("x_0").to_builder().limit(3).no_timeout(true).build();
    let out = plan_shard_splits(vec![("x".to_string(), vec![special.clone()])], Some(1));
    assert_eq!(out, vec![special]);
}

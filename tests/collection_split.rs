use anyhow::Result;
use docsplit::descriptor::PartitionDescriptor;
use docsplit::document::{Document, Value};
use docsplit::error::SplitError;
use docsplit::runner::Runner;
use docsplit::split::chunk::ChunkSplitConfig;
use docsplit::split::collection::{
    CollectionSplitConfig, ShardSplitter, SingleSplitter, StandaloneSplitter, select_splitter,
};
use docsplit::split::{MultiSplitter, Splitter, plan_or_whole_source};
use docsplit::testing::{MemoryCollection, StaticTopology, sample_chunks, sample_documents};

const ORDERS: &str = "mongodb://reader:pw@mongos0:27017/shop.orders?readPreference=nearest";
const USERS: &str = "mongodb://reader:pw@mongos0:27017/shop.users";

fn key(id: i64) -> Document {
    Document::new().with("_id", id)
}

/// `shop.orders` is sharded over three shards, `shop.users` is not.
fn topology() -> StaticTopology {
    StaticTopology::new()
        .with_chunks("shop.orders", sample_chunks(&["rs0", "rs1", "rs2"], &[10, 20, 30]))
        .with_shard("rs1", "rs1/b1:27018")
        .with_shard("rs0", "rs0/a1:27018,a2:27018")
        .with_shard("rs2", "c1:27018")
        .with_split_keys("shop.users", vec![key(10), key(25)])
        .with_split_keys("shop.orders", vec![key(15)])
}

fn bounds(parts: &[PartitionDescriptor]) -> Vec<(Document, Document)> {
    parts.iter().map(|p| (p.min().clone(), p.max().clone())).collect()
}

fn planning_failed(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|c| matches!(c.downcast_ref::<SplitError>(), Some(SplitError::SplitPlanningFailed(_))))
}

#[test]
fn disabled_split_creation_reads_one_partition() -> Result<()> {
    let topo = topology();
    let template = PartitionDescriptor::builder(ORDERS).limit(5).build();
    let config = CollectionSplitConfig {
        create_splits: false,
        ..CollectionSplitConfig::default()
    };
    let parts = select_splitter(template.clone(), config, &topo)?.calculate_splits()?;
    assert_eq!(parts, vec![template.clone()]);
    assert_eq!(SingleSplitter::new(template.clone()).calculate_splits()?, vec![template]);
    Ok(())
}

#[test]
fn unsharded_collection_is_cut_at_split_keys() -> Result<()> {
    let topo = topology();
    let template = PartitionDescriptor::builder(USERS).build();
    let parts = select_splitter(template, CollectionSplitConfig::default(), &topo)?.calculate_splits()?;
    assert_eq!(
        bounds(&parts),
        vec![
            (Document::new(), key(10)),
            (key(10), key(25)),
            (key(25), Document::new()),
        ]
    );
    assert!(parts.iter().all(|p| p.source() == USERS));
    Ok(())
}

#[test]
fn sharded_collection_uses_chunks_by_default() -> Result<()> {
    let topo = topology();
    let template = PartitionDescriptor::builder(ORDERS).build();
    let parts = select_splitter(template, CollectionSplitConfig::default(), &topo)?.calculate_splits()?;
    assert_eq!(parts.len(), 4);
    assert_eq!(parts[0].max(), &key(10));
    Ok(())
}

#[test]
fn sharded_collection_without_chunks_reads_each_shard_once() -> Result<()> {
    let topo = topology();
    let template = PartitionDescriptor::builder(ORDERS)
        .filter(Document::new().with("even", true))
        .build();
    let config = CollectionSplitConfig {
        shard_chunks: false,
        chunk: ChunkSplitConfig {
            target_shards: true,
            ..ChunkSplitConfig::default()
        },
        ..CollectionSplitConfig::default()
    };
    let parts = select_splitter(template.clone(), config, &topo)?.calculate_splits()?;
    let sources: Vec<&str> = parts.iter().map(PartitionDescriptor::source).collect();
    assert_eq!(
        sources,
        vec![
            "mongodb://reader:pw@a1:27018,a2:27018/shop.orders?readPreference=nearest",
            "mongodb://reader:pw@b1:27018/shop.orders?readPreference=nearest",
            "mongodb://reader:pw@c1:27018/shop.orders?readPreference=nearest",
        ]
    );
    for p in &parts {
        assert_eq!(p.filter(), template.filter());
        assert!(p.min().is_empty() && p.max().is_empty());
    }
    Ok(())
}

#[test]
fn sharded_collection_without_chunks_or_shards_uses_split_keys() -> Result<()> {
    let topo = topology();
    let config = CollectionSplitConfig {
        shard_chunks: false,
        ..CollectionSplitConfig::default()
    };
    let template = PartitionDescriptor::builder(ORDERS).build();
    let parts = select_splitter(template, config, &topo)?.calculate_splits()?;
    assert_eq!(
        bounds(&parts),
        vec![(Document::new(), key(15)), (key(15), Document::new())]
    );
    Ok(())
}

#[test]
fn no_split_keys_is_one_unbounded_partition() -> Result<()> {
    let topo = StaticTopology::new();
    let template = PartitionDescriptor::builder("mongodb://h/db.small").build();
    let parts =
        StandaloneSplitter::new(template.clone(), CollectionSplitConfig::default(), &topo).calculate_splits()?;
    assert_eq!(parts, vec![template]);
    Ok(())
}

#[test]
fn split_key_partitions_cover_the_collection_exactly_once() -> Result<()> {
    let collection = MemoryCollection::new(sample_documents(40));
    let topo = topology();
    for range_query in [false, true] {
        let config = CollectionSplitConfig {
            chunk: ChunkSplitConfig {
                range_query,
                ..ChunkSplitConfig::default()
            },
            ..CollectionSplitConfig::default()
        };
        let template = PartitionDescriptor::builder(USERS).build();
        let parts = StandaloneSplitter::new(template, config, &topo).calculate_splits()?;
        assert_eq!(parts.len(), 3);
        let per_part: Vec<usize> = Runner::sequential()
            .read_all(&parts, Some(&collection))?
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(per_part, vec![10, 15, 15], "range_query={range_query}");
    }
    Ok(())
}

#[test]
fn topology_failures_fail_planning() {
    let down = StaticTopology::new().unavailable();
    let template = PartitionDescriptor::builder(USERS).build();

    let err = select_splitter(template.clone(), CollectionSplitConfig::default(), &down).err().unwrap();
    assert!(planning_failed(&err), "{err:#}");

    let standalone = StandaloneSplitter::new(template.clone(), CollectionSplitConfig::default(), &down);
    assert!(planning_failed(&standalone.calculate_splits().unwrap_err()));

    let shards = ShardSplitter::new(template.clone(), &down);
    assert!(planning_failed(&shards.calculate_splits().unwrap_err()));

    let no_shards = StaticTopology::new();
    let shards = ShardSplitter::new(template, &no_shards);
    assert!(planning_failed(&shards.calculate_splits().unwrap_err()));
}

#[test]
fn multiple_inputs_are_planned_in_order() -> Result<()> {
    let topo = topology();
    let templates = vec![
        PartitionDescriptor::builder(USERS).build(),
        PartitionDescriptor::builder(ORDERS).build(),
    ];
    let multi = MultiSplitter::for_collections(templates, &CollectionSplitConfig::default(), &topo)?;
    assert_eq!(multi.len(), 2);
    let parts = multi.calculate_splits()?;
    assert_eq!(parts.len(), 3 + 4);
    assert!(parts[..3].iter().all(|p| p.source() == USERS));
    assert!(parts[3..].iter().all(|p| p.source().ends_with("shop.orders?readPreference=nearest")));

    let extra = PartitionDescriptor::builder("mongodb://h/db.extra").build();
    let multi = MultiSplitter::default()
        .with_input(Box::new(SingleSplitter::new(extra.clone())))
        .with_input(Box::new(SingleSplitter::new(extra.clone())));
    assert_eq!(multi.calculate_splits()?, vec![extra.clone(), extra]);
    Ok(())
}

#[test]
fn failing_input_fails_the_whole_plan_and_can_fall_back() -> Result<()> {
    let down = StaticTopology::new().unavailable();
    let users = PartitionDescriptor::builder(USERS).build();
    let inputs: Vec<Box<dyn Splitter + '_>> = vec![
        Box::new(SingleSplitter::new(users.clone())),
        Box::new(StandaloneSplitter::new(users.clone(), CollectionSplitConfig::default(), &down)),
    ];
    let multi = MultiSplitter::new(inputs);
    let err = multi.calculate_splits().unwrap_err();
    assert!(format!("{err:#}").contains("input #1"), "{err:#}");
    assert!(planning_failed(&err));

    let parts = plan_or_whole_source(&multi, &users)?;
    assert_eq!(parts, vec![users]);
    Ok(())
}

#[test]
fn split_key_values_keep_their_type() -> Result<()> {
    let topo = StaticTopology::new().with_split_keys("db.c", vec![Document::new().with("_id", "m")]);
    let template = PartitionDescriptor::builder("mongodb://h/db.c").build();
    let parts = StandaloneSplitter::new(template, CollectionSplitConfig::default(), &topo).calculate_splits()?;
    assert_eq!(parts[1].min().get("_id"), Some(&Value::from("m")));
    Ok(())
}

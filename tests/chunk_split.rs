use anyhow::Result;
use docsplit::descriptor::PartitionDescriptor;
use docsplit::document::{Document, Value};
use docsplit::error::SplitError;
use docsplit::runner::Runner;
use docsplit::split::chunk::{ChunkSplitConfig, ChunkSplitter};
use docsplit::split::{Splitter, plan_or_whole_source};
use docsplit::testing::{MemoryCollection, StaticTopology, sample_chunks, sample_documents};

const LOCATOR: &str = "mongodb://reader:pw@mongos0:27017/shop.orders?readPreference=nearest";

fn template() -> PartitionDescriptor {
    PartitionDescriptor::builder(LOCATOR)
        .filter(Document::new().with("even", true))
        .no_timeout(true)
        .build()
}

fn topology() -> StaticTopology {
    // _id cuts at 10, 20, 30 over three shards -> four chunks
    StaticTopology::new()
        .with_chunks("shop.orders", sample_chunks(&["rs0", "rs1", "rs2"], &[10, 20, 30]))
        .with_shard("rs0", "rs0/a1:27018,a2:27018")
        .with_shard("rs1", "rs1/b1:27018")
        .with_shard("rs2", "c1:27018")
}

fn planning_failed(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<SplitError>(), Some(SplitError::SplitPlanningFailed(_)))
}

#[test]
fn one_partition_per_chunk_in_round_robin_shard_order() -> Result<()> {
    let topo = topology();
    let splitter = ChunkSplitter::new(template(), ChunkSplitConfig::default(), &topo);
    let parts = splitter.calculate_splits()?;
    assert_eq!(parts.len(), 4);

    // rs0 owns chunks 0 and 3; the merge visits rs0, rs1, rs2, then rs0 again.
    let mins: Vec<Option<i64>> = parts
        .iter()
        .map(|p| p.min().get("_id").and_then(Value::as_i64))
        .collect();
    assert_eq!(mins, vec![None, Some(10), Some(20), Some(30)]);
    for p in &parts {
        assert_eq!(p.source(), LOCATOR);
        assert_eq!(p.filter(), template().filter());
        assert!(p.no_timeout());
    }
    Ok(())
}

#[test]
fn target_shards_rewrites_hosts_and_strips_set_names() -> Result<()> {
    let topo = topology();
    let config = ChunkSplitConfig {
        target_shards: true,
        ..ChunkSplitConfig::default()
    };
    let parts = ChunkSplitter::new(template(), config, &topo).calculate_splits()?;
    let sources: Vec<&str> = parts.iter().map(|p| p.source()).collect();
    assert_eq!(
        sources,
        vec![
            "mongodb://reader:pw@a1:27018,a2:27018/shop.orders?readPreference=nearest",
            "mongodb://reader:pw@b1:27018/shop.orders?readPreference=nearest",
            "mongodb://reader:pw@c1:27018/shop.orders?readPreference=nearest",
            "mongodb://reader:pw@a1:27018,a2:27018/shop.orders?readPreference=nearest",
        ]
    );
    Ok(())
}

#[test]
fn mongos_hosts_are_assigned_round_robin_by_chunk() -> Result<()> {
    let topo = topology();
    let config = ChunkSplitConfig {
        mongos_hosts: vec!["m1:27017".into(), "m2:27017".into()],
        ..ChunkSplitConfig::default()
    };
    let parts = ChunkSplitter::new(template(), config, &topo).calculate_splits()?;
    // chunk i -> m{i % 2 + 1}; after the shard merge the order is chunks 0, 1, 2, 3
    let hosts: Vec<bool> = parts.iter().map(|p| p.source().contains("@m1:")).collect();
    assert_eq!(hosts, vec![true, false, true, false]);
    Ok(())
}

#[test]
fn target_shards_and_mongos_hosts_conflict() {
    let topo = topology();
    let config = ChunkSplitConfig {
        target_shards: true,
        mongos_hosts: vec!["m1:27017".into()],
        range_query: false,
    };
    let err = ChunkSplitter::new(template(), config, &topo)
        .calculate_splits()
        .unwrap_err();
    assert!(planning_failed(&err), "{err:#}");
}

#[test]
fn unknown_shard_id_fails_planning() {
    let topo = StaticTopology::new()
        .with_chunk("shop.orders", "ghost", Document::new(), Document::new())
        .with_shard("rs0", "a1:27018");
    let config = ChunkSplitConfig {
        target_shards: true,
        ..ChunkSplitConfig::default()
    };
    let err = ChunkSplitter::new(template(), config, &topo)
        .calculate_splits()
        .unwrap_err();
    assert!(planning_failed(&err));
    assert!(format!("{err:#}").contains("ghost"));
}

#[test]
fn missing_or_unreachable_metadata_fails_planning() {
    let empty = StaticTopology::new();
    let err = ChunkSplitter::new(template(), ChunkSplitConfig::default(), &empty)
        .calculate_splits()
        .unwrap_err();
    assert!(planning_failed(&err));

    let down = topology().unavailable();
    let err = ChunkSplitter::new(template(), ChunkSplitConfig::default(), &down)
        .calculate_splits()
        .unwrap_err();
    assert!(planning_failed(&err));
}

#[test]
fn range_query_moves_bounds_into_the_filter() -> Result<()> {
    let topo = topology();
    let splitter = ChunkSplitter::new(
        template(),
        ChunkSplitConfig {
            range_query: true,
            ..ChunkSplitConfig::default()
        },
        &topo,
    );
    let p = splitter.split_from_bounds(
        &Document::new().with("_id", 10),
        &Document::new().with("_id", 20),
    )?;
    assert_eq!(
        p.filter(),
        &Document::new()
            .with("even", true)
            .with("_id", Document::new().with("$gte", 10).with("$lt", 20))
    );
    assert!(p.min().is_empty() && p.max().is_empty());

    let unbounded = splitter.split_from_bounds(&Document::new(), &Document::new())?;
    assert_eq!(unbounded.filter(), template().filter());
    Ok(())
}

#[test]
fn range_query_rejects_compound_keys_and_filter_conflicts() {
    let topo = topology();
    let config = ChunkSplitConfig {
        range_query: true,
        ..ChunkSplitConfig::default()
    };
    let splitter = ChunkSplitter::new(template(), config.clone(), &topo);
    let compound = Document::new().with("a", 1).with("b", 2);
    let err = splitter
        .split_from_bounds(&compound, &Document::new())
        .unwrap_err();
    assert!(matches!(err, SplitError::SplitPlanningFailed(_)));

    let conflicting = template()
        .to_builder()
        .filter(Document::new().with("_id", 5))
        .build();
    let splitter = ChunkSplitter::new(conflicting, config, &topo);
    let err = splitter
        .split_from_bounds(&Document::new().with("_id", 1), &Document::new())
        .unwrap_err();
    assert!(matches!(err, SplitError::SplitPlanningFailed(_)));
}

#[test]
fn chunk_partitions_cover_the_collection_exactly_once() -> Result<()> {
    let docs = sample_documents(40);
    let collection = MemoryCollection::new(docs.clone());
    let topo = topology();
    let whole = PartitionDescriptor::builder(LOCATOR).build();

    for range_query in [false, true] {
        let config = ChunkSplitConfig {
            range_query,
            ..ChunkSplitConfig::default()
        };
        let parts = ChunkSplitter::new(whole.clone(), config, &topo).calculate_splits()?;
        let mut ids: Vec<i64> = Runner::sequential()
            .read_flat(&parts, Some(&collection))?
            .iter()
            .filter_map(|d| d.get("_id").and_then(Value::as_i64))
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..40).collect::<Vec<_>>(), "range_query={range_query}");
    }
    Ok(())
}

#[test]
fn planning_failure_falls_back_to_the_whole_collection() -> Result<()> {
    let down = StaticTopology::new().unavailable();
    let whole = template();
    let splitter = ChunkSplitter::new(whole.clone(), ChunkSplitConfig::default(), &down);
    let parts = plan_or_whole_source(&splitter, &whole)?;
    assert_eq!(parts, vec![whole]);
    Ok(())
}

#[test]
fn locator_without_namespace_fails_planning() {
    let topo = topology();
    let bad = PartitionDescriptor::builder("mongodb://mongos0:27017/").build();
    let err = ChunkSplitter::new(bad, ChunkSplitConfig::default(), &topo)
        .calculate_splits()
        .unwrap_err();
    assert!(planning_failed(&err));
}

//! End-to-end scenarios spanning the blob framer, scheduler, and
//! encoder/writer side together. Unit-level coverage for each component
//! lives in its own module; these tests exercise scenarios that only
//! make sense over a full multi-blob byte stream.

use osmpbf_stream::encoder::PrimitiveBlockEncoder;
use osmpbf_stream::entities::{Changeset, Node, Relation, Way};
use osmpbf_stream::writer::BlobWriter;
use osmpbf_stream::{pbf, ParserBuilder};

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn node(id: i64, lat: f64, lon: f64) -> Node {
    Node {
        id,
        tags: vec![],
        info: None,
        lat,
        lon,
    }
}

/// Builds a byte stream: one header blob followed by one data blob per
/// node id in `node_ids`.
fn stream_with_header_and_nodes(node_ids: &[i64]) -> Vec<u8> {
    let mut buffer = Vec::new();
    {
        let mut writer = BlobWriter::new(&mut buffer);
        writer
            .write_header_block(&pbf::HeaderBlock {
                writingprogram: Some("osmpbf-stream-tests".to_string()),
                ..Default::default()
            })
            .unwrap();

        for &id in node_ids {
            let mut encoder = PrimitiveBlockEncoder::new();
            encoder.add_node(&node(id, id as f64 * 1e-6, 0.0)).unwrap();
            let block = encoder.write().unwrap();
            writer.write_primitive_block(&block).unwrap();
        }
    }
    buffer
}

#[test]
fn decode_then_encode_then_decode_preserves_entities() {
    let bytes = stream_with_header_and_nodes(&[1, 2, 3]);

    let collected: Arc<Mutex<Vec<Node>>> = Arc::new(Mutex::new(Vec::new()));
    let collected_sink = Arc::clone(&collected);
    let parser = ParserBuilder::new(1).on_node(move |n| collected_sink.lock().unwrap().push(n)).build();
    parser.parse(&mut Cursor::new(bytes)).unwrap();

    let first_pass = collected.lock().unwrap().clone();
    assert_eq!(first_pass.len(), 3);

    // Re-encode what was decoded and decode again; the entity set must
    // be unchanged (spec's round-trip property).
    let mut encoder = PrimitiveBlockEncoder::new();
    for n in &first_pass {
        encoder.add_node(n).unwrap();
    }
    let block = encoder.write().unwrap();

    let mut buffer = Vec::new();
    {
        let mut writer = BlobWriter::new(&mut buffer);
        writer.write_primitive_block(&block).unwrap();
    }

    let second_pass: Arc<Mutex<Vec<Node>>> = Arc::new(Mutex::new(Vec::new()));
    let second_pass_sink = Arc::clone(&second_pass);
    let parser = ParserBuilder::new(1).on_node(move |n| second_pass_sink.lock().unwrap().push(n)).build();
    parser.parse(&mut Cursor::new(buffer)).unwrap();

    assert_eq!(*second_pass.lock().unwrap(), first_pass);
}

#[test]
fn shard_split_union_equals_single_shard_run() {
    let ids: Vec<i64> = (0..6).collect();
    let bytes = stream_with_header_and_nodes(&ids);

    let run_shard = |partitions: usize, shard: usize| {
        let collected: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&collected);
        let parser = ParserBuilder::new(2)
            .on_node(move |n| sink.lock().unwrap().push(n.id))
            .partitions(partitions, shard)
            .build();
        parser.parse(&mut Cursor::new(bytes.clone())).unwrap();
        let mut result = collected.lock().unwrap().clone();
        result.sort();
        result
    };

    let single = run_shard(1, 0);
    let mut union = run_shard(2, 0);
    union.extend(run_shard(2, 1));
    union.sort();

    assert_eq!(single, ids);
    assert_eq!(union, ids);
}

#[test]
fn worker_count_does_not_change_total_entity_count() {
    let ids: Vec<i64> = (0..20).collect();
    let bytes = stream_with_header_and_nodes(&ids);

    for worker_count in [1, 2, 4, 8] {
        let count = Arc::new(AtomicUsize::new(0));
        let count_sink = Arc::clone(&count);
        let parser = ParserBuilder::new(worker_count)
            .on_node(move |_| {
                count_sink.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        parser.parse(&mut Cursor::new(bytes.clone())).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), ids.len(), "worker_count={worker_count}");
    }
}

#[test]
fn empty_file_completes_with_no_callbacks() {
    let complete_count = Arc::new(AtomicUsize::new(0));
    let complete_count_sink = Arc::clone(&complete_count);
    let node_count = Arc::new(AtomicUsize::new(0));
    let node_count_sink = Arc::clone(&node_count);

    let parser = ParserBuilder::new(2)
        .on_node(move |_| {
            node_count_sink.fetch_add(1, Ordering::SeqCst);
        })
        .on_complete(move || {
            complete_count_sink.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    parser.parse(&mut Cursor::new(Vec::new())).unwrap();

    assert_eq!(complete_count.load(Ordering::SeqCst), 1);
    assert_eq!(node_count.load(Ordering::SeqCst), 0);
}

#[test]
fn header_only_file_fires_header_callback_but_no_entity_callbacks() {
    let mut buffer = Vec::new();
    {
        let mut writer = BlobWriter::new(&mut buffer);
        writer
            .write_header_block(&pbf::HeaderBlock {
                writingprogram: Some("osmpbf-stream-tests".to_string()),
                ..Default::default()
            })
            .unwrap();
    }

    let header_seen = Arc::new(AtomicUsize::new(0));
    let header_seen_sink = Arc::clone(&header_seen);
    let node_count = Arc::new(AtomicUsize::new(0));
    let node_count_sink = Arc::clone(&node_count);

    let parser = ParserBuilder::new(1)
        .on_header(move |_| {
            header_seen_sink.fetch_add(1, Ordering::SeqCst);
        })
        .on_node(move |_| {
            node_count_sink.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    parser.parse(&mut Cursor::new(buffer)).unwrap();

    assert_eq!(header_seen.load(Ordering::SeqCst), 1);
    assert_eq!(node_count.load(Ordering::SeqCst), 0);
}

#[test]
fn ways_and_relations_survive_a_full_decode_cycle() {
    let mut buffer = Vec::new();
    {
        let mut writer = BlobWriter::new(&mut buffer);
        writer.write_header_block(&pbf::HeaderBlock::default()).unwrap();

        let mut encoder = PrimitiveBlockEncoder::new();
        encoder
            .add_way(&Way {
                id: 42,
                tags: vec![("highway".to_string(), "residential".to_string())],
                info: None,
                nodes: vec![1, 2, 3],
            })
            .unwrap();
        encoder
            .add_relation(&Relation {
                id: 7,
                tags: vec![],
                info: None,
                members: vec![],
            })
            .unwrap();
        encoder.add_changeset(&Changeset { id: 99 }).unwrap();
        let block = encoder.write().unwrap();
        writer.write_primitive_block(&block).unwrap();
    }

    let ways: Arc<Mutex<Vec<Way>>> = Arc::new(Mutex::new(Vec::new()));
    let ways_sink = Arc::clone(&ways);
    let relations: Arc<Mutex<Vec<Relation>>> = Arc::new(Mutex::new(Vec::new()));
    let relations_sink = Arc::clone(&relations);
    let changesets: Arc<Mutex<Vec<Changeset>>> = Arc::new(Mutex::new(Vec::new()));
    let changesets_sink = Arc::clone(&changesets);

    let parser = ParserBuilder::new(1)
        .on_way(move |w| ways_sink.lock().unwrap().push(w))
        .on_relation(move |r| relations_sink.lock().unwrap().push(r))
        .on_changeset(move |c| changesets_sink.lock().unwrap().push(c))
        .build();

    parser.parse(&mut Cursor::new(buffer)).unwrap();

    assert_eq!(ways.lock().unwrap().len(), 1);
    assert_eq!(ways.lock().unwrap()[0].nodes, vec![1, 2, 3]);
    assert_eq!(relations.lock().unwrap().len(), 1);
    assert_eq!(changesets.lock().unwrap().len(), 1);
    assert_eq!(changesets.lock().unwrap()[0].id, 99);
}

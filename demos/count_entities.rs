use log::info;

use osmpbf_stream::ParserBuilder;

use std::fs::File;
use std::sync::atomic::{AtomicUsize, Ordering};

static NODE_COUNT: AtomicUsize = AtomicUsize::new(0);
static WAY_COUNT: AtomicUsize = AtomicUsize::new(0);
static RELATION_COUNT: AtomicUsize = AtomicUsize::new(0);
static CHANGESET_COUNT: AtomicUsize = AtomicUsize::new(0);

fn main() {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(log::LevelFilter::Info);
    builder.init();

    let mut args = std::env::args();

    let pbf_path = args.nth(1).expect("Expected an OSM PBF file as first argument");

    let worker_count: usize = match args.next() {
        Some(s) => s.parse().expect("Expected a worker count as second argument"),
        None => 1,
    };

    let mut file = File::open(pbf_path).unwrap();

    let start = std::time::Instant::now();

    let parser = ParserBuilder::new(worker_count)
        .on_node(|_| {
            NODE_COUNT.fetch_add(1, Ordering::SeqCst);
        })
        .on_way(|_| {
            WAY_COUNT.fetch_add(1, Ordering::SeqCst);
        })
        .on_relation(|_| {
            RELATION_COUNT.fetch_add(1, Ordering::SeqCst);
        })
        .on_changeset(|_| {
            CHANGESET_COUNT.fetch_add(1, Ordering::SeqCst);
        })
        .on_header(|header| {
            if let Some(writing_program) = &header.writing_program {
                info!("Writing program: {writing_program}");
            }
        })
        .build();

    parser.parse(&mut file).expect("parsing failed");

    info!(
        "{} nodes, {} ways, {} relations, {} changesets",
        NODE_COUNT.load(Ordering::SeqCst),
        WAY_COUNT.load(Ordering::SeqCst),
        RELATION_COUNT.load(Ordering::SeqCst),
        CHANGESET_COUNT.load(Ordering::SeqCst),
    );
    info!(
        "Finished in {:.2}s on {} worker(s)",
        start.elapsed().as_secs_f64(),
        worker_count
    );
}

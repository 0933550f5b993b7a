//! The bounded-concurrency scheduler (component C7): drives the blob
//! framer on the caller's thread while fanning decode work out across a
//! bounded worker pool.
//!
//! Grounded on the teacher's own `count_wikidata` example (a thread pool
//! plus a thread-local `BlockParser` to avoid reallocating its internal
//! buffer per task); the in-flight bound itself is enforced by
//! [`crate::sync::Semaphore`] since `threadpool` has no back-pressure of
//! its own.

use crate::entities::{BoundBox, Changeset, Header, Node, Relation, Way};
use crate::error::Error;
use crate::groups::decode_primitive_block;
use crate::header::parse_header;
use crate::sync::Semaphore;
use crate::{read_frame_header, read_frame_payload, skip_frame_payload, Block, BlockParser, BlockType, RawBlock};

use log::warn;

use std::cell::RefCell;
use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use threadpool::ThreadPool;

type NodeSink = Box<dyn Fn(Node) + Send + Sync>;
type WaySink = Box<dyn Fn(Way) + Send + Sync>;
type RelationSink = Box<dyn Fn(Relation) + Send + Sync>;
type ChangesetSink = Box<dyn Fn(Changeset) + Send + Sync>;
type HeaderSink = Box<dyn Fn(Header) + Send + Sync>;
type BoundBoxSink = Box<dyn Fn(BoundBox) + Send + Sync>;
type CompleteSink = Box<dyn Fn() + Send + Sync>;

/// The callback set a [`Parser`] dispatches decoded entities to. Any
/// subset may be absent; an absent entity sink disables decoding that
/// entity kind entirely, since there's nothing to do with the result.
#[derive(Default)]
pub struct Sinks {
    pub(crate) on_node: Option<NodeSink>,
    pub(crate) on_way: Option<WaySink>,
    pub(crate) on_relation: Option<RelationSink>,
    pub(crate) on_changeset: Option<ChangesetSink>,
    on_header: Option<HeaderSink>,
    on_bbox: Option<BoundBoxSink>,
    on_complete: Option<CompleteSink>,
}

impl Sinks {
    fn wants_bbox(&self) -> bool {
        self.on_bbox.is_some()
    }

    fn wants_any_data(&self) -> bool {
        self.on_node.is_some() || self.on_way.is_some() || self.on_relation.is_some() || self.on_changeset.is_some()
    }
}

/// Builds a [`Parser`]. Mirrors the `onNode`/`onWay`/.../`partitions`
/// setter surface: every setter is chainable and a null/absent callback
/// disables that entity's decoding.
pub struct ParserBuilder {
    worker_count: usize,
    partitions: usize,
    shard: usize,
    sinks: Sinks,
}

impl ParserBuilder {
    /// Creates a builder with `worker_count` decode workers and the
    /// default single-shard partitioning `(1, 0)`.
    pub fn new(worker_count: usize) -> Self {
        assert!(worker_count >= 1, "worker_count must be >= 1");

        ParserBuilder {
            worker_count,
            partitions: 1,
            shard: 0,
            sinks: Sinks::default(),
        }
    }

    pub fn on_node(mut self, f: impl Fn(Node) + Send + Sync + 'static) -> Self {
        self.sinks.on_node = Some(Box::new(f));
        self
    }

    pub fn on_way(mut self, f: impl Fn(Way) + Send + Sync + 'static) -> Self {
        self.sinks.on_way = Some(Box::new(f));
        self
    }

    pub fn on_relation(mut self, f: impl Fn(Relation) + Send + Sync + 'static) -> Self {
        self.sinks.on_relation = Some(Box::new(f));
        self
    }

    pub fn on_changeset(mut self, f: impl Fn(Changeset) + Send + Sync + 'static) -> Self {
        self.sinks.on_changeset = Some(Box::new(f));
        self
    }

    pub fn on_header(mut self, f: impl Fn(Header) + Send + Sync + 'static) -> Self {
        self.sinks.on_header = Some(Box::new(f));
        self
    }

    pub fn on_bbox(mut self, f: impl Fn(BoundBox) + Send + Sync + 'static) -> Self {
        self.sinks.on_bbox = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.sinks.on_complete = Some(Box::new(f));
        self
    }

    /// Restricts this parser to shard `shard` of `partitions` data blobs.
    /// Header blobs and blobs of unrecognized type are unaffected by
    /// sharding. Default is `(1, 0)`: every data blob is owned.
    pub fn partitions(mut self, partitions: usize, shard: usize) -> Self {
        assert!(partitions >= 1, "partitions must be >= 1");
        assert!(shard < partitions, "shard must be < partitions");
        self.partitions = partitions;
        self.shard = shard;
        self
    }

    pub fn build(self) -> Parser {
        Parser {
            worker_count: self.worker_count,
            partitions: self.partitions,
            shard: self.shard,
            sinks: Arc::new(self.sinks),
            running: AtomicBool::new(false),
        }
    }
}

/// Drives the full decode pipeline: reads blobs sequentially on the
/// calling thread, decodes and dispatches them on a bounded worker pool.
///
/// A `Parser` may be reused across multiple `parse()` calls once a prior
/// call has returned, but a second concurrent call fails fast with
/// [`Error::ParserBusy`] rather than queuing behind the first.
pub struct Parser {
    worker_count: usize,
    partitions: usize,
    shard: usize,
    sinks: Arc<Sinks>,
    running: AtomicBool,
}

impl Parser {
    /// Runs the scheduler to completion over `input`. Blocks the calling
    /// thread until every blob has been read, decoded and dispatched (or
    /// until the first fatal error is observed).
    pub fn parse<Input: Read>(&self, input: &mut Input) -> Result<(), Error> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::ParserBusy);
        }

        let result = self.run(input);
        self.running.store(false, Ordering::SeqCst);

        if result.is_ok() {
            if let Some(on_complete) = &self.sinks.on_complete {
                on_complete();
            }
        }

        result
    }

    fn run<Input: Read>(&self, input: &mut Input) -> Result<(), Error> {
        let pool = ThreadPool::new(self.worker_count);
        let slots = Semaphore::new(self.worker_count);
        let failure: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));

        let mut data_block_counter: usize = 0;
        let mut header_seen = false;

        loop {
            if failure.lock().unwrap().is_some() {
                break;
            }

            let frame_header = match read_frame_header(input) {
                None => break,
                Some(Ok(header)) => header,
                Some(Err(error)) => {
                    set_first_failure(&failure, error);
                    break;
                }
            };

            match frame_header.block_type {
                BlockType::Header => {
                    header_seen = true;
                }
                BlockType::Data => {
                    if !header_seen && !self.sinks.wants_any_data() {
                        // Nothing registered wants data and no header has
                        // been seen yet: the short-circuit in step 4 of
                        // the scheduling algorithm applies.
                        break;
                    }

                    let shard = data_block_counter % self.partitions;
                    data_block_counter += 1;

                    if shard != self.shard {
                        if let Err(error) = skip_frame_payload(input, frame_header.datasize) {
                            set_first_failure(&failure, error);
                            break;
                        }
                        continue;
                    }

                    if !header_seen {
                        warn!("OSMData blob observed before any OSMHeader blob; skipping");
                        if let Err(error) = skip_frame_payload(input, frame_header.datasize) {
                            set_first_failure(&failure, error);
                            break;
                        }
                        continue;
                    }
                }
                BlockType::Unknown => {
                    // Unknown block types neither count toward nor are
                    // processed against the shard counter.
                    if let Err(error) = skip_frame_payload(input, frame_header.datasize) {
                        set_first_failure(&failure, error);
                        break;
                    }
                    continue;
                }
            }

            let payload = match read_frame_payload(input, frame_header.datasize) {
                Ok(payload) => payload,
                Err(error) => {
                    set_first_failure(&failure, error);
                    break;
                }
            };

            slots.acquire();

            let sinks = Arc::clone(&self.sinks);
            let failure_for_task = Arc::clone(&failure);
            let slots_for_task = slots.clone();
            let block_type = frame_header.block_type;

            pool.execute(move || {
                thread_local! {
                    static BLOCK_PARSER: RefCell<BlockParser> = RefCell::new(BlockParser::default());
                }

                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    BLOCK_PARSER.with(|parser| process_raw_block(&mut parser.borrow_mut(), block_type, payload, &sinks))
                }));

                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => set_first_failure(&failure_for_task, error),
                    Err(panic) => set_first_failure(&failure_for_task, Error::WorkerFailed(panic_message(&panic))),
                }

                slots_for_task.release();
            });
        }

        pool.join();

        match failure.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn set_first_failure(failure: &Mutex<Option<Error>>, error: Error) {
    let mut failure = failure.lock().unwrap();
    if failure.is_none() {
        *failure = Some(error);
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker thread panicked with a non-string payload".to_string()
    }
}

fn process_raw_block(parser: &mut BlockParser, block_type: BlockType, payload: Vec<u8>, sinks: &Sinks) -> Result<(), Error> {
    let raw_block = RawBlock { block_type, data: payload };

    match parser.parse_block(raw_block)? {
        Block::Header(header_block) => {
            let header = parse_header(&header_block, sinks.wants_bbox())?;

            if let Some(on_bbox) = &sinks.on_bbox {
                if let Some(bbox) = header.bbox {
                    on_bbox(bbox);
                }
            }

            if let Some(on_header) = &sinks.on_header {
                on_header(header);
            }
        }
        Block::Primitive(primitive_block) => {
            decode_primitive_block(&primitive_block, sinks)?;
        }
        Block::Unknown(_) => {}
    }

    Ok(())
}

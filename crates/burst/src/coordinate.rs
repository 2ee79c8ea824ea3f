//! The download coordinator: schedules ranged reads, feeds part
//! processors, and fails fast.
//!
//! Two shapes of run exist. On the **simple path** the archive tail holds
//! the whole central directory: every body part is dispatched immediately,
//! and parts whose bytes are already in the tail never touch the network.
//! On the **hybrid path** the directory outgrows the tail: the coordinator
//! fetches the missing directory ranges as whole parts (so their body
//! bytes count double), dispatches "early" parts whose metadata the
//! partial directory already proves complete, and schedules the rest once
//! the directory is assembled and reparsed.
//!
//! Concurrency is one task per part under a fair semaphore, so spawn order
//! is priority order: directory ranges, then early parts, then the
//! remainder. The first error latches, cancels every peer through a shared
//! token, and the coordinator still joins everything before returning.

use std::{
	collections::HashMap,
	path::PathBuf,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use tokio::{sync::Semaphore, task::JoinSet, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
	constants::{
		DEFAULT_CONCURRENT_PARTS, DEFAULT_PART_SIZE, DEFAULT_TAIL_LENGTH, MAX_CONCURRENT_PARTS,
		MAX_PART_SIZE, MIN_PART_SIZE,
	},
	directory::{
		parse_archive_tail, parse_full_directory, CentralDirectory, DirectoryBounds, TailParse,
	},
	error::{Error, ErrorKind, Result},
	extract::{sink::EncodedWriteSink, PartProcessor, ZstdDecodeSink},
	format::zip::EOCD_LEN,
	source::RangeSource,
};

/// Extraction settings.
#[derive(Clone, Debug)]
pub struct ExtractOptions {
	/// Directory the tree is extracted into.
	pub output_dir: PathBuf,

	/// Part size in bytes: 8–64 MiB, a multiple of 8 MiB.
	pub part_size: u64,

	/// Parts processed concurrently: 1–16.
	pub max_concurrent_parts: usize,

	/// Length of the archive-tail fetch.
	pub tail_length: u64,

	/// Deadline for fetching and processing one part.
	pub part_timeout: Duration,

	/// Deadline for the tail fetch.
	pub tail_timeout: Duration,
}

impl Default for ExtractOptions {
	fn default() -> Self {
		Self {
			output_dir: PathBuf::from("."),
			part_size: DEFAULT_PART_SIZE,
			max_concurrent_parts: DEFAULT_CONCURRENT_PARTS,
			tail_length: DEFAULT_TAIL_LENGTH,
			part_timeout: Duration::from_secs(120),
			tail_timeout: Duration::from_secs(60),
		}
	}
}

impl ExtractOptions {
	fn validate(&self) -> Result<()> {
		if self.part_size < MIN_PART_SIZE
			|| self.part_size > MAX_PART_SIZE
			|| self.part_size % MIN_PART_SIZE != 0
		{
			return Err(Error::new(ErrorKind::InvalidArgs).with_message(format!(
				"part size must be 8-64 MiB in 8 MiB steps, got {} bytes",
				self.part_size
			)));
		}
		if self.max_concurrent_parts == 0 || self.max_concurrent_parts > MAX_CONCURRENT_PARTS {
			return Err(Error::new(ErrorKind::InvalidArgs).with_message(format!(
				"concurrent parts must be 1-{MAX_CONCURRENT_PARTS}, got {}",
				self.max_concurrent_parts
			)));
		}
		if self.tail_length < EOCD_LEN as u64 {
			return Err(Error::new(ErrorKind::InvalidArgs)
				.with_message("tail length shorter than an end-of-central-directory record"));
		}
		Ok(())
	}
}

/// What an extraction did.
#[derive(Clone, Copy, Debug)]
pub struct ExtractSummary {
	/// Members restored.
	pub members: u64,

	/// Body parts processed.
	pub parts: u64,

	/// Bytes received from the range source, tail included.
	pub bytes_fetched: u64,
}

struct Shared {
	semaphore: Arc<Semaphore>,
	cancel: CancellationToken,
	bytes_fetched: AtomicU64,
}

/// Drives one extraction against a range source.
pub struct Coordinator<S> {
	source: Arc<S>,
	sink: Arc<dyn EncodedWriteSink>,
	options: ExtractOptions,
}

impl<S: RangeSource + 'static> Coordinator<S> {
	/// Coordinator with the default decode-and-write sink.
	pub fn new(source: S, options: ExtractOptions) -> Self {
		Self::with_sink(source, options, Arc::new(ZstdDecodeSink))
	}

	/// Coordinator writing frames through a custom sink.
	pub fn with_sink(
		source: S,
		options: ExtractOptions,
		sink: Arc<dyn EncodedWriteSink>,
	) -> Self {
		Self {
			source: Arc::new(source),
			sink,
			options,
		}
	}

	/// Run the extraction to completion.
	#[instrument(level = "info", skip(self))]
	pub async fn extract(&self) -> Result<ExtractSummary> {
		self.options.validate()?;
		std::fs::create_dir_all(&self.options.output_dir)?;

		let shared = Arc::new(Shared {
			semaphore: Arc::new(Semaphore::new(self.options.max_concurrent_parts)),
			cancel: CancellationToken::new(),
			bytes_fetched: AtomicU64::new(0),
		});

		let (tail, tail_start, total_size) = self.fetch_tail(&shared).await?;
		if total_size == 0 {
			return Err(Error::new(ErrorKind::FormatNoEocd).with_message("object is empty"));
		}
		debug!(%tail_start, %total_size, "fetched archive tail");

		let outcome = parse_archive_tail(&tail, tail_start, total_size, self.options.part_size)?;
		let directory = match outcome {
			TailParse::Complete(directory) => {
				let directory = Arc::new(directory);
				info!(
					members = directory.files.len(),
					parts = directory.part_count(),
					"directory complete in tail, simple dispatch"
				);
				self.run_simple(&shared, Arc::clone(&directory), tail, tail_start)
					.await?;
				directory
			}
			TailParse::NeedsMore {
				partial,
				bounds,
				safe_first_part,
			} => {
				info!(
					known_members = partial.files.len(),
					%safe_first_part,
					missing = ?bounds.missing_range(tail_start),
					"directory exceeds tail, hybrid dispatch"
				);
				self.run_hybrid(&shared, partial, bounds, safe_first_part, tail, tail_start)
					.await?
			}
		};

		Ok(ExtractSummary {
			members: directory.files.len() as u64,
			parts: directory.part_count(),
			bytes_fetched: shared.bytes_fetched.load(Ordering::Relaxed),
		})
	}

	async fn fetch_tail(&self, shared: &Arc<Shared>) -> Result<(Bytes, u64, u64)> {
		let fetch = async {
			let suffix = self.source.read_suffix(self.options.tail_length).await?;
			let mut chunks = suffix.chunks;
			let mut buffer = BytesMut::new();
			while let Some(chunk) = chunks.try_next().await? {
				buffer.extend_from_slice(&chunk);
			}
			shared
				.bytes_fetched
				.fetch_add(buffer.len() as u64, Ordering::Relaxed);
			Ok((buffer.freeze(), suffix.start, suffix.total_size))
		};
		timeout(self.options.tail_timeout, fetch)
			.await
			.map_err(|_| Error::new(ErrorKind::Timeout).with_message("tail fetch timed out"))?
	}

	/// Simple path: everything is known; parts inside the tail stay local.
	async fn run_simple(
		&self,
		shared: &Arc<Shared>,
		directory: Arc<CentralDirectory>,
		tail: Bytes,
		tail_start: u64,
	) -> Result<()> {
		let mut tasks: JoinSet<Result<()>> = JoinSet::new();

		for part in 0..directory.part_count() {
			let span = directory.part_span(part);
			if span.start >= tail_start {
				let local =
					tail.slice((span.start - tail_start) as usize..(span.end - tail_start) as usize);
				tasks.spawn(process_local(
					Arc::clone(shared),
					Arc::clone(&directory),
					Arc::clone(&self.sink),
					self.options.output_dir.clone(),
					part,
					local,
				));
			} else {
				tasks.spawn(process_fetched(
					Arc::clone(shared),
					Arc::clone(&self.source),
					Arc::clone(&directory),
					Arc::clone(&self.sink),
					self.options.output_dir.clone(),
					part,
					self.options.part_timeout,
				));
			}
		}

		drain(&mut tasks, shared).await
	}

	/// Hybrid path: overlap directory completion with early part work.
	#[allow(clippy::too_many_arguments)]
	async fn run_hybrid(
		&self,
		shared: &Arc<Shared>,
		partial: CentralDirectory,
		bounds: DirectoryBounds,
		safe_first_part: u64,
		tail: Bytes,
		tail_start: u64,
	) -> Result<Arc<CentralDirectory>> {
		let part_size = self.options.part_size;
		let total_size = partial.archive_size;
		let partial = Arc::new(partial);
		let body_parts = partial.part_count();
		let last_part = (total_size - 1) / part_size;
		let directory_first_part = bounds.directory_offset / part_size;

		// ranges needed for the directory, aligned to whole parts so the
		// body bytes they happen to cover are never fetched twice
		let fetch_parts: Vec<u64> = (directory_first_part..=last_part)
			.filter(|part| part * part_size < tail_start)
			.collect();
		debug!(?fetch_parts, "directory ranges to fetch");

		let buffers: Arc<Mutex<HashMap<u64, Bytes>>> = Arc::default();

		// priority (a): directory ranges; where the partial view already
		// proves a fetched part's metadata, its body is processed in place
		let mut directory_tasks: JoinSet<Result<()>> = JoinSet::new();
		for &part in &fetch_parts {
			let with_partial =
				(part >= safe_first_part && part < body_parts).then(|| Arc::clone(&partial));
			directory_tasks.spawn(fetch_directory_part(
				Arc::clone(shared),
				Arc::clone(&self.source),
				Arc::clone(&self.sink),
				self.options.output_dir.clone(),
				part,
				part_span(part, part_size, total_size),
				Arc::clone(&buffers),
				with_partial,
				self.options.part_timeout,
			));
		}

		// priority (b): early body parts the partial view can serve
		let mut tasks: JoinSet<Result<()>> = JoinSet::new();
		for part in safe_first_part..body_parts {
			if part >= directory_first_part {
				continue; // owned by a directory fetch above
			}
			tasks.spawn(process_fetched(
				Arc::clone(shared),
				Arc::clone(&self.source),
				Arc::clone(&partial),
				Arc::clone(&self.sink),
				self.options.output_dir.clone(),
				part,
				self.options.part_timeout,
			));
		}

		if let Err(err) = drain(&mut directory_tasks, shared).await {
			shared.cancel.cancel();
			let _ = drain(&mut tasks, shared).await;
			return Err(err);
		}

		let assembled = {
			let buffers = buffers.lock().expect("buffer map poisoned");
			assemble_directory(&bounds, part_size, &buffers, &tail, tail_start)
		};
		let directory = Arc::new(parse_full_directory(
			&assembled,
			&bounds,
			total_size,
			part_size,
		)?);
		info!(members = directory.files.len(), "directory assembled and reparsed");

		// priority (c): everything below the safe line, now fully described
		for part in 0..safe_first_part.min(body_parts) {
			if let Some(buffered) = buffers.lock().expect("buffer map poisoned").get(&part) {
				let span = part_span(part, part_size, total_size);
				let len = (span.end - span.start) as usize;
				tasks.spawn(process_local(
					Arc::clone(shared),
					Arc::clone(&directory),
					Arc::clone(&self.sink),
					self.options.output_dir.clone(),
					part,
					buffered.slice(0..len),
				));
			} else {
				tasks.spawn(process_fetched(
					Arc::clone(shared),
					Arc::clone(&self.source),
					Arc::clone(&directory),
					Arc::clone(&self.sink),
					self.options.output_dir.clone(),
					part,
					self.options.part_timeout,
				));
			}
		}

		drain(&mut tasks, shared).await?;
		Ok(directory)
	}
}

fn part_span(part: u64, part_size: u64, total_size: u64) -> std::ops::Range<u64> {
	let start = part * part_size;
	start..(start + part_size).min(total_size)
}

/// Stitch the central directory together from fetched parts and the tail.
fn assemble_directory(
	bounds: &DirectoryBounds,
	part_size: u64,
	buffers: &HashMap<u64, Bytes>,
	tail: &Bytes,
	tail_start: u64,
) -> Vec<u8> {
	let start = bounds.directory_offset;
	let end = start + bounds.directory_size;
	let mut out = vec![0u8; bounds.directory_size as usize];

	let mut copy = |source: &[u8], source_start: u64| {
		let from = start.max(source_start);
		let to = end.min(source_start + source.len() as u64);
		if from < to {
			out[(from - start) as usize..(to - start) as usize].copy_from_slice(
				&source[(from - source_start) as usize..(to - source_start) as usize],
			);
		}
	};

	for (&part, bytes) in buffers {
		copy(bytes, part * part_size);
	}
	copy(tail, tail_start);
	out
}

async fn acquire(shared: &Shared) -> Result<tokio::sync::OwnedSemaphorePermit> {
	tokio::select! {
		_ = shared.cancel.cancelled() => Err(Error::new(ErrorKind::Canceled)),
		permit = Arc::clone(&shared.semaphore).acquire_owned() => {
			permit.map_err(|_| Error::new(ErrorKind::Canceled))
		}
	}
}

/// Process a part whose bytes are already in memory.
async fn process_local(
	shared: Arc<Shared>,
	directory: Arc<CentralDirectory>,
	sink: Arc<dyn EncodedWriteSink>,
	output_root: PathBuf,
	part: u64,
	bytes: Bytes,
) -> Result<()> {
	let _permit = acquire(&shared).await?;
	debug!(%part, len = bytes.len(), "processing part from buffered bytes");

	let mut processor = PartProcessor::new(directory, part, sink, output_root);
	processor.process_data(&bytes)?;
	processor.finalize()
}

/// Fetch a part and stream it through its processor.
async fn process_fetched<S: RangeSource>(
	shared: Arc<Shared>,
	source: Arc<S>,
	directory: Arc<CentralDirectory>,
	sink: Arc<dyn EncodedWriteSink>,
	output_root: PathBuf,
	part: u64,
	deadline: Duration,
) -> Result<()> {
	let _permit = acquire(&shared).await?;
	let span = directory.part_span(part);
	debug!(%part, ?span, "fetching part");

	let work = async {
		let mut chunks = source.read_range(span.start, span.end - 1).await?;
		let mut processor =
			PartProcessor::new(Arc::clone(&directory), part, sink, output_root);
		loop {
			let next = tokio::select! {
				_ = shared.cancel.cancelled() => return Err(Error::new(ErrorKind::Canceled)),
				next = chunks.try_next() => next?,
			};
			let Some(chunk) = next else { break };
			shared
				.bytes_fetched
				.fetch_add(chunk.len() as u64, Ordering::Relaxed);
			processor.process_data(&chunk)?;
		}
		processor.finalize()
	};

	match timeout(deadline, work).await {
		Ok(result) => result,
		Err(_) => Err(Error::new(ErrorKind::Timeout).at_part(part, span.start)),
	}
}

/// Fetch a whole part for directory assembly, keeping its bytes, and run
/// its body through a processor right away when the partial view allows.
#[allow(clippy::too_many_arguments)]
async fn fetch_directory_part<S: RangeSource>(
	shared: Arc<Shared>,
	source: Arc<S>,
	sink: Arc<dyn EncodedWriteSink>,
	output_root: PathBuf,
	part: u64,
	span: std::ops::Range<u64>,
	buffers: Arc<Mutex<HashMap<u64, Bytes>>>,
	process_with: Option<Arc<CentralDirectory>>,
	deadline: Duration,
) -> Result<()> {
	let _permit = acquire(&shared).await?;
	debug!(%part, ?span, "fetching directory range");

	let work = async {
		let mut chunks = source.read_range(span.start, span.end - 1).await?;
		let mut buffer = BytesMut::with_capacity((span.end - span.start) as usize);
		loop {
			let next = tokio::select! {
				_ = shared.cancel.cancelled() => return Err(Error::new(ErrorKind::Canceled)),
				next = chunks.try_next() => next?,
			};
			let Some(chunk) = next else { break };
			shared
				.bytes_fetched
				.fetch_add(chunk.len() as u64, Ordering::Relaxed);
			buffer.extend_from_slice(&chunk);
		}

		let bytes = buffer.freeze();
		buffers
			.lock()
			.expect("buffer map poisoned")
			.insert(part, bytes.clone());

		if let Some(directory) = process_with {
			debug!(%part, "processing body of directory range with partial metadata");
			let mut processor = PartProcessor::new(directory, part, sink, output_root);
			processor.process_data(&bytes)?;
			processor.finalize()?;
		}
		Ok(())
	};

	match timeout(deadline, work).await {
		Ok(result) => result,
		Err(_) => Err(Error::new(ErrorKind::Timeout).at_part(part, span.start)),
	}
}

/// Join every task; the first non-cancellation error wins and cancels the
/// rest, but everything is awaited before returning.
async fn drain(tasks: &mut JoinSet<Result<()>>, shared: &Shared) -> Result<()> {
	let mut first: Option<Error> = None;
	while let Some(joined) = tasks.join_next().await {
		let result = joined.unwrap_or_else(|err| {
			Err(Error::new(ErrorKind::Io).with_message(format!("part task failed: {err}")))
		});
		if let Err(err) = result {
			if err.kind == ErrorKind::Canceled {
				continue;
			}
			if first.is_none() {
				warn!(%err, "part failed, cancelling peers");
				shared.cancel.cancel();
				first = Some(err);
			}
		}
	}
	match first {
		Some(err) => Err(err),
		None => Ok(()),
	}
}

//! The hybrid path: central directories larger than the tail fetch.

use burst::{Coordinator, ExtractOptions, MemoryRangeSource};

use crate::common::{build_archive, options_at, random_bytes, read_tree};

mod common;

const MIB: usize = 1024 * 1024;

fn small_files(writer: &mut burst::ArchiveWriter<'_, Vec<u8>>, count: usize, seed: u64) {
	for index in 0..count {
		let content = random_bytes(seed ^ index as u64, 40 + index % 300);
		writer
			.add_file(
				&format!("small/{seed}/{index:05}.bin"),
				content.len() as u64,
				None,
				&mut &content[..],
			)
			.unwrap();
	}
}

/// Directory of ~45 KiB against a 4 KiB tail: the directory must be
/// completed over extra ranges, and the result must match the simple path
/// byte for byte.
#[tokio::test]
async fn hybrid_matches_simple_path() {
	let archive = build_archive(|writer| {
		small_files(writer, 600, 21);
	});
	let archive_size = archive.len() as u64;

	let simple_out = tempfile::tempdir().unwrap();
	let simple = Coordinator::new(
		MemoryRangeSource::new(archive.clone(), 64 * 1024),
		options_at(simple_out.path()),
	)
	.extract()
	.await
	.unwrap();

	let hybrid_out = tempfile::tempdir().unwrap();
	let hybrid_source = MemoryRangeSource::new(archive, 64 * 1024);
	let hybrid = Coordinator::new(
		hybrid_source.clone(),
		ExtractOptions {
			tail_length: 4096,
			..options_at(hybrid_out.path())
		},
	)
	.extract()
	.await
	.unwrap();

	assert_eq!(hybrid.members, simple.members);
	let expected = read_tree(simple_out.path());
	assert!(!expected.is_empty());
	assert_eq!(read_tree(hybrid_out.path()), expected);

	// directory ranges are fetched as whole parts and reused as body, so
	// nothing is downloaded twice: strictly better than a naive
	// tail + directory + every-part strategy
	let directory_size = 45_000u64; // ~600 records
	assert!(hybrid.bytes_fetched < archive_size + directory_size);
	assert!(hybrid.bytes_fetched <= archive_size + 4096);
}

/// A tail that holds the end record but not one whole directory record
/// still extracts, with every part scheduled after reassembly.
#[tokio::test]
async fn tail_with_eocd_only() {
	let contents: Vec<Vec<u8>> = (0..5).map(|i| random_bytes(30 + i, 2000)).collect();
	let archive = build_archive(|writer| {
		for (index, content) in contents.iter().enumerate() {
			writer
				.add_file(
					&format!("f{index}.bin"),
					content.len() as u64,
					None,
					&mut &content[..],
				)
				.unwrap();
		}
	});

	let out = tempfile::tempdir().unwrap();
	let summary = Coordinator::new(
		MemoryRangeSource::new(archive, 64 * 1024),
		ExtractOptions {
			tail_length: 30,
			..options_at(out.path())
		},
	)
	.extract()
	.await
	.unwrap();

	assert_eq!(summary.members, 5);
	for (index, content) in contents.iter().enumerate() {
		assert_eq!(
			&std::fs::read(out.path().join(format!("f{index}.bin"))).unwrap(),
			content
		);
	}
}

/// Multi-part body with a spanning member: the buffered directory part is
/// processed locally once the full directory exists.
#[tokio::test]
async fn hybrid_with_spanning_member() {
	let big = random_bytes(40, 9 * MIB);
	let archive = build_archive(|writer| {
		writer
			.add_file("big.bin", big.len() as u64, None, &mut &big[..])
			.unwrap();
		small_files(writer, 400, 41);
	});

	let out = tempfile::tempdir().unwrap();
	let summary = Coordinator::new(
		MemoryRangeSource::new(archive, 128 * 1024),
		ExtractOptions {
			tail_length: 2048,
			..options_at(out.path())
		},
	)
	.extract()
	.await
	.unwrap();

	assert_eq!(summary.members, 401);
	assert_eq!(summary.parts, 2);
	let tree = read_tree(out.path());
	assert_eq!(tree["big.bin"], big);
	assert_eq!(tree.len(), 401 + 2); // members plus the two small/ dirs
}

/// Enough tail to prove part 2's metadata from the partial directory: its
/// body is processed from the directory fetch itself, before the full
/// directory exists, while earlier parts wait for the reparse.
#[tokio::test]
async fn early_dispatch_from_partial_directory() {
	let big0 = random_bytes(50, 9 * MIB); // parts 0 and 1
	let big1 = random_bytes(51, 8 * MIB); // part 1 into part 2
	let archive = build_archive(|writer| {
		writer
			.add_file("big0.bin", big0.len() as u64, None, &mut &big0[..])
			.unwrap();
		small_files(writer, 2000, 52); // part 1
		writer
			.add_file("big1.bin", big1.len() as u64, None, &mut &big1[..])
			.unwrap();
		small_files(writer, 500, 53); // part 2
	});

	let out = tempfile::tempdir().unwrap();
	let source = MemoryRangeSource::new(archive, 256 * 1024);
	let summary = Coordinator::new(
		source.clone(),
		ExtractOptions {
			tail_length: 64 * 1024,
			..options_at(out.path())
		},
	)
	.extract()
	.await
	.unwrap();

	assert_eq!(summary.members, 2502);
	assert_eq!(summary.parts, 3);
	// tail + one request per part, nothing fetched twice
	assert_eq!(source.requests(), 4);

	let tree = read_tree(out.path());
	assert_eq!(tree["big0.bin"], big0);
	assert_eq!(tree["big1.bin"], big1);
}

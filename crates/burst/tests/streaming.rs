//! Chunk-boundary and malformed-input behaviour of the part pipeline.

use std::{path::Path, sync::Arc};

use burst::{
	constants::{BASE_ALIGNMENT, FLAG_DATA_DESCRIPTOR, METHOD_STORE, METHOD_ZSTANDARD, UNIX_EXTRA_ID},
	directory::{parse_archive_tail, CentralDirectory, TailParse},
	error::ErrorKind,
	extract::{PartProcessor, ZstdDecodeSink},
	format::zip::{
		push_extra_block, CentralRecord, DataDescriptor, EndOfCentralDirectory,
		LocalFileHeader, UnixExtraField,
	},
	format::framing::SkippableFrame,
	Coordinator, MemoryRangeSource,
};
use deku::DekuContainerWrite;

use crate::common::{build_archive, options_at, random_bytes, random_chunk_lens, read_tree};

mod common;

const MIB: usize = 1024 * 1024;

fn parse_whole(archive: &[u8]) -> Arc<CentralDirectory> {
	match parse_archive_tail(archive, 0, archive.len() as u64, BASE_ALIGNMENT).unwrap() {
		TailParse::Complete(directory) => Arc::new(directory),
		TailParse::NeedsMore { .. } => panic!("directory must fit"),
	}
}

/// Run every part through its processor, optionally splitting the bytes at
/// seeded pseudo-random positions.
fn run_parts(archive: &[u8], directory: &Arc<CentralDirectory>, out: &Path, split_seed: Option<u64>) {
	for part in 0..directory.part_count() {
		let span = directory.part_span(part);
		let bytes = &archive[span.start as usize..span.end as usize];
		let mut processor = PartProcessor::new(
			Arc::clone(directory),
			part,
			Arc::new(ZstdDecodeSink),
			out.to_path_buf(),
		);

		match split_seed {
			None => processor.process_data(bytes).unwrap(),
			Some(seed) => {
				let mut cursor = 0;
				for len in random_chunk_lens(seed ^ part, bytes.len(), 8192) {
					processor.process_data(&bytes[cursor..cursor + len]).unwrap();
					cursor += len;
				}
			}
		}
		processor.finalize().unwrap();
	}
}

#[test]
fn byte_split_feeding_matches_one_shot() {
	let big = random_bytes(11, 9 * MIB);
	let small = random_bytes(12, 5000);
	let archive = build_archive(|writer| {
		writer
			.add_file("big.bin", big.len() as u64, None, &mut &big[..])
			.unwrap();
		writer
			.add_file("dir/small.bin", small.len() as u64, None, &mut &small[..])
			.unwrap();
		writer.add_file("empty", 0, None, &mut &b""[..]).unwrap();
	});
	let directory = parse_whole(&archive);

	let oneshot = tempfile::tempdir().unwrap();
	run_parts(&archive, &directory, oneshot.path(), None);
	let expected = read_tree(oneshot.path());
	assert_eq!(expected["big.bin"], big);

	for seed in [1u64, 2, 3, 4] {
		let split = tempfile::tempdir().unwrap();
		run_parts(&archive, &directory, split.path(), Some(seed));
		assert_eq!(read_tree(split.path()), expected, "seed {seed}");
	}
}

#[tokio::test]
async fn tiny_response_chunks_end_to_end() {
	let content = random_bytes(13, 40_000);
	let archive = build_archive(|writer| {
		writer
			.add_file("data.bin", content.len() as u64, None, &mut &content[..])
			.unwrap();
	});

	let out = tempfile::tempdir().unwrap();
	Coordinator::new(MemoryRangeSource::new(archive, 777), options_at(out.path()))
		.extract()
		.await
		.unwrap();
	assert_eq!(std::fs::read(out.path().join("data.bin")).unwrap(), content);
}

#[test]
fn truncated_part_reports_unexpected_eof() {
	let content = random_bytes(14, 100_000);
	let archive = build_archive(|writer| {
		writer
			.add_file("data.bin", content.len() as u64, None, &mut &content[..])
			.unwrap();
	});
	let directory = parse_whole(&archive);

	let out = tempfile::tempdir().unwrap();
	let mut processor = PartProcessor::new(
		Arc::clone(&directory),
		0,
		Arc::new(ZstdDecodeSink),
		out.path().to_path_buf(),
	);
	// stop in the middle of a frame
	processor.process_data(&archive[..40_000]).unwrap();
	let err = processor.finalize().unwrap_err();
	assert_eq!(err.kind, ErrorKind::FormatUnexpectedEof);
	assert_eq!(err.part, Some(0));
}

#[test]
fn processor_errors_stick() {
	let archive = build_archive(|writer| {
		writer
			.add_file("a.txt", 5, None, &mut &b"xxxxx"[..])
			.unwrap();
	});
	let directory = parse_whole(&archive);

	let out = tempfile::tempdir().unwrap();
	let mut processor = PartProcessor::new(
		Arc::clone(&directory),
		0,
		Arc::new(ZstdDecodeSink),
		out.path().to_path_buf(),
	);

	let first = processor.process_data(&[0xBA; 64]).unwrap_err();
	assert_eq!(first.kind, ErrorKind::FormatInvalidSignature);
	let again = processor.process_data(&archive[..32]).unwrap_err();
	assert_eq!(again.kind, first.kind);
	assert_eq!(again.message, first.message);
	assert!(processor.finalize().is_err());
}

// ---- hand-assembled archives, for layouts the writer cannot be asked to
// ---- produce on demand

struct Member {
	record: CentralRecord,
}

fn local_header(name: &str, flags: u16, method: u16, crc32: u32, sizes: u32) -> Vec<u8> {
	LocalFileHeader {
		version_needed: 63,
		flags,
		method,
		mod_time: 0,
		mod_date: 0,
		crc32,
		compressed_size: sizes,
		uncompressed_size: sizes,
		name_length: name.len() as u16,
		extra_length: 0,
		name: name.as_bytes().to_vec(),
		extra: Vec::new(),
	}
	.to_bytes()
	.unwrap()
}

fn member_record(
	name: &str,
	offset: u64,
	flags: u16,
	method: u16,
	crc32: u32,
	compressed: u64,
	uncompressed: u64,
	mode: Option<u32>,
) -> Member {
	let mut extra = Vec::new();
	if let Some(mode) = mode {
		let field = UnixExtraField {
			version: 1,
			mode,
			uid: 0,
			gid: 0,
		};
		push_extra_block(&mut extra, UNIX_EXTRA_ID, &field.to_bytes().unwrap());
	}
	Member {
		record: CentralRecord {
			version_made_by: (3 << 8) | 63,
			version_needed: 63,
			flags,
			method,
			mod_time: 0,
			mod_date: 0,
			crc32,
			compressed_size: compressed as u32,
			uncompressed_size: uncompressed as u32,
			name_length: name.len() as u16,
			extra_length: extra.len() as u16,
			comment_length: 0,
			disk_start: 0,
			internal_attributes: 0,
			external_attributes: 0,
			local_header_offset: offset as u32,
			name: name.as_bytes().to_vec(),
			extra,
			comment: Vec::new(),
		},
	}
}

fn seal(mut body: Vec<u8>, members: Vec<Member>) -> Vec<u8> {
	let directory_offset = body.len() as u32;
	for member in &members {
		body.extend_from_slice(&member.record.to_bytes().unwrap());
	}
	let directory_size = body.len() as u32 - directory_offset;
	let eocd = EndOfCentralDirectory {
		disk_number: 0,
		directory_disk: 0,
		records_this_disk: members.len() as u16,
		total_records: members.len() as u16,
		directory_size,
		directory_offset,
		comment_length: 0,
		comment: Vec::new(),
	};
	body.extend_from_slice(&eocd.to_bytes().unwrap());
	body
}

fn crc_of(data: &[u8]) -> u32 {
	let mut hasher = crc32fast::Hasher::new();
	hasher.update(data);
	hasher.finalize()
}

#[tokio::test]
async fn member_with_descriptor_ending_exactly_at_boundary() {
	let content_a = b"hello world!\n";
	let frame_a = zstd::bulk::compress(content_a, 0).unwrap();
	let content_b = random_bytes(15, 4000);
	let frame_b = zstd::bulk::compress(&content_b, 0).unwrap();

	let mut body = Vec::new();
	body.extend_from_slice(&local_header("a", FLAG_DATA_DESCRIPTOR, METHOD_ZSTANDARD, 0, 0));
	body.extend_from_slice(&frame_a);
	// pad inside the data run so header + data + descriptor is exactly one
	// alignment window
	let pad_payload = BASE_ALIGNMENT as usize - 31 - frame_a.len() - 8 - 16;
	body.extend_from_slice(&SkippableFrame::padding(pad_payload as u32).to_bytes().unwrap());
	let compressed_a = (frame_a.len() + 8 + pad_payload) as u64;
	body.extend_from_slice(
		&DataDescriptor {
			crc32: crc_of(content_a),
			compressed_size: compressed_a as u32,
			uncompressed_size: content_a.len() as u32,
		}
		.to_bytes()
		.unwrap(),
	);
	assert_eq!(body.len() as u64, BASE_ALIGNMENT);

	body.extend_from_slice(&local_header("b", FLAG_DATA_DESCRIPTOR, METHOD_ZSTANDARD, 0, 0));
	body.extend_from_slice(&frame_b);
	body.extend_from_slice(
		&DataDescriptor {
			crc32: crc_of(&content_b),
			compressed_size: frame_b.len() as u32,
			uncompressed_size: content_b.len() as u32,
		}
		.to_bytes()
		.unwrap(),
	);

	let archive = seal(
		body,
		vec![
			member_record(
				"a",
				0,
				FLAG_DATA_DESCRIPTOR,
				METHOD_ZSTANDARD,
				crc_of(content_a),
				compressed_a,
				content_a.len() as u64,
				None,
			),
			member_record(
				"b",
				BASE_ALIGNMENT,
				FLAG_DATA_DESCRIPTOR,
				METHOD_ZSTANDARD,
				crc_of(&content_b),
				frame_b.len() as u64,
				content_b.len() as u64,
				None,
			),
		],
	);

	// no continuation: part 1 must open with b's local header
	let directory = parse_whole(&archive);
	assert_eq!(directory.part(1).continuing_file, None);

	let out = tempfile::tempdir().unwrap();
	let summary = Coordinator::new(
		MemoryRangeSource::new(archive, 64 * 1024),
		options_at(out.path()),
	)
	.extract()
	.await
	.unwrap();
	assert_eq!(summary.parts, 2);
	assert_eq!(std::fs::read(out.path().join("a")).unwrap(), content_a);
	assert_eq!(std::fs::read(out.path().join("b")).unwrap(), content_b);
}

#[cfg(unix)]
#[tokio::test]
async fn stored_member_ending_exactly_at_boundary() {
	let content_a = b"first";
	let frame_a = zstd::bulk::compress(content_a, 0).unwrap();
	let target = b"a";

	let mut body = Vec::new();
	body.extend_from_slice(&local_header("a", FLAG_DATA_DESCRIPTOR, METHOD_ZSTANDARD, 0, 0));
	body.extend_from_slice(&frame_a);
	body.extend_from_slice(
		&DataDescriptor {
			crc32: crc_of(content_a),
			compressed_size: frame_a.len() as u32,
			uncompressed_size: content_a.len() as u32,
		}
		.to_bytes()
		.unwrap(),
	);

	// padding between members, then the symlink atom flush against the
	// boundary: header (30 + 3) + 1-byte target
	let atom = 30 + 3 + target.len();
	let pad_payload = BASE_ALIGNMENT as usize - body.len() - 8 - atom;
	body.extend_from_slice(&SkippableFrame::padding(pad_payload as u32).to_bytes().unwrap());
	let link_offset = body.len() as u64;
	let mut link_header = LocalFileHeader {
		version_needed: 10,
		flags: 0,
		method: METHOD_STORE,
		mod_time: 0,
		mod_date: 0,
		crc32: crc_of(target),
		compressed_size: target.len() as u32,
		uncompressed_size: target.len() as u32,
		name_length: 3,
		extra_length: 0,
		name: b"lnk".to_vec(),
		extra: Vec::new(),
	}
	.to_bytes()
	.unwrap();
	body.append(&mut link_header);
	body.extend_from_slice(target);
	assert_eq!(body.len() as u64, BASE_ALIGNMENT);

	let content_b = b"second";
	let frame_b = zstd::bulk::compress(content_b, 0).unwrap();
	body.extend_from_slice(&local_header("b", FLAG_DATA_DESCRIPTOR, METHOD_ZSTANDARD, 0, 0));
	body.extend_from_slice(&frame_b);
	body.extend_from_slice(
		&DataDescriptor {
			crc32: crc_of(content_b),
			compressed_size: frame_b.len() as u32,
			uncompressed_size: content_b.len() as u32,
		}
		.to_bytes()
		.unwrap(),
	);

	let archive = seal(
		body,
		vec![
			member_record(
				"a",
				0,
				FLAG_DATA_DESCRIPTOR,
				METHOD_ZSTANDARD,
				crc_of(content_a),
				frame_a.len() as u64,
				content_a.len() as u64,
				None,
			),
			member_record(
				"lnk",
				link_offset,
				0,
				METHOD_STORE,
				crc_of(target),
				target.len() as u64,
				target.len() as u64,
				Some(0o120777),
			),
			member_record(
				"b",
				BASE_ALIGNMENT,
				FLAG_DATA_DESCRIPTOR,
				METHOD_ZSTANDARD,
				crc_of(content_b),
				frame_b.len() as u64,
				content_b.len() as u64,
				None,
			),
		],
	);

	let out = tempfile::tempdir().unwrap();
	Coordinator::new(
		MemoryRangeSource::new(archive, 64 * 1024),
		options_at(out.path()),
	)
	.extract()
	.await
	.unwrap();

	assert_eq!(std::fs::read(out.path().join("a")).unwrap(), content_a);
	assert_eq!(std::fs::read(out.path().join("b")).unwrap(), content_b);
	assert_eq!(
		std::fs::read_link(out.path().join("lnk")).unwrap(),
		std::path::PathBuf::from("a")
	);
}

/// A member flagged for 64-bit descriptors, with ZIP64 end records: small
/// on disk, but wearing the layout a >4 GiB archive would.
#[tokio::test]
async fn zip64_records_and_wide_descriptors() {
	use burst::format::zip::{
		DataDescriptor64, Zip64EndOfCentralDirectory, Zip64Extra, Zip64Locator,
	};
	use burst::constants::ZIP64_EXTRA_ID;

	let content = random_bytes(16, 3000);
	let frame = zstd::bulk::compress(&content, 0).unwrap();

	let mut body = Vec::new();
	body.extend_from_slice(&local_header("wide", FLAG_DATA_DESCRIPTOR, METHOD_ZSTANDARD, 0, 0));
	body.extend_from_slice(&frame);
	body.extend_from_slice(
		&DataDescriptor64 {
			crc32: crc_of(&content),
			compressed_size: frame.len() as u64,
			uncompressed_size: content.len() as u64,
		}
		.to_bytes()
		.unwrap(),
	);

	// central record saturates both sizes and carries them in the extra
	let mut member = member_record(
		"wide",
		0,
		FLAG_DATA_DESCRIPTOR,
		METHOD_ZSTANDARD,
		crc_of(&content),
		u32::MAX as u64,
		u32::MAX as u64,
		None,
	);
	let zip64 = Zip64Extra {
		uncompressed_size: Some(content.len() as u64),
		compressed_size: Some(frame.len() as u64),
		local_header_offset: None,
	};
	let mut extra = Vec::new();
	burst::format::zip::push_extra_block(&mut extra, ZIP64_EXTRA_ID, &zip64.to_payload());
	member.record.extra_length = extra.len() as u16;
	member.record.extra = extra;

	let directory_offset = body.len() as u64;
	body.extend_from_slice(&member.record.to_bytes().unwrap());
	let directory_size = body.len() as u64 - directory_offset;

	let eocd64_offset = body.len() as u64;
	body.extend_from_slice(
		&Zip64EndOfCentralDirectory {
			record_size: 44,
			version_made_by: (3 << 8) | 63,
			version_needed: 45,
			disk_number: 0,
			directory_disk: 0,
			records_this_disk: 1,
			total_records: 1,
			directory_size,
			directory_offset,
		}
		.to_bytes()
		.unwrap(),
	);
	body.extend_from_slice(
		&Zip64Locator {
			directory_disk: 0,
			eocd64_offset,
			total_disks: 1,
		}
		.to_bytes()
		.unwrap(),
	);
	body.extend_from_slice(
		&EndOfCentralDirectory {
			disk_number: 0,
			directory_disk: 0,
			records_this_disk: 1,
			total_records: 1,
			directory_size: u32::MAX,
			directory_offset: u32::MAX,
			comment_length: 0,
			comment: Vec::new(),
		}
		.to_bytes()
		.unwrap(),
	);

	let directory = parse_whole(&body);
	assert!(directory.files[0].zip64_descriptor);
	assert_eq!(directory.files[0].uncompressed_size, content.len() as u64);

	let out = tempfile::tempdir().unwrap();
	Coordinator::new(MemoryRangeSource::new(body, 4096), options_at(out.path()))
		.extract()
		.await
		.unwrap();
	assert_eq!(std::fs::read(out.path().join("wide")).unwrap(), content);
}

#[tokio::test]
async fn frame_without_content_size_is_corruption() {
	let content_a = b"good file";
	let frame_a = zstd::bulk::compress(content_a, 0).unwrap();

	// a frame with no single-segment flag and no frame content size:
	// window byte, then one last raw block
	let mut bad_frame = vec![0x28, 0xB5, 0x2F, 0xFD, 0x00, 0x00];
	bad_frame.extend_from_slice(&((3u32 << 3) | 0b001).to_le_bytes()[..3]);
	bad_frame.extend_from_slice(b"bad");

	let mut body = Vec::new();
	body.extend_from_slice(&local_header("good", FLAG_DATA_DESCRIPTOR, METHOD_ZSTANDARD, 0, 0));
	body.extend_from_slice(&frame_a);
	body.extend_from_slice(
		&DataDescriptor {
			crc32: crc_of(content_a),
			compressed_size: frame_a.len() as u32,
			uncompressed_size: content_a.len() as u32,
		}
		.to_bytes()
		.unwrap(),
	);
	let bad_offset = body.len() as u64;
	body.extend_from_slice(&local_header("bad", FLAG_DATA_DESCRIPTOR, METHOD_ZSTANDARD, 0, 0));
	body.extend_from_slice(&bad_frame);
	body.extend_from_slice(
		&DataDescriptor {
			crc32: 0,
			compressed_size: bad_frame.len() as u32,
			uncompressed_size: 3,
		}
		.to_bytes()
		.unwrap(),
	);

	let archive = seal(
		body,
		vec![
			member_record(
				"good",
				0,
				FLAG_DATA_DESCRIPTOR,
				METHOD_ZSTANDARD,
				crc_of(content_a),
				frame_a.len() as u64,
				content_a.len() as u64,
				None,
			),
			member_record(
				"bad",
				bad_offset,
				FLAG_DATA_DESCRIPTOR,
				METHOD_ZSTANDARD,
				0,
				bad_frame.len() as u64,
				3,
				None,
			),
		],
	);

	let out = tempfile::tempdir().unwrap();
	let err = Coordinator::new(
		MemoryRangeSource::new(archive, 64 * 1024),
		options_at(out.path()),
	)
	.extract()
	.await
	.unwrap_err();

	assert_eq!(err.kind, ErrorKind::FormatZstdMissingContentSize);
	assert_eq!(err.exit_code(), 3);
	assert_eq!(err.part, Some(0));

	// members before the corruption are intact, nothing was written past
	// the frames that completed
	assert_eq!(std::fs::read(out.path().join("good")).unwrap(), content_a);
	assert_eq!(std::fs::read(out.path().join("bad")).unwrap(), b"");
}

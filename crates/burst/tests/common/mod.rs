//! Shared helpers for the integration suite.
#![allow(dead_code)]

use std::{
	collections::BTreeMap,
	fs::File,
	path::Path,
	sync::Mutex,
};

use burst::{
	encode::{ArchiveWriter, WriterOptions},
	error::Result,
	extract::{EncodedWriteSink, ZstdDecodeSink},
	ExtractOptions,
};
use rand::{rngs::StdRng, RngCore, SeedableRng};

/// Deterministic incompressible bytes.
pub fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
	let mut rng = StdRng::seed_from_u64(seed);
	let mut data = vec![0u8; len];
	rng.fill_bytes(&mut data);
	data
}

/// Deterministic chunk lengths for split-feeding tests.
pub fn random_chunk_lens(seed: u64, total: usize, max: usize) -> Vec<usize> {
	let mut rng = StdRng::seed_from_u64(seed);
	let mut lens = Vec::new();
	let mut left = total;
	while left > 0 {
		let take = (rng.next_u32() as usize % max).clamp(1, left);
		lens.push(take);
		left -= take;
	}
	lens
}

/// Build an archive in memory.
pub fn build_archive(build: impl FnOnce(&mut ArchiveWriter<'_, Vec<u8>>)) -> Vec<u8> {
	let mut out = Vec::new();
	let mut writer = ArchiveWriter::new(&mut out, WriterOptions::default()).unwrap();
	build(&mut writer);
	writer.finish().unwrap();
	out
}

/// Extraction options rooted at `dir`, with the default 8 MiB part size.
pub fn options_at(dir: &Path) -> ExtractOptions {
	ExtractOptions {
		output_dir: dir.to_path_buf(),
		..ExtractOptions::default()
	}
}

/// Snapshot of an extracted tree: relative path to content.
///
/// Directories appear with a trailing `/` and empty content; symlinks carry
/// their target prefixed with `-> `.
pub fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
	let mut out = BTreeMap::new();
	collect_tree(root, root, &mut out);
	out
}

fn collect_tree(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
	for entry in std::fs::read_dir(dir).unwrap() {
		let entry = entry.unwrap();
		let path = entry.path();
		let name = path
			.strip_prefix(root)
			.unwrap()
			.to_string_lossy()
			.replace('\\', "/");

		let kind = entry.file_type().unwrap();
		if kind.is_symlink() {
			let target = std::fs::read_link(&path).unwrap();
			let mut content = b"-> ".to_vec();
			content.extend_from_slice(target.to_string_lossy().as_bytes());
			out.insert(name, content);
		} else if kind.is_dir() {
			out.insert(format!("{name}/"), Vec::new());
			collect_tree(root, &path, out);
		} else {
			out.insert(name, std::fs::read(&path).unwrap());
		}
	}
}

/// Unix mode of a path, without following symlinks.
#[cfg(unix)]
pub fn mode_of(path: &Path) -> u32 {
	use std::os::unix::fs::MetadataExt;
	std::fs::symlink_metadata(path).unwrap().mode() & 0o7777
}

/// A sink that records every encoded write before delegating.
#[derive(Debug, Default)]
pub struct RecordingSink {
	inner: ZstdDecodeSink,
	calls: Mutex<Vec<(u64, u64)>>,
}

impl RecordingSink {
	/// The `(uncompressed_len, file_offset)` of every write, in call order.
	pub fn calls(&self) -> Vec<(u64, u64)> {
		self.calls.lock().unwrap().clone()
	}
}

impl EncodedWriteSink for RecordingSink {
	fn write_encoded(
		&self,
		file: &File,
		frame: &[u8],
		uncompressed_len: u64,
		file_offset: u64,
	) -> Result<()> {
		self.calls
			.lock()
			.unwrap()
			.push((uncompressed_len, file_offset));
		self.inner.write_encoded(file, frame, uncompressed_len, file_offset)
	}
}

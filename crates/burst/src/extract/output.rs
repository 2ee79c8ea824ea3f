//! Materialising members on the local filesystem.

use std::{
	fs::{File, OpenOptions},
	path::{Component, Path, PathBuf},
	sync::Arc,
};

use tracing::{debug, trace, warn};

use crate::{
	constants::MAX_SYMLINK_TARGET,
	directory::FileMetadata,
	error::{Error, ErrorKind, Result},
	extract::sink::EncodedWriteSink,
};

/// The open output of the member a processor is currently reading.
#[derive(Debug)]
pub struct FileContext {
	/// Metadata of the member, from the central directory.
	pub meta: Arc<FileMetadata>,

	/// Next uncompressed offset a frame will land at.
	pub uncompressed_offset: u64,

	path: PathBuf,
	kind: OutputKind,
}

#[derive(Debug)]
enum OutputKind {
	/// A regular file, opened without truncation so sibling parts can write
	/// their own spans concurrently.
	Regular(File),

	/// A directory; created on open, nothing more to write.
	Directory,

	/// A symlink; the stored content (the target) accumulates here.
	Symlink(Vec<u8>),
}

impl FileContext {
	/// Open the output for a member, creating parent directories.
	///
	/// For a member continuing from an earlier part, `uncompressed_offset`
	/// starts wherever the start-of-part frame says; new members start at
	/// zero.
	pub fn open(root: &Path, meta: Arc<FileMetadata>, uncompressed_offset: u64) -> Result<Self> {
		let path = root.join(sanitized(&meta.name)?);

		let kind = if meta.is_directory {
			trace!(?path, "create directory member");
			std::fs::create_dir_all(&path)?;
			OutputKind::Directory
		} else if meta.is_symlink {
			if meta.uncompressed_size == 0 || meta.uncompressed_size > MAX_SYMLINK_TARGET {
				return Err(Error::new(ErrorKind::FormatUnexpectedFrame).with_message(format!(
					"symlink {:?} declares a {}-byte target",
					meta.name, meta.uncompressed_size
				)));
			}
			OutputKind::Symlink(Vec::with_capacity(meta.uncompressed_size as usize))
		} else {
			if let Some(parent) = path.parent() {
				std::fs::create_dir_all(parent)?;
			}
			trace!(?path, offset = uncompressed_offset, "open file member");
			let file = OpenOptions::new().write(true).create(true).open(&path)?;
			OutputKind::Regular(file)
		};

		Ok(Self {
			meta,
			uncompressed_offset,
			path,
			kind,
		})
	}

	/// Hand one compressed frame to the sink and advance the write offset.
	pub fn write_frame(
		&mut self,
		sink: &dyn EncodedWriteSink,
		frame: &[u8],
		uncompressed_len: u64,
	) -> Result<()> {
		let OutputKind::Regular(file) = &self.kind else {
			return Err(Error::new(ErrorKind::FormatUnexpectedFrame).with_message(format!(
				"compressed frame inside non-regular member {:?}",
				self.meta.name
			)));
		};
		sink.write_encoded(file, frame, uncompressed_len, self.uncompressed_offset)?;
		self.uncompressed_offset += uncompressed_len;
		Ok(())
	}

	/// Whether this member reads its content as raw stored bytes.
	pub fn is_symlink(&self) -> bool {
		matches!(self.kind, OutputKind::Symlink(_))
	}

	/// Raw stored bytes still missing before the symlink target is whole.
	pub fn symlink_remaining(&self) -> u64 {
		match &self.kind {
			OutputKind::Symlink(buf) => self.meta.uncompressed_size - buf.len() as u64,
			_ => 0,
		}
	}

	/// Accumulate raw stored bytes of the symlink target.
	pub fn push_symlink_bytes(&mut self, bytes: &[u8]) {
		if let OutputKind::Symlink(buf) = &mut self.kind {
			buf.extend_from_slice(bytes);
		}
	}

	/// Close the member: size, permissions, ownership, or the link itself.
	///
	/// Called when the member's data descriptor (or next header) arrives,
	/// and again by whichever other part holds a span of the same file;
	/// every step is idempotent.
	pub fn close(self) -> Result<()> {
		match self.kind {
			OutputKind::Regular(file) => {
				file.set_len(self.meta.uncompressed_size)?;
				apply_unix_metadata(&self.meta, &self.path, Some(&file));
				debug!(path = ?self.path, size = self.meta.uncompressed_size, "closed file");
			}
			OutputKind::Directory => {
				apply_unix_metadata(&self.meta, &self.path, None);
			}
			OutputKind::Symlink(target) => {
				if (target.len() as u64) < self.meta.uncompressed_size {
					return Err(Error::new(ErrorKind::FormatUnexpectedEof).with_message(
						format!("symlink {:?} target cut short", self.meta.name),
					));
				}
				replace_with_symlink(&self.path, &target)?;
				debug!(path = ?self.path, "created symlink");
			}
		}
		Ok(())
	}
}

/// Reject names that would escape the output root.
fn sanitized(name: &str) -> Result<&Path> {
	let path = Path::new(name);
	let safe = path.components().all(|component| {
		matches!(component, Component::Normal(_) | Component::CurDir)
	});
	if !safe || name.is_empty() {
		return Err(Error::new(ErrorKind::FormatInvalidSignature)
			.with_message(format!("member name {name:?} escapes the output directory")));
	}
	Ok(path)
}

#[cfg(unix)]
fn apply_unix_metadata(meta: &FileMetadata, path: &Path, file: Option<&File>) {
	use std::fs::Permissions;
	use std::os::unix::fs::PermissionsExt;

	let Some(unix) = meta.unix else { return };

	let permissions = Permissions::from_mode(unix.mode & 0o7777);
	let result = match file {
		Some(file) => file.set_permissions(permissions),
		None => std::fs::set_permissions(path, permissions),
	};
	if let Err(err) = result {
		warn!(?path, %err, "could not apply mode");
	}

	// ownership only sticks for privileged processes; anyone else just
	// keeps their own uid/gid
	let uid = Some(nix::unistd::Uid::from_raw(unix.uid));
	let gid = Some(nix::unistd::Gid::from_raw(unix.gid));
	if let Err(err) = nix::unistd::chown(path, uid, gid) {
		trace!(?path, %err, "skipping ownership");
	}
}

#[cfg(not(unix))]
fn apply_unix_metadata(_meta: &FileMetadata, _path: &Path, _file: Option<&File>) {}

#[cfg(unix)]
fn replace_with_symlink(path: &Path, target: &[u8]) -> Result<()> {
	use std::ffi::OsStr;
	use std::os::unix::ffi::OsStrExt;

	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}

	// build the link under a scratch name, then rename over whatever sits
	// at the destination
	let scratch = path.with_extension("burst-link");
	let _ = std::fs::remove_file(&scratch);
	std::os::unix::fs::symlink(OsStr::from_bytes(target), &scratch)?;
	std::fs::rename(&scratch, path)?;
	Ok(())
}

#[cfg(not(unix))]
fn replace_with_symlink(path: &Path, _target: &[u8]) -> Result<()> {
	Err(Error::new(ErrorKind::Io)
		.with_message(format!("cannot create symlink {path:?} on this platform")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_escaping_names() {
		assert!(sanitized("ok/name.txt").is_ok());
		assert!(sanitized("dir/").is_ok());
		assert!(sanitized("/etc/passwd").is_err());
		assert!(sanitized("../outside").is_err());
		assert!(sanitized("a/../../outside").is_err());
		assert!(sanitized("").is_err());
	}
}

//! Boundary alignment decisions for the writer.
//!
//! Before each element goes out, the writer asks where it may land so that
//! every multiple of the base alignment in the finished body is the first
//! byte of a local header, a Zstandard frame, a padding frame, or a
//! start-of-part frame. Elements are either a single Zstandard frame
//! (optionally bundled with the data descriptor that ends its file) or an
//! atom that must never straddle a boundary at all: a local header, or a
//! whole stored member.

use crate::constants::{BASE_ALIGNMENT, SKIPPABLE_FRAME_OVERHEAD};

/// Where an element may be written relative to the next boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Placement {
	/// Write the element where the cursor stands.
	///
	/// When `start_of_part_after` is set the element ends exactly on the
	/// boundary with its file still open, and a start-of-part frame must
	/// follow immediately.
	Emit {
		/// Emit a start-of-part frame right after the element.
		start_of_part_after: bool,
	},

	/// Pad to the boundary first, then write the element there.
	PadFirst {
		/// Payload length of the padding frame that reaches the boundary.
		pad_payload: u32,

		/// Emit a start-of-part frame at the boundary, before the element;
		/// set whenever a file is open across it.
		start_of_part: bool,
	},
}

/// Decides frame placement against the 8 MiB sub-grid.
#[derive(Clone, Copy, Debug)]
pub struct AlignmentEngine {
	alignment: u64,
}

impl Default for AlignmentEngine {
	fn default() -> Self {
		Self {
			alignment: BASE_ALIGNMENT,
		}
	}
}

impl AlignmentEngine {
	/// Engine over a non-standard grid, for tests.
	#[cfg(test)]
	pub(crate) fn with_alignment(alignment: u64) -> Self {
		Self { alignment }
	}

	/// Bytes left before the next boundary; a cursor exactly on a boundary
	/// has the whole window ahead of it.
	fn space(&self, offset: u64) -> u64 {
		self.alignment - offset % self.alignment
	}

	/// Place one element of `required` bytes at `offset`.
	///
	/// `file_open_before` tells whether a member's data run is in progress
	/// as the element is emitted; `file_open_after` whether it still is
	/// once the element (and any bundled descriptor) is down. These differ
	/// exactly for the final frame of a member.
	pub fn place(
		&self,
		offset: u64,
		required: u64,
		file_open_before: bool,
		file_open_after: bool,
	) -> Placement {
		let space = self.space(offset);
		debug_assert!(
			required + SKIPPABLE_FRAME_OVERHEAD <= self.alignment,
			"element of {required} bytes cannot respect a {} byte grid",
			self.alignment
		);
		debug_assert!(space == self.alignment || space >= SKIPPABLE_FRAME_OVERHEAD);

		if space == required {
			Placement::Emit {
				start_of_part_after: file_open_after,
			}
		} else if space >= required + SKIPPABLE_FRAME_OVERHEAD {
			Placement::Emit {
				start_of_part_after: false,
			}
		} else {
			Placement::PadFirst {
				pad_payload: (space - SKIPPABLE_FRAME_OVERHEAD) as u32,
				start_of_part: file_open_before,
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const A: u64 = 1024;

	#[test]
	fn loose_fit_emits_in_place() {
		let engine = AlignmentEngine::with_alignment(A);
		assert_eq!(
			engine.place(0, 100, true, true),
			Placement::Emit {
				start_of_part_after: false
			}
		);
		// exactly eight spare bytes still fit a minimum padding frame later
		assert_eq!(
			engine.place(A - 108, 100, true, true),
			Placement::Emit {
				start_of_part_after: false
			}
		);
	}

	#[test]
	fn exact_fit_lands_on_the_boundary() {
		let engine = AlignmentEngine::with_alignment(A);
		// mid-file: the boundary needs a start-of-part frame after the frame
		assert_eq!(
			engine.place(A - 100, 100, true, true),
			Placement::Emit {
				start_of_part_after: true
			}
		);
		// final frame + descriptor: the file closes on the boundary, the
		// next local header simply starts there
		assert_eq!(
			engine.place(A - 100, 100, true, false),
			Placement::Emit {
				start_of_part_after: false
			}
		);
	}

	#[test]
	fn tight_fit_pads_to_the_boundary() {
		let engine = AlignmentEngine::with_alignment(A);
		// 104 bytes of space for 100 required: too tight for a later pad,
		// so pad now with a 96-byte payload
		assert_eq!(
			engine.place(A - 104, 100, true, true),
			Placement::PadFirst {
				pad_payload: 96,
				start_of_part: true
			}
		);
		// same geometry between members: no start-of-part
		assert_eq!(
			engine.place(A - 104, 100, false, false),
			Placement::PadFirst {
				pad_payload: 96,
				start_of_part: false
			}
		);
		// a final frame whose descriptor no longer fits moves past the
		// boundary whole; the file is open as the boundary is crossed
		assert_eq!(
			engine.place(A - 100, 90 + 16, true, false),
			Placement::PadFirst {
				pad_payload: 92,
				start_of_part: true
			}
		);
	}

	#[test]
	fn cursor_on_boundary_has_a_full_window() {
		let engine = AlignmentEngine::with_alignment(A);
		assert_eq!(
			engine.place(3 * A, 100, true, true),
			Placement::Emit {
				start_of_part_after: false
			}
		);
	}
}

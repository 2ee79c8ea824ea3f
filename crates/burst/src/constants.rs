//! Magic numbers and format parameters.

/// Magic of a ZIP local file header, little-endian (`PK\x03\x04`).
pub const LOCAL_HEADER_MAGIC: u32 = 0x04034B50;

/// Magic of a ZIP data descriptor, little-endian (`PK\x07\x08`).
pub const DATA_DESCRIPTOR_MAGIC: u32 = 0x08074B50;

/// Magic of a ZIP central directory record, little-endian (`PK\x01\x02`).
pub const CENTRAL_RECORD_MAGIC: u32 = 0x02014B50;

/// Magic of the ZIP end-of-central-directory record, little-endian (`PK\x05\x06`).
pub const EOCD_MAGIC: u32 = 0x06054B50;

/// Magic of the ZIP64 end-of-central-directory record, little-endian (`PK\x06\x06`).
pub const EOCD64_MAGIC: u32 = 0x06064B50;

/// Magic of the ZIP64 end-of-central-directory locator, little-endian (`PK\x06\x07`).
pub const EOCD64_LOCATOR_MAGIC: u32 = 0x07064B50;

/// Magic of a Zstandard compressed frame, little-endian.
pub const ZSTANDARD_FRAME_MAGIC: u32 = 0xFD2FB528;

/// The one skippable-frame magic burst emits and recognises.
///
/// RFC 8878 reserves `0x184D2A50..=0x184D2A5F` for skippable frames; burst
/// claims the `B` nibble for both padding and start-of-part frames.
pub const BURST_SKIPPABLE_MAGIC: u32 = 0x184D2A5B;

/// Payload type byte marking a start-of-part frame.
pub const START_OF_PART_TAG: u8 = 0x01;

/// Wire length of a start-of-part frame (magic + length + 16-byte payload).
pub const START_OF_PART_FRAME_LEN: u64 = 24;

/// Smallest possible skippable frame: magic + length word, empty payload.
pub const SKIPPABLE_FRAME_OVERHEAD: u64 = 8;

/// The sub-grid on which frame boundaries are guaranteed, in bytes.
///
/// Every multiple of this offset inside the archive body is the first byte
/// of a local file header, a Zstandard frame, a padding frame, or a
/// start-of-part frame, whatever part size an extractor chooses.
pub const BASE_ALIGNMENT: u64 = 8 * 1024 * 1024;

/// Smallest allowed part size.
pub const MIN_PART_SIZE: u64 = BASE_ALIGNMENT;

/// Largest allowed part size.
pub const MAX_PART_SIZE: u64 = 64 * 1024 * 1024;

/// Default part size.
pub const DEFAULT_PART_SIZE: u64 = BASE_ALIGNMENT;

/// Default number of concurrently processed parts.
pub const DEFAULT_CONCURRENT_PARTS: usize = 8;

/// Largest number of concurrently processed parts.
pub const MAX_CONCURRENT_PARTS: usize = 16;

/// Default length of the archive-tail fetch used to find the central directory.
pub const DEFAULT_TAIL_LENGTH: u64 = 8 * 1024 * 1024;

/// Uncompressed content carried per Zstandard frame by the writer.
///
/// Bounds the staging memory an extractor needs to reassemble a frame that
/// straddles response chunks.
pub const CONTENT_FRAME_SIZE: usize = 128 * 1024;

/// ZIP compression method for Zstandard (APPNOTE 4.4.5).
pub const METHOD_ZSTANDARD: u16 = 93;

/// ZIP compression method for stored (uncompressed) members.
pub const METHOD_STORE: u16 = 0;

/// General-purpose flag bit 3: sizes unknown at header time, descriptor follows.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// Version needed to extract a stored member.
pub const VERSION_STORE: u16 = 10;

/// Version needed to extract a Zstandard member.
pub const VERSION_ZSTANDARD: u16 = 63;

/// Version needed to extract ZIP64 structures.
pub const VERSION_ZIP64: u16 = 45;

/// Extra-field ID for burst's Unix metadata block (`BU` little-endian).
pub const UNIX_EXTRA_ID: u16 = 0x5542;

/// Extra-field ID for the standard ZIP64 extended-information block.
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Longest symlink target the extractor will accumulate.
pub const MAX_SYMLINK_TARGET: u64 = 64 * 1024;

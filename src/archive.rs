//! Finding and reading one entry of a ZIP archive.
//!
//! To look inside an archive, create a [`QuizArchive`] from its bytes,
//! [`locate`](QuizArchive::locate) an entry by name, then [`read`](QuizArchive::read) it.
//! [`read_entry`] does all of that for a file on disk,
//! holding the file open only while it reads.

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Read};

use camino::Utf8Path;
use chrono::NaiveDateTime;
use flate2::read::DeflateDecoder;
use log::*;
use memmap2::Mmap;

use crate::arch::usize;
use crate::crc_reader::VerifyingReader;
use crate::result::*;
use crate::spec;

/// The name of the entry holding a digistorm quiz
pub const QUIZ_ENTRY: &str = "donnees.json";

/// The compression method used to store an entry
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The entry is uncompressed
    None,
    /// The entry is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    Deflate,
    /// The entry is compressed with an unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

/// Metadata for an entry in the archive,
/// retrieved from its central directory
#[derive(Debug, PartialEq, Eq)]
pub struct EntryMetadata<'a> {
    /// Uncompressed size of the entry in bytes
    pub size: usize,

    /// Compressed size of the entry in bytes
    pub compressed_size: usize,

    pub compression_method: CompressionMethod,

    /// The CRC-32 of the decompressed entry
    pub crc32: u32,

    /// True if the entry is encrypted (decryption is unsupported)
    pub encrypted: bool,

    /// True if the sizes and CRC were written after the data
    /// instead of in the local file header
    pub has_data_descriptor: bool,

    /// The entry's name, as stored (including any directories)
    pub name: Cow<'a, str>,

    /// When the entry was last modified, if the stored timestamp makes sense
    pub last_modified: Option<NaiveDateTime>,

    /// The offset to the local file header in the archive
    pub(crate) header_offset: usize,
}

/// A ZIP archive to be searched
pub struct QuizArchive<'a> {
    /// The contents of the ZIP archive, as a byte slice,
    /// starting where the archive (not any prepended data) starts.
    mapping: &'a [u8],
    /// A list of entries from the ZIP's central directory
    entries: Vec<EntryMetadata<'a>>,
    /// Central directory entries we couldn't make sense of
    unusable: Vec<UnusableEntry<'a>>,
}

/// A central directory entry that didn't yield [`EntryMetadata`]
/// (bad UTF-8 name, another disk, Zip64 sizes...)
struct UnusableEntry<'a> {
    /// The number of usable entries before it in the central directory
    position: usize,
    record: spec::CentralDirectoryEntry<'a>,
}

impl UnusableEntry<'_> {
    fn is_named(&self, name: &str) -> bool {
        self.record.name().map_or(false, |n| n == name)
    }

    /// Rebuilds the error that made the entry unusable.
    fn error(&self) -> ExportError {
        match EntryMetadata::from_cde(&self.record) {
            Err(e) => e,
            Ok(metadata) => ExportError::UnsupportedArchive(format!(
                "Unusable entry {}",
                metadata.name
            )),
        }
    }
}

impl<'a> QuizArchive<'a> {
    /// Reads a ZIP archive's central directory from a byte slice.
    ///
    /// Since a ZIP archive's metadata sits at the back of the file,
    /// some tools prepend other data to it (self-extracting archives, for one).
    /// That's tolerated; the offset is logged.
    pub fn new(mapping: &'a [u8]) -> ExportResult<Self> {
        let eocdr_posit = spec::find_eocdr(mapping)?;
        let eocdr = spec::EndOfCentralDirectory::parse(&mapping[eocdr_posit..])?;
        trace!("{:?}", eocdr);

        if eocdr.disk_number != eocdr.disk_with_central_directory {
            return Err(ExportError::UnsupportedArchive(format!(
                "No support for multi-disk archives: disk ({}) != disk with central directory ({})",
                eocdr.disk_number, eocdr.disk_with_central_directory
            )));
        }
        if eocdr.entries != eocdr.entries_on_this_disk {
            return Err(ExportError::UnsupportedArchive(format!(
                "No support for multi-disk archives: entries ({}) != entries this disk ({})",
                eocdr.entries, eocdr.entries_on_this_disk
            )));
        }
        if spec::has_zip64_locator(mapping, eocdr_posit) || eocdr.needs_zip64() {
            return Err(ExportError::UnsupportedArchive(String::from(
                "No support for Zip64 archives",
            )));
        }

        // Zip files can be prepended by arbitrary junk,
        // so all the given positions might be off.
        // The offset is the actual position versus the stored one.
        let central_directory_size = usize(eocdr.central_directory_size)?;
        let nominal_offset = usize(eocdr.central_directory_offset)?;
        let actual_cdr_posit = eocdr_posit
            .checked_sub(central_directory_size)
            .ok_or(ExportError::InvalidArchive("Invalid central directory size"))?;
        let archive_offset = actual_cdr_posit
            .checked_sub(nominal_offset)
            .ok_or(ExportError::InvalidArchive("Invalid central directory offset"))?;
        if archive_offset != 0 {
            warn!("Archive is prepended with {} unknown bytes", archive_offset);
        }

        let mapping = &mapping[archive_offset..];
        trace!("{} entries at nominal offset {}", eocdr.entries, nominal_offset);

        let mut central_directory =
            &mapping[nominal_offset..nominal_offset + central_directory_size];
        let mut entries = Vec::with_capacity(usize(eocdr.entries)?);
        let mut unusable = Vec::new();
        for _ in 0..eocdr.entries {
            let dir_entry = spec::CentralDirectoryEntry::parse_and_consume(&mut central_directory)?;
            trace!("{:?}", dir_entry);

            // An entry we can't use is only an error if it's the one asked for.
            match EntryMetadata::from_cde(&dir_entry) {
                Ok(metadata) => {
                    debug!("{:?}", metadata);
                    entries.push(metadata);
                }
                Err(e) => {
                    warn!(
                        "Skipping entry {}: {}",
                        String::from_utf8_lossy(dir_entry.path),
                        e
                    );
                    unusable.push(UnusableEntry {
                        position: entries.len(),
                        record: dir_entry,
                    });
                }
            }
        }

        Ok(QuizArchive {
            mapping,
            entries,
            unusable,
        })
    }

    /// Returns the usable entries found in the ZIP archive's central directory,
    /// in the order they're stored.
    pub fn entries(&self) -> &[EntryMetadata<'a>] {
        &self.entries
    }

    /// Returns the first usable entry whose stored name is exactly `name`.
    ///
    /// No path normalization happens: `quiz/donnees.json` isn't `donnees.json`.
    pub fn find(&self, name: &str) -> Option<&EntryMetadata<'a>> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Like [`find`](Self::find), but if the first entry named `name`
    /// couldn't be used, returns why instead of skipping it.
    pub fn locate(&self, name: &'static str) -> ExportResult<&EntryMetadata<'a>> {
        let usable = self.entries.iter().position(|entry| entry.name == name);
        let unusable = self.unusable.iter().find(|entry| entry.is_named(name));
        match (usable, unusable) {
            (Some(i), Some(skipped)) if skipped.position > i => Ok(&self.entries[i]),
            (Some(i), None) => Ok(&self.entries[i]),
            (_, Some(skipped)) => Err(skipped.error()),
            (None, None) => Err(ExportError::EntryNotFound(name)),
        }
    }

    /// Returns a reader over the given entry's decompressed contents.
    ///
    /// The reader checks the entry's CRC-32 and size when it hits EOF,
    /// so read it to the end.
    pub fn read(&self, metadata: &EntryMetadata) -> ExportResult<Box<dyn Read + 'a>> {
        if metadata.encrypted {
            return Err(ExportError::UnsupportedArchive(format!(
                "Can't read encrypted file {}",
                metadata.name
            )));
        }

        let mut file_slice = self
            .mapping
            .get(metadata.header_offset..)
            .ok_or(ExportError::InvalidArchive("Local file header out of bounds"))?;
        let local_header = spec::LocalFileHeader::parse_and_consume(&mut file_slice)?;
        trace!("{:?}", local_header);
        if !metadata.matches_local_header(&local_header)? {
            return Err(ExportError::InvalidArchive(
                "Central directory entry doesn't match local file header",
            ));
        }

        let compressed = file_slice
            .get(..metadata.compressed_size)
            .ok_or(ExportError::InvalidArchive("Entry data out of bounds"))?;
        make_reader(metadata, io::Cursor::new(compressed))
    }
}

/// Returns a boxed reader for an entry,
/// given its compression method and expected CRC.
fn make_reader<'a, R: Read + 'a>(
    metadata: &EntryMetadata,
    reader: R,
) -> ExportResult<Box<dyn Read + 'a>> {
    let size = metadata.size as u64;
    match metadata.compression_method {
        CompressionMethod::None => Ok(Box::new(VerifyingReader::new(
            reader,
            metadata.crc32,
            size,
        ))),
        CompressionMethod::Deflate => {
            let deflate_reader = DeflateDecoder::new(reader);
            Ok(Box::new(VerifyingReader::new(
                deflate_reader,
                metadata.crc32,
                size,
            )))
        }
        CompressionMethod::Unsupported(code) => Err(ExportError::UnsupportedArchive(format!(
            "Compression method {code} not supported for {}",
            metadata.name
        ))),
    }
}

/// Maps the archive at `zip_path` and returns the decompressed contents
/// of its entry named `name`.
///
/// The file and its mapping are released before this returns, whatever happens.
pub fn read_entry(zip_path: &Utf8Path, name: &'static str) -> ExportResult<Vec<u8>> {
    info!("Memory mapping {}", zip_path);
    let zip_file = File::open(zip_path).map_err(|source| ExportError::ArchiveOpen {
        path: zip_path.to_owned(),
        source,
    })?;
    // Safety: the mapping is read-only and dropped before we return.
    // Another process truncating the file underneath us is the usual mmap caveat.
    let mapping = unsafe { Mmap::map(&zip_file) }.map_err(|source| ExportError::ArchiveOpen {
        path: zip_path.to_owned(),
        source,
    })?;

    let archive = QuizArchive::new(&mapping)?;
    let entry = archive.locate(name)?;
    info!(
        "Found {} ({} bytes, last modified {})",
        entry.name,
        entry.size,
        entry
            .last_modified
            .map(|t| t.to_string())
            .unwrap_or_else(|| String::from("unknown"))
    );

    let mut contents = Vec::with_capacity(entry.size);
    archive
        .read(entry)?
        .read_to_end(&mut contents)
        .map_err(ExportError::EntryRead)?;
    Ok(contents)
}

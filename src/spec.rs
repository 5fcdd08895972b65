//! Code specific to the ZIP file format specification.
//!
//! We keep the nitty gritty here,
//! and the higher-level lookup in the [`archive`] module.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//! Only the records needed to find and read a single entry are parsed:
//! the End of central directory record, central directory entries,
//! and local file headers.
//!
//! [`archive`]: ../archive/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use std::borrow::Cow;
use std::convert::TryInto;

use chrono::{NaiveDate, NaiveDateTime};
use codepage_437::*;
use memchr::memmem;

use crate::arch::usize;
use crate::archive::{CompressionMethod, EntryMetadata};
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory locator magic number
const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];

const EOCDR_SIZE: usize = 22;
const ZIP64_EOCDR_LOCATOR_SIZE: usize = 20;

impl CompressionMethod {
    fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::None,
            8 => CompressionMethod::Deflate,
            v => CompressionMethod::Unsupported(v),
        }
    }
}

/// Splits `len` bytes off the front of the provided slice, shrinking it.
fn take<'a>(input: &mut &'a [u8], len: usize, what: &'static str) -> ExportResult<&'a [u8]> {
    if input.len() < len {
        return Err(ExportError::InvalidArchive(what));
    }
    let (front, rest) = input.split_at(len);
    *input = rest;
    Ok(front)
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8], what: &'static str) -> ExportResult<u32> {
    let bytes = take(input, 4, what)?;
    Ok(u32::from_le_bytes(bytes.try_into().expect("took four bytes")))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8], what: &'static str) -> ExportResult<u16> {
    let bytes = take(input, 2, what)?;
    Ok(u16::from_le_bytes(bytes.try_into().expect("took two bytes")))
}

/// Data from the End of central directory record
#[derive(Debug)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
}

impl EndOfCentralDirectory {
    pub fn parse(mut eocdr: &[u8]) -> ExportResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        const TRUNCATED: &str = "Truncated End Of Central Directory Record";

        if take(&mut eocdr, 4, TRUNCATED)? != EOCDR_MAGIC {
            return Err(ExportError::InvalidArchive(
                "Couldn't find End Of Central Directory Record",
            ));
        }
        let disk_number = read_u16(&mut eocdr, TRUNCATED)?;
        let disk_with_central_directory = read_u16(&mut eocdr, TRUNCATED)?;
        let entries_on_this_disk = read_u16(&mut eocdr, TRUNCATED)?;
        let entries = read_u16(&mut eocdr, TRUNCATED)?;
        let central_directory_size = read_u32(&mut eocdr, TRUNCATED)?;
        let central_directory_offset = read_u32(&mut eocdr, TRUNCATED)?;
        let comment_length = usize(read_u16(&mut eocdr, TRUNCATED)?)?;
        // The comment itself is never used, but it has to be there.
        take(&mut eocdr, comment_length, TRUNCATED)?;

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
        })
    }

    /// Offsets maxed out mean the real values live in a Zip64 record.
    ///
    /// An entry count of 0xFFFF is left alone:
    /// exactly 65535 entries is a legal plain ZIP,
    /// and a real Zip64 archive carries a locator anyway.
    pub fn needs_zip64(&self) -> bool {
        self.central_directory_size == u32::MAX || self.central_directory_offset == u32::MAX
    }
}

/// Searches backward through `mapping` to find the
/// End of central directory record.
///
/// It should be right at the end of the file,
/// but its variable size means we can't jump to a known offset.
pub fn find_eocdr(mapping: &[u8]) -> ExportResult<usize> {
    if mapping.len() < EOCDR_SIZE {
        return Err(ExportError::InvalidArchive(
            "Too small to be a Zip archive",
        ));
    }
    memmem::rfind(mapping, &EOCDR_MAGIC).ok_or(ExportError::InvalidArchive(
        "Couldn't find End Of Central Directory Record",
    ))
}

/// Returns true if a Zip64 end of central directory locator
/// immediately precedes the EOCDR at `eocdr_posit`.
pub fn has_zip64_locator(mapping: &[u8], eocdr_posit: usize) -> bool {
    // 4.3.15 Zip64 end of central directory locator
    //
    // zip64 end of central dir locator
    // signature                       4 bytes  (0x07064b50)
    eocdr_posit
        .checked_sub(ZIP64_EOCDR_LOCATOR_SIZE)
        .map(|posit| mapping[posit..].starts_with(&ZIP64_EOCDR_LOCATOR_MAGIC))
        .unwrap_or(false)
}

/// Data from a central directory entry
///
/// Each of these records contains information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug)]
pub struct CentralDirectoryEntry<'a> {
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub header_offset: u32,
    pub path: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    pub fn parse_and_consume(entry: &mut &'a [u8]) -> ExportResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        const TRUNCATED: &str = "Truncated central directory entry";

        if take(entry, 4, TRUNCATED)? != CENTRAL_DIRECTORY_MAGIC {
            return Err(ExportError::InvalidArchive(
                "Invalid central directory entry",
            ));
        }
        let _source_version = read_u16(entry, TRUNCATED)?;
        let _minimum_extract_version = read_u16(entry, TRUNCATED)?;
        let flags = read_u16(entry, TRUNCATED)?;
        let compression_method = read_u16(entry, TRUNCATED)?;
        let last_modified_time = read_u16(entry, TRUNCATED)?;
        let last_modified_date = read_u16(entry, TRUNCATED)?;
        let crc32 = read_u32(entry, TRUNCATED)?;
        let compressed_size = read_u32(entry, TRUNCATED)?;
        let uncompressed_size = read_u32(entry, TRUNCATED)?;
        let path_length = usize(read_u16(entry, TRUNCATED)?)?;
        let extra_field_length = usize(read_u16(entry, TRUNCATED)?)?;
        let file_comment_length = usize(read_u16(entry, TRUNCATED)?)?;
        let disk_number = read_u16(entry, TRUNCATED)?;
        let _internal_file_attributes = read_u16(entry, TRUNCATED)?;
        let _external_file_attributes = read_u32(entry, TRUNCATED)?;
        let header_offset = read_u32(entry, TRUNCATED)?;
        let path = take(entry, path_length, TRUNCATED)?;
        take(entry, extra_field_length, TRUNCATED)?;
        take(entry, file_comment_length, TRUNCATED)?;

        Ok(Self {
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            header_offset,
            path,
        })
    }

    /// Decodes the entry's name per its UTF-8 flag.
    pub fn name(&self) -> ExportResult<Cow<'a, str>> {
        decode_name(self.flags, self.path)
    }
}

/// Data from a local file header
///
/// Each file's actual contents is preceded by this header.
/// We read entries through the central directory,
/// so this is only parsed to skip it and to cross-check the directory.
#[derive(Debug)]
pub struct LocalFileHeader<'a> {
    pub flags: u16,
    pub compression_method: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path: &'a [u8],
}

impl<'a> LocalFileHeader<'a> {
    pub fn parse_and_consume(header: &mut &'a [u8]) -> ExportResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        const TRUNCATED: &str = "Truncated local file header";

        if take(header, 4, TRUNCATED)? != LOCAL_FILE_HEADER_MAGIC {
            return Err(ExportError::InvalidArchive(
                "Invalid local file header",
            ));
        }
        let _minimum_extract_version = read_u16(header, TRUNCATED)?;
        let flags = read_u16(header, TRUNCATED)?;
        let compression_method = read_u16(header, TRUNCATED)?;
        let _last_modified_time = read_u16(header, TRUNCATED)?;
        let _last_modified_date = read_u16(header, TRUNCATED)?;
        let crc32 = read_u32(header, TRUNCATED)?;
        let compressed_size = read_u32(header, TRUNCATED)?;
        let uncompressed_size = read_u32(header, TRUNCATED)?;
        let path_length = usize(read_u16(header, TRUNCATED)?)?;
        let extra_field_length = usize(read_u16(header, TRUNCATED)?)?;
        let path = take(header, path_length, TRUNCATED)?;
        take(header, extra_field_length, TRUNCATED)?;

        Ok(Self {
            flags,
            compression_method,
            crc32,
            compressed_size,
            uncompressed_size,
            path,
        })
    }
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumed to be CP437.
fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & (1 << 11) != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
fn is_encrypted(flags: u16) -> bool {
    // Bit 0: If set, indicates that the file is encrypted
    flags & 1 != 0
}

/// Extracts the "sizes and CRC follow the data" bit from the 16-bit flags field.
fn has_data_descriptor(flags: u16) -> bool {
    // Bit 3: If this bit is set, the fields crc-32, compressed
    //        size and uncompressed size are set to zero in the
    //        local header.  The correct values are put in the
    //        data descriptor immediately following the compressed
    //        data.
    flags & (1 << 3) != 0
}

fn decode_name(flags: u16, raw: &[u8]) -> ExportResult<Cow<'_, str>> {
    if is_utf8(flags) {
        let name = std::str::from_utf8(raw).map_err(|source| ExportError::Encoding {
            name: String::from_utf8_lossy(raw).into_owned(),
            source,
        })?;
        Ok(Cow::Borrowed(name))
    } else {
        Ok(Cow::borrow_from_cp437(raw, &CP437_CONTROL))
    }
}

impl<'a> EntryMetadata<'a> {
    /// Extracts `EntryMetadata` from a central directory entry
    pub(crate) fn from_cde(cde: &CentralDirectoryEntry<'a>) -> ExportResult<Self> {
        let name = cde.name()?;

        if cde.disk_number != 0 {
            return Err(ExportError::UnsupportedArchive(format!(
                "No support for multi-disk archives: file {} claims to be on disk {}",
                name, cde.disk_number,
            )));
        }
        if cde.compressed_size == u32::MAX
            || cde.uncompressed_size == u32::MAX
            || cde.header_offset == u32::MAX
        {
            return Err(ExportError::UnsupportedArchive(format!(
                "No support for Zip64 entries ({name})"
            )));
        }

        Ok(Self {
            size: usize(cde.uncompressed_size)?,
            compressed_size: usize(cde.compressed_size)?,
            compression_method: CompressionMethod::from_u16(cde.compression_method),
            crc32: cde.crc32,
            encrypted: is_encrypted(cde.flags),
            has_data_descriptor: has_data_descriptor(cde.flags),
            name,
            last_modified: parse_msdos(cde.last_modified_time, cde.last_modified_date),
            header_offset: usize(cde.header_offset)?,
        })
    }

    /// Checks a local file header against this (central directory) metadata.
    ///
    /// When the entry was written with a data descriptor,
    /// the local sizes and CRC are zero and only the name and method are compared.
    pub(crate) fn matches_local_header(&self, local: &LocalFileHeader) -> ExportResult<bool> {
        let local_name = decode_name(local.flags, local.path)?;
        let same_shape = local_name == self.name
            && CompressionMethod::from_u16(local.compression_method) == self.compression_method;
        if !same_shape {
            return Ok(false);
        }
        if self.has_data_descriptor {
            return Ok(true);
        }
        Ok(local.crc32 == self.crc32
            && usize(local.compressed_size)? == self.compressed_size
            && usize(local.uncompressed_size)? == self.size)
    }
}

/// Decodes an MS-DOS timestamp, or `None` if the fields are nonsense.
fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}

//! File-type detection: magic bytes first, extension second.
//!
//! Only PDFs go through the converter; everything else is identified so
//! callers can report [`ConvertError::UnsupportedType`] with a real type name
//! instead of a pdfium parse failure.
//!
//! [`ConvertError::UnsupportedType`]: crate::error::ConvertError::UnsupportedType

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

/// Detected file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Doc,
    Pptx,
    Ppt,
    Xlsx,
    Xls,
    Jpeg,
    Png,
    Gif,
    Tiff,
    Bmp,
    Webp,
    Heic,
    Mp4,
    Avi,
    Mov,
    Wmv,
    Unknown,
}

/// Coarse grouping of [`FileType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Pdf,
    Office,
    Image,
    Video,
    Unknown,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Doc => "doc",
            FileType::Pptx => "pptx",
            FileType::Ppt => "ppt",
            FileType::Xlsx => "xlsx",
            FileType::Xls => "xls",
            FileType::Jpeg => "jpeg",
            FileType::Png => "png",
            FileType::Gif => "gif",
            FileType::Tiff => "tiff",
            FileType::Bmp => "bmp",
            FileType::Webp => "webp",
            FileType::Heic => "heic",
            FileType::Mp4 => "mp4",
            FileType::Avi => "avi",
            FileType::Mov => "mov",
            FileType::Wmv => "wmv",
            FileType::Unknown => "unknown",
        }
    }

    pub fn category(&self) -> FileCategory {
        use FileType::*;
        match self {
            Pdf => FileCategory::Pdf,
            Docx | Doc | Pptx | Ppt | Xlsx | Xls => FileCategory::Office,
            Jpeg | Png | Gif | Tiff | Bmp | Webp | Heic => FileCategory::Image,
            Mp4 | Avi | Mov | Wmv => FileCategory::Video,
            Unknown => FileCategory::Unknown,
        }
    }

    /// Map a file extension (with or without the dot, any case).
    pub fn from_extension(ext: &str) -> FileType {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => FileType::Pdf,
            "docx" => FileType::Docx,
            "doc" => FileType::Doc,
            "pptx" => FileType::Pptx,
            "ppt" => FileType::Ppt,
            "xlsx" => FileType::Xlsx,
            "xls" => FileType::Xls,
            "jpg" | "jpeg" => FileType::Jpeg,
            "png" => FileType::Png,
            "gif" => FileType::Gif,
            "tif" | "tiff" => FileType::Tiff,
            "bmp" => FileType::Bmp,
            "webp" => FileType::Webp,
            "heic" | "heif" => FileType::Heic,
            "mp4" | "m4v" => FileType::Mp4,
            "avi" => FileType::Avi,
            "mov" => FileType::Mov,
            "wmv" => FileType::Wmv,
            _ => FileType::Unknown,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE2_MAGIC: &[u8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";
const ASF_MAGIC: &[u8] = b"\x30\x26\xB2\x75\x8E\x66\xCF\x11";

/// Classify from the first bytes of a file plus its extension.
///
/// Containers that several formats share (ZIP, OLE2) are disambiguated by
/// extension; [`detect_path`] additionally looks inside ZIP archives.
pub fn detect_bytes(head: &[u8], extension: Option<&str>) -> FileType {
    let by_ext = extension.map(FileType::from_extension).unwrap_or(FileType::Unknown);

    let by_magic = if head.starts_with(b"%PDF") {
        Some(FileType::Pdf)
    } else if head.starts_with(b"\xFF\xD8\xFF") {
        Some(FileType::Jpeg)
    } else if head.starts_with(b"\x89PNG") {
        Some(FileType::Png)
    } else if head.starts_with(b"GIF8") {
        Some(FileType::Gif)
    } else if head.starts_with(b"II\x2A\x00") || head.starts_with(b"MM\x00\x2A") {
        Some(FileType::Tiff)
    } else if head.starts_with(b"BM") {
        Some(FileType::Bmp)
    } else if head.starts_with(b"RIFF") && head.len() >= 12 {
        match &head[8..12] {
            b"WEBP" => Some(FileType::Webp),
            b"AVI " => Some(FileType::Avi),
            _ => None,
        }
    } else if head.len() >= 12 && &head[4..8] == b"ftyp" {
        match &head[8..12] {
            b"qt  " => Some(FileType::Mov),
            b"heic" | b"heix" | b"mif1" | b"msf1" => Some(FileType::Heic),
            _ => Some(FileType::Mp4),
        }
    } else if head.starts_with(ASF_MAGIC) {
        Some(FileType::Wmv)
    } else if head.starts_with(ZIP_MAGIC) || head.starts_with(OLE2_MAGIC) {
        Some(if by_ext.category() == FileCategory::Office {
            by_ext
        } else {
            FileType::Unknown
        })
    } else {
        None
    };

    by_magic.unwrap_or(by_ext)
}

/// Detect the type of a file on disk.
pub fn detect_path(path: &Path) -> io::Result<FileType> {
    let mut head = [0u8; 16];
    let mut file = File::open(path)?;
    let n = read_up_to(&mut file, &mut head)?;
    let head = &head[..n];
    let extension = path.extension().and_then(|e| e.to_str());

    let mut detected = detect_bytes(head, extension);
    if detected.category() != FileCategory::Office && head.starts_with(ZIP_MAGIC) {
        if let Some(office) = sniff_ooxml(path) {
            detected = office;
        }
    }
    debug!("Detected {} for {}", detected, path.display());
    Ok(detected)
}

fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Identify an Office Open XML package by its top-level part directories.
fn sniff_ooxml(path: &Path) -> Option<FileType> {
    let archive = ZipArchive::new(File::open(path).ok()?).ok()?;
    let mut names = archive.file_names();
    names.find_map(|name| {
        if name.starts_with("word/") {
            Some(FileType::Docx)
        } else if name.starts_with("ppt/") {
            Some(FileType::Pptx)
        } else if name.starts_with("xl/") {
            Some(FileType::Xlsx)
        } else {
            None
        }
    })
}

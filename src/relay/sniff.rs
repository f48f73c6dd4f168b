// Content type sniffing
// (c) 2024 Ross Younger
//!
//! Best-guess media type from the leading bytes of a payload, following the WHATWG
//! MIME Sniffing signatures for the unprivileged (non-scriptable) case.

/// How many leading bytes sniffing looks at
pub const SNIFF_LEN: usize = 512;

/// Fallback media type when nothing else matches
pub const OCTET_STREAM: &str = "application/octet-stream";

const TEXT_UTF8: &str = "text/plain; charset=utf-8";
const HTML: &str = "text/html; charset=utf-8";

/// One entry in the signature table
enum Signature {
    /// Case-insensitive HTML tag, after leading whitespace, followed by space or `>`
    Html(&'static [u8]),
    /// Exact prefix after leading whitespace
    AfterWhitespace(&'static [u8], &'static str),
    /// Exact prefix
    Exact(&'static [u8], &'static str),
    /// Prefix where bytes masked to zero are wildcards
    Masked {
        mask: &'static [u8],
        pattern: &'static [u8],
        media_type: &'static str,
    },
    /// ISO base media file with an mp4 brand
    Mp4,
    /// No binary control bytes at all
    Text,
}

const SIGNATURES: &[Signature] = &[
    Signature::Html(b"<!DOCTYPE HTML"),
    Signature::Html(b"<HTML"),
    Signature::Html(b"<HEAD"),
    Signature::Html(b"<SCRIPT"),
    Signature::Html(b"<IFRAME"),
    Signature::Html(b"<H1"),
    Signature::Html(b"<DIV"),
    Signature::Html(b"<FONT"),
    Signature::Html(b"<TABLE"),
    Signature::Html(b"<A"),
    Signature::Html(b"<STYLE"),
    Signature::Html(b"<TITLE"),
    Signature::Html(b"<B"),
    Signature::Html(b"<BODY"),
    Signature::Html(b"<BR"),
    Signature::Html(b"<P"),
    Signature::Html(b"<!--"),
    Signature::AfterWhitespace(b"<?xml", "text/xml; charset=utf-8"),
    Signature::Exact(b"%PDF-", "application/pdf"),
    Signature::Exact(b"%!PS-Adobe-", "application/postscript"),
    // Byte order marks
    Signature::Exact(b"\xFE\xFF", "text/plain; charset=utf-16be"),
    Signature::Exact(b"\xFF\xFE", "text/plain; charset=utf-16le"),
    Signature::Exact(b"\xEF\xBB\xBF", TEXT_UTF8),
    // Images
    Signature::Exact(b"\x00\x00\x01\x00", "image/x-icon"),
    Signature::Exact(b"\x00\x00\x02\x00", "image/x-icon"),
    Signature::Exact(b"BM", "image/bmp"),
    Signature::Exact(b"GIF87a", "image/gif"),
    Signature::Exact(b"GIF89a", "image/gif"),
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF\xFF\xFF",
        pattern: b"RIFF\x00\x00\x00\x00WEBPVP",
        media_type: "image/webp",
    },
    Signature::Exact(b"\x89PNG\x0D\x0A\x1A\x0A", "image/png"),
    Signature::Exact(b"\xFF\xD8\xFF", "image/jpeg"),
    // Audio and video
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        pattern: b"FORM\x00\x00\x00\x00AIFF",
        media_type: "audio/aiff",
    },
    Signature::Exact(b"ID3", "audio/mpeg"),
    Signature::Exact(b"OggS\x00", "application/ogg"),
    Signature::Exact(b"MThd\x00\x00\x00\x06", "audio/midi"),
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        pattern: b"RIFF\x00\x00\x00\x00AVI ",
        media_type: "video/avi",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        pattern: b"RIFF\x00\x00\x00\x00WAVE",
        media_type: "audio/wave",
    },
    Signature::Mp4,
    Signature::Exact(b"\x1A\x45\xDF\xA3", "video/webm"),
    // Fonts
    Signature::Exact(b"\x00\x01\x00\x00", "font/ttf"),
    Signature::Exact(b"OTTO", "font/otf"),
    Signature::Exact(b"ttcf", "font/collection"),
    Signature::Exact(b"wOFF", "font/woff"),
    Signature::Exact(b"wOF2", "font/woff2"),
    // Archives
    Signature::Exact(b"\x1F\x8B\x08", "application/x-gzip"),
    Signature::Exact(b"PK\x03\x04", "application/zip"),
    Signature::Exact(b"Rar!\x1A\x07\x00", "application/x-rar-compressed"),
    Signature::Exact(b"Rar!\x1A\x07\x01\x00", "application/x-rar-compressed"),
    Signature::Exact(b"\x00\x61\x73\x6D", "application/wasm"),
    Signature::Text,
];

fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

fn skip_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !is_whitespace(*b))
        .unwrap_or(data.len());
    &data[start..]
}

fn is_binary(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}

fn matches_html(data: &[u8], tag: &[u8]) -> bool {
    let data = skip_whitespace(data);
    if data.len() < tag.len() + 1 {
        return false;
    }
    if !data[..tag.len()].eq_ignore_ascii_case(tag) {
        return false;
    }
    matches!(data[tag.len()], b' ' | b'>')
}

fn matches_masked(data: &[u8], mask: &[u8], pattern: &[u8]) -> bool {
    data.len() >= pattern.len()
        && data
            .iter()
            .zip(mask.iter().zip(pattern))
            .all(|(d, (m, p))| d & m == *p)
}

fn matches_mp4(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }
    let box_size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if data.len() < box_size || box_size % 4 != 0 || &data[4..8] != b"ftyp" {
        return false;
    }
    // Major brand at 8, minor version at 12 (skipped), then compatible brands
    (8..box_size)
        .step_by(4)
        .filter(|st| *st != 12)
        .any(|st| data.get(st..st + 3) == Some(b"mp4".as_slice()))
}

impl Signature {
    fn matches(&self, data: &[u8]) -> Option<&'static str> {
        match self {
            Signature::Html(tag) => matches_html(data, tag).then_some(HTML),
            Signature::AfterWhitespace(prefix, t) => {
                skip_whitespace(data).starts_with(prefix).then_some(*t)
            }
            Signature::Exact(prefix, t) => data.starts_with(prefix).then_some(*t),
            Signature::Masked {
                mask,
                pattern,
                media_type,
            } => matches_masked(data, mask, pattern).then_some(*media_type),
            Signature::Mp4 => matches_mp4(data).then_some("video/mp4"),
            Signature::Text => (!data.iter().any(|b| is_binary(*b))).then_some(TEXT_UTF8),
        }
    }
}

/// Determines the media type of a payload from (at most) its first [`SNIFF_LEN`] bytes.
///
/// Always returns a valid media type; [`OCTET_STREAM`] when nothing more specific fits.
/// Short input is fine, including empty input (which sniffs as text).
#[must_use]
pub fn detect_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];
    SIGNATURES
        .iter()
        .find_map(|sig| sig.matches(data))
        .unwrap_or(OCTET_STREAM)
}

/// (media type, preferred extension) pairs.
/// Earlier entries win when looking up by extension.
const EXTENSIONS: &[(&str, &str)] = &[
    ("text/plain", ".txt"),
    ("text/html", ".html"),
    ("text/xml", ".xml"),
    ("application/xml", ".xml"),
    ("text/css", ".css"),
    ("text/csv", ".csv"),
    ("text/markdown", ".md"),
    ("text/javascript", ".js"),
    ("application/javascript", ".js"),
    ("application/json", ".json"),
    ("application/pdf", ".pdf"),
    ("application/postscript", ".ps"),
    ("image/x-icon", ".ico"),
    ("image/bmp", ".bmp"),
    ("image/gif", ".gif"),
    ("image/webp", ".webp"),
    ("image/png", ".png"),
    ("image/jpeg", ".jpg"),
    ("image/jpeg", ".jpeg"),
    ("image/svg+xml", ".svg"),
    ("audio/aiff", ".aiff"),
    ("audio/mpeg", ".mp3"),
    ("application/ogg", ".ogg"),
    ("audio/midi", ".mid"),
    ("video/avi", ".avi"),
    ("audio/wave", ".wav"),
    ("video/mp4", ".mp4"),
    ("video/webm", ".webm"),
    ("font/ttf", ".ttf"),
    ("font/otf", ".otf"),
    ("font/collection", ".ttc"),
    ("font/woff", ".woff"),
    ("font/woff2", ".woff2"),
    ("application/x-gzip", ".gz"),
    ("application/gzip", ".gz"),
    ("application/zip", ".zip"),
    ("application/x-rar-compressed", ".rar"),
    ("application/x-tar", ".tar"),
    ("application/wasm", ".wasm"),
];

/// Strips parameters and normalises case: `Text/Plain; charset=utf-8` -> `text/plain`
fn essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Preferred filename extension (with leading dot) for a media type, ignoring parameters
#[must_use]
pub fn extension_for(media_type: &str) -> Option<&'static str> {
    let essence = essence(media_type);
    EXTENSIONS
        .iter()
        .find(|(t, _)| *t == essence)
        .map(|(_, ext)| *ext)
}

/// Media type for a filename extension (with or without leading dot)
#[must_use]
pub fn media_type_for(extension: &str) -> Option<&'static str> {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(_, e)| e[1..] == ext)
        .map(|(t, _)| *t)
}

//! Image metadata: EXIF (TIFF IFDs), JPEG comments, XMP packets and PNG
//! text chunks.
//!
//! Parsing is best-effort. Fields are appended as they are decoded, so a
//! structural error still leaves everything read before it.

use crate::errors::ParseError;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use quick_xml::events::Event;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const EXIF_HEADER: &[u8] = b"Exif\0\0";
const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
const XMP_PNG_KEYWORD: &str = "XML:com.adobe.xmp";

/// IFDs visited per TIFF structure; guards against pointer loops.
const MAX_IFDS: usize = 8;

/// Where a field came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    Exif,
    Jpeg,
    Png,
    Xmp,
}

impl fmt::Display for MetadataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exif => "exif",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Xmp => "xmp",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataField {
    pub source: MetadataSource,
    pub name: String,
    pub value: String,
}

impl MetadataField {
    pub fn label(&self) -> String {
        format!("{}:{}", self.source, self.name)
    }

    /// `Name: value`, the searchable form.
    pub fn text(&self) -> String {
        format!("{}: {}", self.name, self.value)
    }
}

#[derive(Debug, Default)]
pub struct Metadata {
    pub fields: Vec<MetadataField>,
    /// Set when parsing stopped early.
    pub error: Option<ParseError>,
}

/// Read whatever text metadata `bytes` carries. Formats without a metadata
/// reader (GIF, WebP, ...) yield no fields and no error.
pub fn read_metadata(bytes: &[u8]) -> Metadata {
    let mut fields = Vec::new();
    let result = if bytes.starts_with(&[0xFF, 0xD8]) {
        read_jpeg(bytes, &mut fields)
    } else if bytes.starts_with(PNG_SIGNATURE) {
        read_png(bytes, &mut fields)
    } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
        read_tiff(bytes, &mut fields)
    } else {
        Ok(())
    };
    Metadata {
        fields,
        error: result.err(),
    }
}

fn push(fields: &mut Vec<MetadataField>, source: MetadataSource, name: &str, value: String) {
    let value = value.trim_end_matches('\0').trim();
    if !value.is_empty() {
        fields.push(MetadataField {
            source,
            name: name.to_string(),
            value: value.to_string(),
        });
    }
}

// ── JPEG ────────────────────────────────────────────────────────────────────

fn read_jpeg(data: &[u8], fields: &mut Vec<MetadataField>) -> Result<(), ParseError> {
    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            return Err(ParseError::BadOffset {
                what: "JPEG marker",
                offset: pos,
            });
        }
        let marker = data[pos + 1];
        match marker {
            0xFF => {
                pos += 1;
                continue;
            }
            // Metadata never follows the scan data.
            0xD9 | 0xDA => return Ok(()),
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            _ => {}
        }

        let truncated = ParseError::Truncated {
            what: "JPEG segment",
            offset: pos,
        };
        let length = data
            .get(pos + 2..pos + 4)
            .map(BigEndian::read_u16)
            .ok_or_else(|| truncated.clone())? as usize;
        let end = pos + 2 + length;
        if length < 2 || end > data.len() {
            return Err(truncated);
        }
        let body = &data[pos + 4..end];

        match marker {
            0xE1 if body.starts_with(EXIF_HEADER) => {
                read_tiff(&body[EXIF_HEADER.len()..], fields)?;
            }
            0xE1 if body.starts_with(XMP_HEADER) => {
                read_xmp(&body[XMP_HEADER.len()..], fields)?;
            }
            0xFE => push(
                fields,
                MetadataSource::Jpeg,
                "Comment",
                String::from_utf8_lossy(body).into_owned(),
            ),
            _ => {}
        }
        pos = end;
    }
    Ok(())
}

// ── PNG ─────────────────────────────────────────────────────────────────────

fn read_png(data: &[u8], fields: &mut Vec<MetadataField>) -> Result<(), ParseError> {
    let mut pos = PNG_SIGNATURE.len();
    while pos < data.len() {
        let truncated = ParseError::Truncated {
            what: "PNG chunk",
            offset: pos,
        };
        let header = data.get(pos..pos + 8).ok_or_else(|| truncated.clone())?;
        let length = BigEndian::read_u32(&header[..4]) as usize;
        let body = data
            .get(pos + 8..pos + 8 + length)
            .ok_or(truncated)?;

        match &header[4..8] {
            b"tEXt" => {
                if let Some((keyword, text)) = split_nul(body) {
                    push(fields, MetadataSource::Png, &latin1(keyword), latin1(text));
                }
            }
            b"iTXt" => read_itxt(body, fields)?,
            b"eXIf" => read_tiff(body, fields)?,
            b"IEND" => return Ok(()),
            _ => {}
        }
        // length, type, body, CRC
        pos += 12 + length;
    }
    Ok(())
}

fn read_itxt(body: &[u8], fields: &mut Vec<MetadataField>) -> Result<(), ParseError> {
    let Some((keyword, rest)) = split_nul(body) else {
        return Ok(());
    };
    let [compressed, _method, rest @ ..] = rest else {
        return Ok(());
    };
    // Compressed text needs zlib; skip it.
    if *compressed != 0 {
        return Ok(());
    }
    let Some((_language, rest)) = split_nul(rest) else {
        return Ok(());
    };
    let Some((_translated, text)) = split_nul(rest) else {
        return Ok(());
    };

    let keyword = latin1(keyword);
    if keyword == XMP_PNG_KEYWORD {
        return read_xmp(text, fields);
    }
    push(
        fields,
        MetadataSource::Png,
        &keyword,
        String::from_utf8_lossy(text).into_owned(),
    );
    Ok(())
}

fn split_nul(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let at = bytes.iter().position(|b| *b == 0)?;
    Some((&bytes[..at], &bytes[at + 1..]))
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

// ── XMP ─────────────────────────────────────────────────────────────────────

/// Leaf text and attributes of an XMP packet. Field names are the qualified
/// XML names (`dc:description`); RDF plumbing elements are skipped.
fn read_xmp(packet: &[u8], fields: &mut Vec<MetadataField>) -> Result<(), ParseError> {
    let xml = String::from_utf8_lossy(packet);
    let mut reader = quick_xml::Reader::from_str(&xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                read_xmp_attributes(e, fields);
                stack.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Empty(ref e)) => read_xmp_attributes(e, fields),
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(ref e)) => {
                if let Some(owner) = stack.iter().rev().find(|n| !is_rdf_plumbing(n)) {
                    let text = e.unescape().unwrap_or_default().to_string();
                    push(fields, MetadataSource::Xmp, owner, text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::Invalid {
                    what: "XMP packet",
                    message: e.to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn read_xmp_attributes(e: &quick_xml::events::BytesStart<'_>, fields: &mut Vec<MetadataField>) {
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if key.starts_with("xmlns") || key.starts_with("xml:") || is_rdf_plumbing(&key) {
            continue;
        }
        let value = attr
            .unescape_value()
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
        push(fields, MetadataSource::Xmp, &key, value);
    }
}

fn is_rdf_plumbing(name: &str) -> bool {
    name.starts_with("rdf:") || name.starts_with("x:")
}

// ── EXIF / TIFF ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ifd {
    Primary,
    Exif,
    Gps,
}

fn read_tiff(data: &[u8], fields: &mut Vec<MetadataField>) -> Result<(), ParseError> {
    match data.get(..2) {
        Some(b"II") => TiffReader::<LittleEndian>::new(data, fields).read(),
        Some(b"MM") => TiffReader::<BigEndian>::new(data, fields).read(),
        _ => Err(ParseError::BadHeader { what: "TIFF" }),
    }
}

struct TiffReader<'a, B> {
    data: &'a [u8],
    fields: &'a mut Vec<MetadataField>,
    visited: HashSet<usize>,
    order: PhantomData<B>,
}

impl<'a, B: ByteOrder> TiffReader<'a, B> {
    fn new(data: &'a [u8], fields: &'a mut Vec<MetadataField>) -> Self {
        Self {
            data,
            fields,
            visited: HashSet::new(),
            order: PhantomData,
        }
    }

    fn read(&mut self) -> Result<(), ParseError> {
        if self.u16_at(2, "TIFF header")? != 42 {
            return Err(ParseError::BadHeader { what: "TIFF" });
        }
        let ifd0 = self.u32_at(4, "TIFF header")? as usize;
        self.read_ifd(ifd0, Ifd::Primary)
    }

    fn u16_at(&self, offset: usize, what: &'static str) -> Result<u16, ParseError> {
        self.data
            .get(offset..offset + 2)
            .map(B::read_u16)
            .ok_or(ParseError::Truncated { what, offset })
    }

    fn u32_at(&self, offset: usize, what: &'static str) -> Result<u32, ParseError> {
        self.data
            .get(offset..offset + 4)
            .map(B::read_u32)
            .ok_or(ParseError::Truncated { what, offset })
    }

    fn read_ifd(&mut self, offset: usize, ifd: Ifd) -> Result<(), ParseError> {
        if self.visited.len() >= MAX_IFDS || !self.visited.insert(offset) {
            return Ok(());
        }
        let count = self.u16_at(offset, "IFD")? as usize;
        let mut children = Vec::new();

        for i in 0..count {
            let entry = offset + 2 + i * 12;
            let tag = self.u16_at(entry, "IFD entry")?;
            let field_type = self.u16_at(entry + 2, "IFD entry")?;
            let n = self.u32_at(entry + 4, "IFD entry")? as usize;

            match (ifd, tag) {
                (Ifd::Primary, 0x8769) => {
                    children.push((self.u32_at(entry + 8, "IFD entry")? as usize, Ifd::Exif));
                    continue;
                }
                (Ifd::Primary, 0x8825) => {
                    children.push((self.u32_at(entry + 8, "IFD entry")? as usize, Ifd::Gps));
                    continue;
                }
                _ => {}
            }

            let Some(raw) = self.value(entry, field_type, n)? else {
                continue;
            };
            if let Some((name, value)) = render::<B>(ifd, tag, field_type, raw) {
                push(self.fields, MetadataSource::Exif, &name, value);
            }
        }

        for (child, kind) in children {
            self.read_ifd(child, kind)?;
        }
        Ok(())
    }

    /// Raw value bytes of an entry, inline or at its offset. `None` for
    /// types this reader does not render.
    fn value(&self, entry: usize, field_type: u16, n: usize) -> Result<Option<&'a [u8]>, ParseError> {
        let size: usize = match field_type {
            1 | 2 | 6 | 7 => 1,
            3 | 8 => 2,
            4 | 9 | 11 => 4,
            5 | 10 | 12 => 8,
            _ => return Ok(None),
        };
        let bad = ParseError::BadOffset {
            what: "IFD value",
            offset: entry,
        };
        let len = size
            .checked_mul(n)
            .filter(|len| *len <= self.data.len())
            .ok_or_else(|| bad.clone())?;
        let start = if len <= 4 {
            entry + 8
        } else {
            self.u32_at(entry + 8, "IFD entry")? as usize
        };
        let data: &'a [u8] = self.data;
        data.get(start..start + len).map(Some).ok_or(bad)
    }
}

fn render<B: ByteOrder>(ifd: Ifd, tag: u16, field_type: u16, raw: &[u8]) -> Option<(String, String)> {
    let known = tag_name(ifd, tag);
    let value = match (tag, field_type) {
        (0x9286, _) if ifd == Ifd::Exif => user_comment::<B>(raw),
        // Windows XP tags are UCS-2 little-endian regardless of byte order.
        (0x9C9B..=0x9C9F, 1) if ifd == Ifd::Primary => utf16::<LittleEndian>(raw),
        (_, 2) => String::from_utf8_lossy(raw).into_owned(),
        _ if known.is_none() => return None,
        (_, 3) => join(raw.chunks_exact(2).map(|c| B::read_u16(c).to_string())),
        (_, 4) => join(raw.chunks_exact(4).map(|c| B::read_u32(c).to_string())),
        (_, 5) => join(
            raw.chunks_exact(8)
                .map(|c| format!("{}/{}", B::read_u32(&c[..4]), B::read_u32(&c[4..]))),
        ),
        (_, 7) => String::from_utf8_lossy(raw).into_owned(),
        _ => return None,
    };
    let name = known.map_or_else(|| format!("Tag0x{tag:04X}"), str::to_string);
    Some((name, value))
}

fn join(values: impl Iterator<Item = String>) -> String {
    values.take(16).collect::<Vec<_>>().join(", ")
}

/// EXIF UserComment: an 8-byte character code followed by the text.
fn user_comment<B: ByteOrder>(raw: &[u8]) -> String {
    if raw.len() < 8 {
        return String::from_utf8_lossy(raw).into_owned();
    }
    let (code, text) = raw.split_at(8);
    if code == b"UNICODE\0" {
        utf16::<B>(text)
    } else {
        String::from_utf8_lossy(text).into_owned()
    }
}

fn utf16<B: ByteOrder>(raw: &[u8]) -> String {
    let units = raw.chunks_exact(2).map(B::read_u16);
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

fn tag_name(ifd: Ifd, tag: u16) -> Option<&'static str> {
    if ifd == Ifd::Gps {
        return match tag {
            0x0001 => Some("GPSLatitudeRef"),
            0x0002 => Some("GPSLatitude"),
            0x0003 => Some("GPSLongitudeRef"),
            0x0004 => Some("GPSLongitude"),
            0x0005 => Some("GPSAltitudeRef"),
            0x0006 => Some("GPSAltitude"),
            0x0012 => Some("GPSMapDatum"),
            0x001D => Some("GPSDateStamp"),
            _ => None,
        };
    }
    Some(match tag {
        0x010E => "ImageDescription",
        0x010F => "Make",
        0x0110 => "Model",
        0x0112 => "Orientation",
        0x0131 => "Software",
        0x0132 => "DateTime",
        0x013B => "Artist",
        0x8298 => "Copyright",
        0x9000 => "ExifVersion",
        0x9003 => "DateTimeOriginal",
        0x9004 => "DateTimeDigitized",
        0x9286 => "UserComment",
        0x9C9B => "XPTitle",
        0x9C9C => "XPComment",
        0x9C9D => "XPAuthor",
        0x9C9E => "XPKeywords",
        0x9C9F => "XPSubject",
        0xA002 => "PixelXDimension",
        0xA003 => "PixelYDimension",
        0xA420 => "ImageUniqueID",
        0xA430 => "CameraOwnerName",
        0xA431 => "BodySerialNumber",
        0xA434 => "LensModel",
        _ => return None,
    })
}

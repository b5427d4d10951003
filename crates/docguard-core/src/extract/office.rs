//! Office document extraction.
//!
//! OOXML (`docx`, `pptx`) is a zip of XML parts; text is pulled from the body
//! parts and markup is stripped. Legacy binary formats (`doc`, `ppt`) are OLE
//! compound files; for those we only scan for printable text runs.

use std::io::{Cursor, Read};
use std::sync::LazyLock;

use regex::Regex;

use super::{run_blocking, ExtractError, ExtractResult, FileType, TextExtractor};

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const MIN_RUN_CHARS: usize = 4;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static BLOCK_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</(?:w|a):p>|<(?:w|a):br\s*/>|<w:cr\s*/>").expect("valid regex")
});
static TAB: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<w:tab\s*/>").expect("valid regex"));
static SLIDE_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").expect("valid regex"));

pub struct OfficeExtractor;

impl OfficeExtractor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for OfficeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TextExtractor for OfficeExtractor {
    fn supported_types(&self) -> &[FileType] {
        &[FileType::Doc, FileType::Docx, FileType::Ppt, FileType::Pptx]
    }

    async fn extract_bytes(&self, data: &[u8], file_type: FileType) -> ExtractResult<String> {
        match file_type {
            FileType::Docx => run_blocking(data, extract_docx).await,
            FileType::Pptx => run_blocking(data, extract_pptx).await,
            FileType::Doc | FileType::Ppt => run_blocking(data, extract_legacy).await,
            other => Err(ExtractError::UnsupportedFileType(other.to_string())),
        }
    }
}

fn open_archive(data: &[u8]) -> ExtractResult<zip::ZipArchive<Cursor<&[u8]>>> {
    zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| ExtractError::Failed(format!("not a valid OOXML container: {e}")))
}

fn read_part(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, name: &str) -> ExtractResult<String> {
    let mut part = archive
        .by_name(name)
        .map_err(|e| ExtractError::Failed(format!("missing part {name}: {e}")))?;
    let mut xml = String::new();
    part.read_to_string(&mut xml)
        .map_err(|e| ExtractError::Encoding(format!("{name}: {e}")))?;
    Ok(xml)
}

fn extract_docx(data: &[u8]) -> ExtractResult<String> {
    let mut archive = open_archive(data)?;
    let xml = read_part(&mut archive, "word/document.xml")?;
    Ok(xml_to_text(&xml))
}

fn extract_pptx(data: &[u8]) -> ExtractResult<String> {
    let mut archive = open_archive(data)?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = SLIDE_PART.captures(name)?.get(1)?.as_str().parse().ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort_by_key(|(number, _)| *number);

    if slides.is_empty() {
        return Err(ExtractError::Failed("presentation has no slides".into()));
    }

    let mut text = String::new();
    for (_, name) in slides {
        let xml = read_part(&mut archive, &name)?;
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&xml_to_text(&xml));
    }
    Ok(text)
}

fn xml_to_text(xml: &str) -> String {
    let with_breaks = BLOCK_END.replace_all(xml, "\n");
    let with_tabs = TAB.replace_all(&with_breaks, "\t");
    let stripped = TAG.replace_all(&with_tabs, "");
    decode_entities(stripped.trim())
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';').filter(|i| *i <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };

        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };

        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn extract_legacy(data: &[u8]) -> ExtractResult<String> {
    if !data.starts_with(&OLE_MAGIC) {
        return Err(ExtractError::Failed("not an OLE compound document".into()));
    }

    let mut runs = utf16_runs(data);
    runs.extend(ascii_runs(data));
    runs.retain(|run| run.chars().any(char::is_alphabetic));

    Ok(runs.join("\n"))
}

const fn is_text_byte(b: u8) -> bool {
    matches!(b, 0x20..=0x7e | b'\t' | b'\n' | b'\r')
}

fn push_run(runs: &mut Vec<String>, current: &mut String) {
    if current.trim().chars().count() >= MIN_RUN_CHARS {
        runs.push(current.trim().to_string());
    }
    current.clear();
}

fn utf16_runs(data: &[u8]) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();

    for pair in data.chunks_exact(2) {
        let unit = u16::from_le_bytes([pair[0], pair[1]]);
        let text_char = char::from_u32(u32::from(unit)).filter(|c| {
            if c.is_ascii() {
                is_text_byte(pair[0])
            } else {
                c.is_alphabetic()
            }
        });
        match text_char {
            Some(c) => current.push(c),
            None => push_run(&mut runs, &mut current),
        }
    }
    push_run(&mut runs, &mut current);
    runs
}

fn ascii_runs(data: &[u8]) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();

    for &b in data {
        if is_text_byte(b) {
            current.push(char::from(b));
        } else {
            push_run(&mut runs, &mut current);
        }
    }
    push_run(&mut runs, &mut current);
    runs
}

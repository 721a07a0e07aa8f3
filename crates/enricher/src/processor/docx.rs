use std::io::{Cursor, Read, Seek};

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, Event};
use quick_xml::Reader;

use crate::error::ProcessError;
use crate::processor::{ContentKind, TextExtractor};

/// Word documents: text runs of `word/document.xml`, one line per paragraph.
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, ProcessError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ProcessError::DocxProcessing(format!("Failed to open DOCX: {}", e)))?;

        let xml = read_document_xml(&mut archive)?;
        parse_document_xml(&xml)
    }

    fn supports(&self, kind: ContentKind) -> bool {
        matches!(kind, ContentKind::Docx)
    }
}

fn read_document_xml<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<String, ProcessError> {
    let mut entry = archive.by_name("word/document.xml").map_err(|e| {
        ProcessError::DocxProcessing(format!("Failed to find document.xml: {}", e))
    })?;

    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| ProcessError::DocxProcessing(format!("Failed to read document.xml: {}", e)))?;
    Ok(xml)
}

fn parse_document_xml(xml: &str) -> Result<String, ProcessError> {
    // Whitespace inside <w:t> is significant, so text is not trimmed.
    let mut reader = Reader::from_str(xml);

    let mut text = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text_run = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => text.push('\t'),
                b"br" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) if in_text_run => {
                let decoded = e
                    .decode()
                    .map_err(|e| ProcessError::DocxProcessing(format!("Bad text run: {}", e)))?;
                text.push_str(&decoded);
            }
            Ok(Event::GeneralRef(r)) if in_text_run => push_reference(&mut text, &r)?,
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ProcessError::DocxProcessing(format!(
                    "XML parsing error at {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(text)
}

/// Entity and character references arrive as their own events.
fn push_reference(text: &mut String, r: &BytesRef<'_>) -> Result<(), ProcessError> {
    let bad = |e: &dyn std::fmt::Display| {
        ProcessError::DocxProcessing(format!("Bad reference: {}", e))
    };

    if let Some(ch) = r.resolve_char_ref().map_err(|e| bad(&e))? {
        text.push(ch);
        return Ok(());
    }

    let name = r.decode().map_err(|e| bad(&e))?;
    match resolve_predefined_entity(&name) {
        Some(value) => text.push_str(value),
        None => return Err(bad(&format!("unknown entity &{};", name))),
    }
    Ok(())
}

//! Text extraction for single-stream formats (plain, JSON, HTML, PDF, OOXML).

use std::io::Read;

use quick_xml::events::Event;

use super::Section;
use crate::error::ReaderError;
use crate::utils::strip_html_tags;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub(crate) fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Pretty-print JSON so the splitter sees one field per line.
pub(crate) fn extract_json(bytes: &[u8]) -> Result<String, ReaderError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ReaderError::parse("json", e))?;
    serde_json::to_string_pretty(&value).map_err(|e| ReaderError::parse("json", e))
}

pub(crate) fn extract_html(bytes: &[u8]) -> String {
    strip_html_tags(&decode_text(bytes))
}

/// One section per page, labelled with its 1-based page number.
pub(crate) fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<Section>, ReaderError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ReaderError::parse("pdf", e))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| Section {
            text,
            page_label: Some((i + 1).to_string()),
        })
        .collect())
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    format: &str,
) -> Result<Vec<u8>, ReaderError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ReaderError::parse(format, format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ReaderError::parse(
            format,
            format!("ZIP entry {} exceeds size limit", name),
        ));
    }
    Ok(out)
}

pub(crate) fn extract_docx(bytes: &[u8]) -> Result<String, ReaderError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ReaderError::parse("docx", e))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", "docx")?;
    extract_text_runs(&xml, "docx")
}

/// One section per slide, labelled with the slide number.
pub(crate) fn extract_pptx(bytes: &[u8]) -> Result<Vec<Section>, ReaderError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ReaderError::parse("pptx", e))?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .filter_map(|name| {
            name.trim_start_matches("ppt/slides/slide")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .ok()
                .map(|number| (number, name.to_string()))
        })
        .collect();
    slides.sort_by_key(|(number, _)| *number);

    let mut sections = Vec::with_capacity(slides.len());
    for (number, name) in slides {
        let xml = read_zip_entry_bounded(&mut archive, &name, "pptx")?;
        sections.push(Section {
            text: extract_text_runs(&xml, "pptx")?,
            page_label: Some(number.to_string()),
        });
    }
    Ok(sections)
}

/// Collect `<w:t>`/`<a:t>` run text, ending each paragraph with a newline.
fn extract_text_runs(xml: &[u8], format: &str) -> Result<String, ReaderError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ReaderError::parse(format, e))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ReaderError::parse(format, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, content) in entries {
                writer
                    .start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_extract_json_pretty() {
        let text = extract_json(br#"{"b":1,"a":[true]}"#).unwrap();
        assert!(text.contains("\n"));
        assert!(extract_json(b"{not json").is_err());
    }

    #[test]
    fn test_extract_docx_paragraphs() {
        let xml = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
            <w:p><w:r><w:t>Fish &amp; chips</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let bytes = zip_with(&[("word/document.xml", xml)]);
        assert_eq!(extract_docx(&bytes).unwrap(), "Hello world\nFish & chips");
    }

    #[test]
    fn test_extract_pptx_orders_slides() {
        let slide = |t: &str| format!(r#"<p:sld xmlns:a="a" xmlns:p="p"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>"#, t);
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", &slide("ten")),
            ("ppt/slides/slide2.xml", &slide("two")),
        ]);
        let sections = extract_pptx(&bytes).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].text, "two");
        assert_eq!(sections[0].page_label.as_deref(), Some("2"));
        assert_eq!(sections[1].page_label.as_deref(), Some("10"));
    }

    #[test]
    fn test_docx_missing_document_xml() {
        let bytes = zip_with(&[("other.xml", "<x/>")]);
        assert!(matches!(extract_docx(&bytes), Err(ReaderError::Parse { .. })));
    }
}

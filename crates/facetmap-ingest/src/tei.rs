//! Section splitter for GROBID TEI output.
//!
//! Walks `TEI/text/body` with SAX-style events. Every `<head>` that is a
//! direct child of a `<div>` opens a section; the section body is the text of
//! the head's following siblings in that `<div>`, up to the next `<head>`.
//! Heads elsewhere (figure and table captions) are ignored.

use std::io::BufRead;

use facetmap_core::Segment;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::IngestError;

/// A section whose heading has been seen and whose siblings are being read.
struct OpenSection {
    identifier: String,
    title: String,
    parts: Vec<String>,
    /// Depth of the enclosing `<div>`; its end closes the section.
    div_depth: usize,
}

impl OpenSection {
    fn into_segment(self) -> Segment {
        let body = self
            .parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        Segment {
            identifier: self.identifier,
            title: self.title,
            body,
        }
    }
}

/// Text being accumulated for one element and everything inside it.
struct Capture {
    depth: usize,
    is_head: bool,
    text: String,
}

/// Parse GROBID TEI into ordered sections.
///
/// A section's identifier is the head's `n` attribute, or its 1-based
/// position among section heads when `n` is absent. Text is
/// whitespace-normalized.
pub fn parse_tei<R: BufRead>(reader: R) -> Result<Vec<Segment>, IngestError> {
    let mut xml = Reader::from_reader(reader);
    xml.config_mut().trim_text(false);

    let mut buf = Vec::with_capacity(4096);
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut body_depth: Option<usize> = None;
    let mut body_seen = false;
    let mut head_count = 0usize;
    let mut current: Option<OpenSection> = None;
    let mut capture: Option<Capture> = None;
    let mut segments = Vec::new();

    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                let depth = stack.len();
                let name = e.local_name().as_ref().to_vec();
                let parent = stack.last().map(Vec::as_slice);

                if body_depth.is_none() {
                    if !body_seen && name == b"body" && parent == Some(b"text".as_slice()) {
                        body_depth = Some(depth);
                        body_seen = true;
                    }
                } else if capture.is_none() {
                    if name == b"head" && parent == Some(b"div".as_slice()) {
                        if let Some(done) = current.take() {
                            segments.push(done.into_segment());
                        }
                        head_count += 1;
                        current = Some(OpenSection {
                            identifier: head_identifier(e, head_count),
                            title: String::new(),
                            parts: Vec::new(),
                            div_depth: depth - 1,
                        });
                        capture = Some(Capture {
                            depth,
                            is_head: true,
                            text: String::new(),
                        });
                    } else if current.as_ref().is_some_and(|s| s.div_depth + 1 == depth) {
                        capture = Some(Capture {
                            depth,
                            is_head: false,
                            text: String::new(),
                        });
                    }
                }
                stack.push(name);
            }

            Event::Empty(ref e) => {
                // A self-closing head still opens a (title-less) section.
                let depth = stack.len();
                let is_section_head = body_depth.is_some()
                    && capture.is_none()
                    && e.local_name().as_ref() == b"head"
                    && stack.last().map(Vec::as_slice) == Some(b"div".as_slice());
                if is_section_head {
                    if let Some(done) = current.take() {
                        segments.push(done.into_segment());
                    }
                    head_count += 1;
                    current = Some(OpenSection {
                        identifier: head_identifier(e, head_count),
                        title: String::new(),
                        parts: Vec::new(),
                        div_depth: depth - 1,
                    });
                }
            }

            Event::Text(ref e) => {
                if let Some(c) = capture.as_mut() {
                    match e.unescape() {
                        Ok(text) => c.text.push_str(&text),
                        Err(_) => c.text.push_str(&String::from_utf8_lossy(e)),
                    }
                }
            }

            Event::CData(ref e) => {
                if let Some(c) = capture.as_mut() {
                    c.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }

            Event::End(_) => {
                stack.pop();
                let depth = stack.len();

                if capture.as_ref().is_some_and(|c| c.depth == depth) {
                    if let (Some(c), Some(section)) = (capture.take(), current.as_mut()) {
                        let text = normalize_whitespace(&c.text);
                        if c.is_head {
                            section.title = text;
                        } else {
                            section.parts.push(text);
                        }
                    }
                }
                if current.as_ref().is_some_and(|s| s.div_depth == depth) {
                    if let Some(done) = current.take() {
                        segments.push(done.into_segment());
                    }
                }
                if body_depth == Some(depth) {
                    body_depth = None;
                }
            }

            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !body_seen {
        return Err(IngestError::NoBody);
    }
    if let Some(done) = current.take() {
        segments.push(done.into_segment());
    }
    tracing::debug!(sections = segments.len(), "parsed TEI body");
    Ok(segments)
}

fn head_identifier(e: &BytesStart<'_>, position: usize) -> String {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == b"n")
        .map(|a| String::from_utf8_lossy(&a.value).trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| position.to_string())
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

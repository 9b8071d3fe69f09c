//! Plain text: page estimate and a monospace PDF rendering.
//!
//! The page count is a heuristic. Lines longer than `chars_per_line` wrap,
//! every `lines_per_page` lines start a new page, and a form feed forces a
//! break. The rendered PDF uses exactly the same layout, so what is billed is
//! what comes out of the printer.
//!
//! Rendering uses the standard Courier font, which only covers ASCII without
//! embedding; other characters print as `?`.

use crate::error::PrintError;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::path::Path;
use tracing::debug;

/// A4 in points.
pub const PAGE_WIDTH: i64 = 595;
pub const PAGE_HEIGHT: i64 = 842;
pub const MARGIN: i64 = 36;

const FONT_SIZE: i64 = 10;
const LEADING: i64 = 12;
const TAB: &str = "    ";

/// Page geometry in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextLayout {
    pub chars_per_line: usize,
    pub lines_per_page: usize,
}

impl Default for TextLayout {
    fn default() -> Self {
        Self {
            chars_per_line: 80,
            lines_per_page: 60,
        }
    }
}

/// Lay `text` out into pages of wrapped lines. Always returns at least one
/// page, even for empty input.
pub fn paginate(text: &str, layout: TextLayout) -> Vec<Vec<String>> {
    let width = layout.chars_per_line.max(1);
    let height = layout.lines_per_page.max(1);

    let mut pages: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for (i, section) in text.split('\u{000C}').enumerate() {
        if i > 0 {
            pages.push(std::mem::take(&mut current));
        }
        for line in section.lines() {
            for chunk in wrap(&line.replace('\t', TAB), width) {
                if current.len() == height {
                    pages.push(std::mem::take(&mut current));
                }
                current.push(chunk);
            }
        }
    }
    if !current.is_empty() || pages.is_empty() {
        pages.push(current);
    }
    pages
}

/// Estimated page count for `text`.
pub fn estimate_pages(text: &str, layout: TextLayout) -> u32 {
    u32::try_from(paginate(text, layout).len()).unwrap_or(u32::MAX)
}

fn wrap(line: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars.chunks(width).map(|c| c.iter().collect()).collect()
}

fn to_ascii(line: &str) -> Vec<u8> {
    line.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c as u8 } else { b'?' })
        .collect()
}

/// Write `pages` (as produced by [`paginate`]) to a PDF at `out`.
pub fn render_pdf(pages: &[Vec<String>], out: &Path) -> Result<(), PrintError> {
    let failed = |detail: String| PrintError::ConversionFailed {
        path: out.to_path_buf(),
        detail,
    };

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for lines in pages {
        let mut ops = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), Object::Integer(FONT_SIZE)]),
            Operation::new("TL", vec![Object::Integer(LEADING)]),
            Operation::new(
                "Td",
                vec![
                    Object::Integer(MARGIN),
                    Object::Integer(PAGE_HEIGHT - MARGIN - FONT_SIZE),
                ],
            ),
        ];
        for line in lines {
            ops.push(Operation::new("Tj", vec![Object::string_literal(to_ascii(line))]));
            ops.push(Operation::new("T*", vec![]));
        }
        ops.push(Operation::new("ET", vec![]));

        let content = Content { operations: ops }
            .encode()
            .map_err(|e| failed(format!("encode page content: {e}")))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    doc.save(out)
        .map_err(|e| failed(format!("write {}: {e}", out.display())))?;

    debug!("Rendered {} text pages to {}", count, out.display());
    Ok(())
}

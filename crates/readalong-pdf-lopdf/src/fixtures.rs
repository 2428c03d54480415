//! Small PDFs for tests: Courier text at fixed positions, or a single image.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat, dictionary};

pub const PAGE_WIDTH: i64 = 612;
pub const PAGE_HEIGHT: i64 = 792;
pub const FONT_SIZE: i64 = 12;

/// One line of text, positioned by its baseline in PDF space (bottom-left
/// origin, points).
#[derive(Debug, Clone)]
pub struct TextLine {
    pub x: f32,
    pub baseline: f32,
    pub text: String,
}

impl TextLine {
    pub fn new(x: f32, baseline: f32, text: impl Into<String>) -> Self {
        Self {
            x,
            baseline,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum FixturePage {
    Text(Vec<TextLine>),
    /// A page that only paints a 1x1 grey image.
    Image,
}

fn text_content(lines: &[TextLine]) -> Content {
    let mut operations = Vec::new();
    for line in lines {
        operations.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), FONT_SIZE.into()]),
            Operation::new("Td", vec![line.x.into(), line.baseline.into()]),
            Operation::new(
                "Tj",
                vec![Object::String(line.text.as_bytes().to_vec(), StringFormat::Literal)],
            ),
            Operation::new("ET", vec![]),
        ]);
    }
    Content { operations }
}

fn image_content() -> Content {
    Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                [400i64, 0, 0, 600, 100, 100].map(Object::from).to_vec(),
            ),
            Operation::new("Do", vec![Object::Name(b"Im1".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    }
}

fn add_page(doc: &mut Document, pages_id: ObjectId, resources_id: ObjectId, content: Content) -> ObjectId {
    let data = content.encode().unwrap_or_default();
    let content_id = doc.add_object(Stream::new(Dictionary::new(), data));
    doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        "Contents" => content_id,
        "Resources" => resources_id,
    })
}

/// Build a PDF with one page per entry.
pub fn build_pdf(pages: &[FixturePage]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 1i64,
            "Height" => 1i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8i64,
        },
        vec![128u8],
    ));
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
        "XObject" => dictionary! { "Im1" => image_id },
    });

    let kids: Vec<Object> = pages
        .iter()
        .map(|page| {
            let content = match page {
                FixturePage::Text(lines) => text_content(lines),
                FixturePage::Image => image_content(),
            };
            add_page(&mut doc, pages_id, resources_id, content).into()
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = doc.save_to(&mut buf);
    buf
}

/// A text page with body lines and optional running header/footer lines.
///
/// Body lines start at the top margin and step down 14pt each.
pub fn book_page(header: Option<&str>, body: &[&str], footer: Option<&str>) -> FixturePage {
    let mut lines = Vec::new();
    if let Some(h) = header {
        lines.push(TextLine::new(200.0, 760.0, h));
    }
    for (i, text) in body.iter().enumerate() {
        lines.push(TextLine::new(72.0, 640.0 - i as f32 * 14.0, *text));
    }
    if let Some(f) = footer {
        lines.push(TextLine::new(200.0, 30.0, f));
    }
    FixturePage::Text(lines)
}

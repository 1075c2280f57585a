use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream, StringFormat};

use super::assets::Jpeg;
use super::RenderError;

/// A4 in points.
pub(crate) const PAGE_WIDTH: i64 = 595;
pub(crate) const PAGE_HEIGHT: i64 = 842;

const MARGIN: i64 = 50;
const BOTTOM: i64 = 70;
const FOOTER_Y: i64 = 32;
const BODY_SIZE: i64 = 9;
const ROW_HEIGHT: i64 = 15;
const LOGO_HEIGHT: i64 = 48;

const PRODUCER: &str = concat!("pos-digest ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Align {
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub(crate) struct Column {
    pub title: &'static str,
    pub width: i64,
    pub align: Align,
}

impl Column {
    pub fn left(title: &'static str, width: i64) -> Column {
        Column {
            title,
            width,
            align: Align::Left,
        }
    }

    pub fn right(title: &'static str, width: i64) -> Column {
        Column {
            title,
            width,
            align: Align::Right,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Table {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<String>>,
}

/// Width estimate using the monospaced advance of 0.6 em.
fn text_width(text: &str, size: i64) -> i64 {
    text.chars().count() as i64 * size * 6 / 10
}

fn fit(text: &str, width: i64, size: i64) -> String {
    let max_chars = (width * 10 / (size * 6)).max(3) as usize - 1;
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }

    let mut clipped: String = text.chars().take(max_chars - 2).collect();
    clipped.push_str("..");
    clipped
}

/// Encodes text for a WinAnsiEncoding font. Characters outside the code page
/// become `?`.
pub(crate) fn encode_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{20}'..='\u{7e}' | '\u{a0}'..='\u{ff}' => c as u32 as u8,
            '€' => 0x80,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '–' => 0x96,
            '—' => 0x97,
            _ => b'?',
        })
        .collect()
}

/// Top-down page layout. Content is appended at a cursor that moves down the
/// page; a new page starts when the cursor would cross the bottom margin.
#[derive(Debug)]
pub(crate) struct Layout {
    finished: Vec<Vec<Operation>>,
    current: Vec<Operation>,
    cursor: i64,
}

impl Layout {
    pub fn new() -> Layout {
        Layout {
            finished: Vec::new(),
            current: Vec::new(),
            cursor: PAGE_HEIGHT - MARGIN,
        }
    }

    pub fn new_page(&mut self) {
        let page = std::mem::take(&mut self.current);
        self.finished.push(page);
        self.cursor = PAGE_HEIGHT - MARGIN;
    }

    fn ensure(&mut self, height: i64) -> bool {
        if self.cursor - height < BOTTOM {
            self.new_page();
            return true;
        }
        false
    }

    fn text(&mut self, font: Font, size: i64, x: i64, y: i64, text: &str) {
        self.current.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![font.resource().into(), Object::Integer(size)]),
            Operation::new("Td", vec![Object::Integer(x), Object::Integer(y)]),
            Operation::new("Tj", vec![Object::String(encode_text(text), StringFormat::Literal)]),
            Operation::new("ET", vec![]),
        ]);
    }

    fn rule(&mut self, y: i64) {
        self.current.extend([
            Operation::new("w", vec![Object::Real(0.5)]),
            Operation::new("m", vec![Object::Integer(MARGIN), Object::Integer(y)]),
            Operation::new("l", vec![Object::Integer(PAGE_WIDTH - MARGIN), Object::Integer(y)]),
            Operation::new("S", vec![]),
        ]);
    }

    fn shade(&mut self, x: i64, y: i64, width: i64, height: i64) {
        self.current.extend([
            Operation::new("g", vec![Object::Real(0.88)]),
            Operation::new(
                "re",
                vec![
                    Object::Integer(x),
                    Object::Integer(y),
                    Object::Integer(width),
                    Object::Integer(height),
                ],
            ),
            Operation::new("f", vec![]),
            Operation::new("g", vec![Object::Integer(0)]),
        ]);
    }

    pub fn spacer(&mut self, height: i64) {
        self.cursor -= height;
    }

    /// Places the logo in the top right corner of the current page.
    pub fn logo(&mut self, logo: &Jpeg) {
        let height = LOGO_HEIGHT;
        let width = (i64::from(logo.width) * height / i64::from(logo.height.max(1))).max(1);
        let x = PAGE_WIDTH - MARGIN - width;
        let y = PAGE_HEIGHT - MARGIN - height + 12;

        self.current.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Integer(width),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(height),
                    Object::Integer(x),
                    Object::Integer(y),
                ],
            ),
            Operation::new("Do", vec!["Im1".into()]),
            Operation::new("Q", vec![]),
        ]);
    }

    pub fn title(&mut self, text: &str, size: i64) {
        self.ensure(size + 8);
        self.cursor -= size;
        self.text(Font::Bold, size, MARGIN, self.cursor, text);
        self.cursor -= 8;
    }

    pub fn paragraph(&mut self, text: &str, size: i64) {
        self.ensure(size + 6);
        self.cursor -= size;
        self.text(Font::Regular, size, MARGIN, self.cursor, text);
        self.cursor -= 6;
    }

    pub fn heading(&mut self, text: &str) {
        // Keep a heading together with at least two rows below it.
        self.ensure(14 + 10 + ROW_HEIGHT * 3);
        self.cursor -= 14;
        self.text(Font::Bold, 12, MARGIN, self.cursor, text);
        self.cursor -= 4;
        self.rule(self.cursor);
        self.cursor -= 6;
    }

    /// Label on the left, value right-aligned at `value_right`.
    pub fn key_value(&mut self, label: &str, value: &str) {
        const VALUE_RIGHT: i64 = MARGIN + 300;

        self.ensure(ROW_HEIGHT);
        self.cursor -= ROW_HEIGHT;
        self.text(Font::Regular, BODY_SIZE + 1, MARGIN, self.cursor + 4, label);
        let x = VALUE_RIGHT - text_width(value, BODY_SIZE + 1);
        self.text(Font::Bold, BODY_SIZE + 1, x, self.cursor + 4, value);
    }

    fn table_header(&mut self, columns: &[Column]) {
        self.cursor -= ROW_HEIGHT;
        let width: i64 = columns.iter().map(|column| column.width).sum();
        self.shade(MARGIN, self.cursor, width, ROW_HEIGHT);

        let mut x = MARGIN;
        for column in columns {
            let title = fit(column.title, column.width, BODY_SIZE);
            let at = match column.align {
                Align::Left => x + 4,
                Align::Right => x + column.width - 4 - text_width(&title, BODY_SIZE),
            };
            self.text(Font::Bold, BODY_SIZE, at, self.cursor + 4, &title);
            x += column.width;
        }
    }

    /// Draws `table`, repeating the header on every page. With `rows_per_page`
    /// set, a page holds at most that many rows of this table.
    pub fn table(&mut self, table: &Table, rows_per_page: Option<usize>) {
        self.ensure(ROW_HEIGHT * 2);
        self.table_header(&table.columns);

        let mut on_page = 0;
        for row in &table.rows {
            let limit_reached = rows_per_page.is_some_and(|limit| on_page >= limit);
            if limit_reached {
                self.new_page();
            }
            if limit_reached || self.ensure(ROW_HEIGHT) {
                self.table_header(&table.columns);
                on_page = 0;
            }

            self.cursor -= ROW_HEIGHT;
            let mut x = MARGIN;
            for (column, cell) in table.columns.iter().zip(row) {
                let cell = fit(cell, column.width, BODY_SIZE);
                let at = match column.align {
                    Align::Left => x + 4,
                    Align::Right => x + column.width - 4 - text_width(&cell, BODY_SIZE),
                };
                self.text(Font::Regular, BODY_SIZE, at, self.cursor + 4, &cell);
                x += column.width;
            }
            on_page += 1;
        }

        self.cursor -= 10;
    }

    /// Closes the last page and stamps the footer on every page.
    pub fn finish(mut self, footer: &str) -> Vec<Vec<Operation>> {
        self.finished.push(self.current);
        let total = self.finished.len();

        let mut pages = Vec::with_capacity(total);
        for (index, operations) in self.finished.into_iter().enumerate() {
            let mut page = Layout {
                finished: Vec::new(),
                current: operations,
                cursor: 0,
            };
            page.rule(FOOTER_Y + 12);
            page.text(Font::Regular, 8, MARGIN, FOOTER_Y, footer);
            let number = format!("Page {} of {}", index + 1, total);
            let x = PAGE_WIDTH - MARGIN - text_width(&number, 8);
            page.text(Font::Regular, 8, x, FOOTER_Y, &number);
            pages.push(page.current);
        }

        pages
    }
}

pub(crate) struct Assets<'a> {
    pub font: &'a str,
    pub bold_font: &'a str,
    pub logo: Option<&'a Jpeg>,
}

fn font_dictionary(base_font: &str) -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => Object::Name(base_font.as_bytes().to_vec()),
        "Encoding" => "WinAnsiEncoding",
    }
}

/// Assembles laid-out pages into a PDF. Nothing time dependent is written, so
/// equal input gives equal bytes.
pub(crate) fn build_document(pages: Vec<Vec<Operation>>, assets: &Assets<'_>, title: &str) -> Result<Vec<u8>, RenderError> {
    let pdf_error = |err: lopdf::Error| RenderError::Pdf(err.to_string());

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = doc.add_object(font_dictionary(assets.font));
    let bold_id = doc.add_object(font_dictionary(assets.bold_font));
    let mut resources = dictionary! {
        "Font" => dictionary! {
            "F1" => regular_id,
            "F2" => bold_id,
        },
    };

    if let Some(logo) = assets.logo {
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(logo.width),
                "Height" => i64::from(logo.height),
                "ColorSpace" => logo.color_space(),
                "BitsPerComponent" => 8_i64,
                "Filter" => "DCTDecode",
            },
            logo.data.clone(),
        ));
        resources.set("XObject", dictionary! { "Im1" => image_id });
    }
    let resources_id = doc.add_object(resources);

    let mut kids = Vec::with_capacity(pages.len());
    for operations in pages {
        let content = Content { operations }.encode().map_err(pdf_error)?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::from(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(PAGE_WIDTH),
                Object::Integer(PAGE_HEIGHT),
            ],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::String(encode_text(title), StringFormat::Literal),
        "Producer" => Object::string_literal(PRODUCER),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(|err| RenderError::Pdf(err.to_string()))?;

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_encode_text() {
        assert_eq!(encode_text("Café €5"), vec![b'C', b'a', b'f', 0xe9, b' ', 0x80, b'5']);
        assert_eq!(encode_text("日本"), b"??".to_vec());
    }

    #[test]
    fn test_fit() {
        assert_eq!(fit("Drinks", 100, 9), "Drinks");
        assert_eq!(fit("A very long category name indeed", 60, 9), "A very l..");
    }

    #[test]
    fn test_rows_per_page_breaks() {
        let table = Table {
            columns: vec![Column::left("Name", 200), Column::right("Amount", 100)],
            rows: (0..5).map(|i| vec![format!("row {i}"), "1.00".to_owned()]).collect(),
        };

        let mut layout = Layout::new();
        layout.table(&table, Some(2));

        assert_eq!(layout.finish("footer").len(), 3);
    }

    #[test]
    fn test_long_table_overflows_page() {
        let table = Table {
            columns: vec![Column::left("Name", 200)],
            rows: (0..100).map(|i| vec![format!("row {i}")]).collect(),
        };

        let mut layout = Layout::new();
        layout.table(&table, None);

        assert!(layout.finish("footer").len() >= 2);
    }
}

// PDF study guide: LLM restructuring, lopdf rendering, blob publication

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::sync::Arc;

use super::{truncate_chars, BlobStorageClient, OpenAiClient};
use crate::workflow::{ArtifactGenerator, StageError};

const GUIDE_INPUT_CHARS: usize = 10_000;

// A4 in points
const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 56.0;
const BODY_SIZE: f32 = 11.0;
const LINE_SPACING: f32 = 1.45;
/// Rough Helvetica advance per character, as a fraction of the font size
const AVG_CHAR_WIDTH: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuideBlock {
    Heading { level: u8, text: String },
    Bullet(String),
    Paragraph(String),
}

/// Parse the small markdown subset the study-guide prompt asks for.
pub fn parse_markdown(markdown: &str) -> Vec<GuideBlock> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();

    for raw in markdown.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("```") || line == "---" {
            flush_paragraph(&mut paragraph, &mut blocks);
            continue;
        }

        let hashes = line.chars().take_while(|c| *c == '#').count();
        if hashes > 0 && line[hashes..].starts_with(' ') {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(GuideBlock::Heading {
                level: hashes.min(3) as u8,
                text: clean_inline(line[hashes..].trim()),
            });
        } else if let Some(item) = line
            .strip_prefix("- ")
            .or_else(|| line.strip_prefix("* "))
            .or_else(|| line.strip_prefix("• "))
        {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(GuideBlock::Bullet(clean_inline(item)));
        } else if let Some(item) = numbered_item(line) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(GuideBlock::Bullet(clean_inline(item)));
        } else {
            paragraph.push(line);
        }
    }
    flush_paragraph(&mut paragraph, &mut blocks);

    blocks
}

fn flush_paragraph(paragraph: &mut Vec<&str>, blocks: &mut Vec<GuideBlock>) {
    if !paragraph.is_empty() {
        blocks.push(GuideBlock::Paragraph(clean_inline(&paragraph.join(" "))));
        paragraph.clear();
    }
}

fn numbered_item(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    line[digits..].strip_prefix(". ")
}

fn clean_inline(text: &str) -> String {
    text.replace("**", "").replace("__", "").replace('`', "")
}

/// Map to WinAnsiEncoding; unsupported characters become '?'.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{20}'..='\u{7e}' => c as u8,
            '\u{a0}'..='\u{ff}' => c as u32 as u8,
            '€' => 0x80,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            _ => b'?',
        })
        .collect()
}

fn wrap(text: &str, font_size: f32, width: f32) -> Vec<String> {
    let max_chars = ((width / (font_size * AVG_CHAR_WIDTH)) as usize).max(10);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let needed = current.chars().count() + word.chars().count() + usize::from(!current.is_empty());
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

struct PageWriter {
    finished: Vec<Vec<Operation>>,
    current: Vec<Operation>,
    y: f32,
}

impl PageWriter {
    fn new() -> Self {
        Self {
            finished: Vec::new(),
            current: Vec::new(),
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn line(&mut self, font: &str, size: f32, indent: f32, text: &str) {
        let advance = size * LINE_SPACING;
        if self.y - advance < MARGIN {
            self.finished.push(std::mem::take(&mut self.current));
            self.y = PAGE_HEIGHT - MARGIN;
        }
        self.y -= advance;

        let ops = &mut self.current;
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new("Tf", vec![font.into(), (size.round() as i64).into()]));
        ops.push(Operation::new(
            "Td",
            vec![
                ((MARGIN + indent).round() as i64).into(),
                (self.y.round() as i64).into(),
            ],
        ));
        ops.push(Operation::new("Tj", vec![Object::string_literal(win_ansi(text))]));
        ops.push(Operation::new("ET", vec![]));
    }

    fn gap(&mut self, points: f32) {
        self.y -= points;
    }

    fn into_pages(mut self) -> Vec<Vec<Operation>> {
        if !self.current.is_empty() || self.finished.is_empty() {
            self.finished.push(self.current);
        }
        self.finished
    }
}

/// Render the guide to PDF bytes. CPU-bound; call from a blocking thread.
pub fn render_pdf(title: &str, blocks: &[GuideBlock]) -> Result<Vec<u8>, StageError> {
    let usable = PAGE_WIDTH - 2.0 * MARGIN;
    let mut writer = PageWriter::new();

    for line in wrap(title, 20.0, usable) {
        writer.line("F2", 20.0, 0.0, &line);
    }
    writer.gap(10.0);

    for block in blocks {
        match block {
            GuideBlock::Heading { level, text } => {
                let size = match level {
                    1 => 16.0,
                    2 => 14.0,
                    _ => 12.0,
                };
                writer.gap(6.0);
                for line in wrap(text, size, usable) {
                    writer.line("F2", size, 0.0, &line);
                }
            }
            GuideBlock::Bullet(text) => {
                let indent = 14.0;
                for (i, line) in wrap(text, BODY_SIZE, usable - indent).iter().enumerate() {
                    if i == 0 {
                        writer.line("F1", BODY_SIZE, 0.0, &format!("• {}", line));
                    } else {
                        writer.line("F1", BODY_SIZE, indent, line);
                    }
                }
            }
            GuideBlock::Paragraph(text) => {
                for line in wrap(text, BODY_SIZE, usable) {
                    writer.line("F1", BODY_SIZE, 0.0, &line);
                }
                writer.gap(4.0);
            }
        }
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
        },
    });

    let pages = writer.into_pages();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for operations in pages {
        let content = Content { operations };
        let encoded = content
            .encode()
            .map_err(|e| StageError::Generation(format!("PDF content encoding failed: {}", e)))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id: ObjectId = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), (PAGE_WIDTH as i64).into(), (PAGE_HEIGHT as i64).into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| StageError::Generation(format!("PDF serialization failed: {}", e)))?;
    Ok(bytes)
}

fn study_guide_prompt(language: &str) -> String {
    format!(
        "You prepare printable study guides in {language}. Rewrite the lecture summary you \
         receive as a study guide using only simple markdown: '#' and '##' headings, '-' bullet \
         points and plain paragraphs. Include key concepts, definitions, a short list of things to \
         remember and three self-check questions. No tables, images, links or code blocks."
    )
}

pub struct StudyGuideGenerator {
    llm: Arc<OpenAiClient>,
    blob: BlobStorageClient,
    subfolder: String,
}

impl StudyGuideGenerator {
    pub fn new(llm: Arc<OpenAiClient>, blob: BlobStorageClient, subfolder: impl Into<String>) -> Self {
        Self {
            llm,
            blob,
            subfolder: subfolder.into(),
        }
    }
}

#[async_trait]
impl ArtifactGenerator for StudyGuideGenerator {
    async fn generate_and_publish(&self, text: &str, correlation_id: &str) -> Result<String, StageError> {
        if !self.blob.is_configured() {
            return Err(StageError::Configuration(
                "Blob storage is required to publish study guides".to_string(),
            ));
        }

        tracing::info!("📄 Generating study guide for session {}", correlation_id);
        let input = truncate_chars(text, GUIDE_INPUT_CHARS);
        let markdown = self
            .llm
            .chat(&study_guide_prompt(self.llm.output_language()), input, 0.3)
            .await?;

        let blocks = parse_markdown(&markdown);
        if blocks.is_empty() {
            return Err(StageError::Generation("Study guide came back empty".to_string()));
        }

        let title = format!("Study guide - session {}", correlation_id);
        let bytes = tokio::task::spawn_blocking(move || render_pdf(&title, &blocks))
            .await
            .map_err(|e| StageError::Generation(format!("PDF rendering task failed: {}", e)))??;

        // Fixed name per session so a retried upload overwrites the earlier one
        let name = format!("study_guide_{}.pdf", correlation_id);
        self.blob
            .upload_bytes(bytes, &self.subfolder, &name, "application/pdf")
            .await
    }
}

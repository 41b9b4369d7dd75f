//! Boundary-aware text chunker.
//!
//! Splits raw content into ordered, overlapping [`TextChunk`]s that cover
//! the whole input. Two modes are supported:
//!
//! - **Sliding window** (default): fixed windows of `chunk_size`
//!   characters advancing by `chunk_size - chunk_overlap`.
//! - **Boundary preserving**: the content is first parsed into structural
//!   units (markdown heading sections, top-level code declarations, or
//!   blank-line paragraphs). Whole units are packed into chunks up to
//!   `chunk_size`; a unit is only split when it alone exceeds the limit,
//!   and then preferably at a line break or whitespace.
//!
//! Sizes are measured in characters, never bytes, so multibyte text is
//! always cut on a char boundary.
//!
//! # Example
//!
//! ```rust
//! use semindex_core::chunk::{chunk_content, ChunkOptions};
//!
//! let opts = ChunkOptions { chunk_size: 10, chunk_overlap: 2, ..Default::default() };
//! let chunks = chunk_content("abcdefghijklmnopqrst", &opts).unwrap();
//! assert_eq!(chunks[0].text, "abcdefghij");
//! assert_eq!(chunks[1].text, "ijklmnopqr");
//! ```

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{IndexError, Result};
use crate::models::{Boundary, BoundaryKind};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Structure used by boundary-preserving mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentKind {
    /// Decide from the file path, falling back to sniffing for headings.
    #[default]
    Auto,
    Plain,
    Markdown,
    Code,
}

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "mdx", "mdown"];
const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "jsx", "ts", "tsx", "mjs", "cjs", "go", "java", "kt", "c", "h", "cc", "cpp",
    "hpp", "cs", "rb", "php", "swift", "scala", "lua", "sh",
];

impl ContentKind {
    /// Detect the content kind from an optional path and the content itself.
    pub fn detect(path: Option<&str>, content: &str) -> ContentKind {
        if let Some(ext) = path.and_then(crate::models::extension_of) {
            if MARKDOWN_EXTENSIONS.contains(&ext.as_str()) {
                return ContentKind::Markdown;
            }
            if CODE_EXTENSIONS.contains(&ext.as_str()) {
                return ContentKind::Code;
            }
            return ContentKind::Plain;
        }
        if content.lines().any(|l| heading_re().is_match(l)) {
            ContentKind::Markdown
        } else {
            ContentKind::Plain
        }
    }
}

/// Chunking parameters.
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared by consecutive windows. Must be `< chunk_size`.
    pub chunk_overlap: usize,
    /// Pack structural units instead of cutting fixed windows.
    pub preserve_boundaries: bool,
    pub content_kind: ContentKind,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            preserve_boundaries: false,
            content_kind: ContentKind::Auto,
        }
    }
}

impl ChunkOptions {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let opts = Self {
            chunk_size,
            chunk_overlap,
            ..Default::default()
        };
        opts.validate()?;
        Ok(opts)
    }

    pub fn with_boundaries(mut self, kind: ContentKind) -> Self {
        self.preserve_boundaries = true;
        self.content_kind = kind;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(IndexError::Configuration(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IndexError::Configuration(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// One segment produced by the chunker.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Position in the sequence, contiguous from 0.
    pub index: usize,
    pub text: String,
    /// Enclosing structural unit, only set in boundary-preserving mode.
    pub boundary: Option<Boundary>,
}

/// Split `content` into chunks.
///
/// The result is a finite, ordered list and can be iterated any number of
/// times. Whitespace-only windows are dropped.
///
/// # Errors
///
/// - [`IndexError::Configuration`] for invalid options.
/// - [`IndexError::Chunking`] when the content is empty after trimming.
pub fn chunk_content(content: &str, opts: &ChunkOptions) -> Result<Vec<TextChunk>> {
    chunk_with_path(content, None, opts)
}

/// Like [`chunk_content`], using `path` to detect markdown or code structure.
pub fn chunk_with_path(
    content: &str,
    path: Option<&str>,
    opts: &ChunkOptions,
) -> Result<Vec<TextChunk>> {
    opts.validate()?;
    if content.trim().is_empty() {
        return Err(IndexError::Chunking("content is empty".to_string()));
    }

    let pieces = if opts.preserve_boundaries {
        let kind = match opts.content_kind {
            ContentKind::Auto => ContentKind::detect(path, content),
            other => other,
        };
        let units = match kind {
            ContentKind::Markdown => markdown_units(content),
            ContentKind::Code => code_units(content),
            _ => paragraph_units(content),
        };
        pack_units(&units, opts)
    } else {
        sliding_window(content, opts.chunk_size, opts.chunk_overlap)
            .into_iter()
            .map(|text| (text, None))
            .collect()
    };

    let chunks: Vec<TextChunk> = pieces
        .into_iter()
        .filter(|(text, _)| !text.trim().is_empty())
        .enumerate()
        .map(|(index, (text, boundary))| TextChunk {
            index,
            text,
            boundary,
        })
        .collect();

    if chunks.is_empty() {
        return Err(IndexError::Chunking(
            "content produced no non-empty segments".to_string(),
        ));
    }
    Ok(chunks)
}

/// Fixed windows of `size` chars advancing by `size - overlap`.
fn sliding_window(content: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();
    let n = chars.len();
    let step = size - overlap;
    let mut out = Vec::new();
    let mut start = 0;
    while start < n {
        let end = (start + size).min(n);
        out.push(chars[start..end].iter().collect());
        if end == n {
            break;
        }
        start += step;
    }
    out
}

/// Windowed split of one oversized unit, cutting at a newline or whitespace
/// in the back half of the window when one exists.
fn split_oversized(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let mut out = Vec::new();
    let mut start = 0;
    while start < n {
        let hard_end = (start + size).min(n);
        let end = if hard_end == n {
            n
        } else {
            preferred_cut(&chars, start, hard_end)
        };
        out.push(chars[start..end].iter().collect::<String>());
        if end == n {
            break;
        }
        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }
    out
}

fn preferred_cut(chars: &[char], start: usize, hard_end: usize) -> usize {
    let min_cut = start + (hard_end - start) / 2;
    if let Some(pos) = (min_cut..hard_end).rev().find(|&i| chars[i] == '\n') {
        return pos + 1;
    }
    if let Some(pos) = (min_cut..hard_end).rev().find(|&i| chars[i].is_whitespace()) {
        return pos + 1;
    }
    hard_end
}

/// A structural unit spanning whole lines.
#[derive(Debug, Clone)]
struct Unit {
    text: String,
    boundary: Boundary,
}

impl Unit {
    fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

fn split_lines(content: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = content.split('\n').collect();
    if content.ends_with('\n') {
        lines.pop();
    }
    lines
}

fn make_unit(lines: &[&str], start: usize, end: usize, kind: BoundaryKind, level: u8) -> Unit {
    Unit {
        text: lines[start..=end].join("\n"),
        boundary: Boundary {
            start_line: start + 1,
            end_line: end + 1,
            kind,
            level,
        },
    }
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+\S").expect("valid heading regex"))
}

fn declaration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:export\s+)?(?:default\s+)?(?:pub(?:\([^)]*\))?\s+)?(?:public\s+|private\s+|protected\s+)?(?:static\s+)?(?:abstract\s+)?(?:async\s+)?(?:unsafe\s+)?(fn|def|function|func|class|struct|enum|trait|impl|interface|mod|type|const)\b",
        )
        .expect("valid declaration regex")
    })
}

/// Heading sections: each heading owns the lines up to the next heading.
/// Lines before the first heading form a level-0 section. Fenced code is
/// never scanned for headings.
fn markdown_units(content: &str) -> Vec<Unit> {
    let lines = split_lines(content);
    let mut starts: Vec<(usize, BoundaryKind, u8)> = Vec::new();
    let mut in_fence = false;

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(caps) = heading_re().captures(line) {
            starts.push((i, BoundaryKind::Heading, caps[1].len() as u8));
        }
    }

    if starts.first().map(|s| s.0) != Some(0) {
        starts.insert(0, (0, BoundaryKind::Section, 0));
    }
    units_from_starts(&lines, &starts)
}

/// Top-level declarations (column 0) with their leading doc comments and
/// attributes. Anything before the first declaration is a block unit.
fn code_units(content: &str) -> Vec<Unit> {
    let lines = split_lines(content);
    let mut starts: Vec<(usize, BoundaryKind, u8)> = Vec::new();
    let mut floor = 0;

    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = declaration_re().captures(line) else {
            continue;
        };
        let kind = match &caps[1] {
            "fn" | "def" | "function" | "func" => BoundaryKind::Function,
            "class" | "struct" | "enum" | "trait" | "impl" | "interface" => BoundaryKind::Class,
            _ => BoundaryKind::Block,
        };
        let mut start = i;
        while start > floor && is_decoration(lines[start - 1]) {
            start -= 1;
        }
        starts.push((start, kind, 0));
        floor = i + 1;
    }

    if starts.first().map(|s| s.0) != Some(0) {
        starts.insert(0, (0, BoundaryKind::Block, 0));
    }
    units_from_starts(&lines, &starts)
}

fn is_decoration(line: &str) -> bool {
    let t = line.trim_start();
    !t.is_empty()
        && line.len() == t.len()
        && (t.starts_with("#[")
            || t.starts_with('@')
            || t.starts_with("//")
            || t.starts_with("/*")
            || t.starts_with("* ")
            || t.starts_with("*/"))
}

/// Blank-line separated paragraphs; trailing blank lines stay with the
/// paragraph above them.
fn paragraph_units(content: &str) -> Vec<Unit> {
    let lines = split_lines(content);
    let mut starts: Vec<(usize, BoundaryKind, u8)> = vec![(0, BoundaryKind::Paragraph, 0)];
    for i in 1..lines.len() {
        if lines[i - 1].trim().is_empty() && !lines[i].trim().is_empty() {
            starts.push((i, BoundaryKind::Paragraph, 0));
        }
    }
    units_from_starts(&lines, &starts)
}

fn units_from_starts(lines: &[&str], starts: &[(usize, BoundaryKind, u8)]) -> Vec<Unit> {
    if lines.is_empty() {
        return Vec::new();
    }
    starts
        .iter()
        .enumerate()
        .map(|(n, &(start, kind, level))| {
            let end = starts
                .get(n + 1)
                .map(|next| next.0 - 1)
                .unwrap_or(lines.len() - 1);
            make_unit(lines, start, end, kind, level)
        })
        .collect()
}

/// Greedily pack whole units into chunks of at most `chunk_size` chars.
fn pack_units(units: &[Unit], opts: &ChunkOptions) -> Vec<(String, Option<Boundary>)> {
    let mut out = Vec::new();
    let mut group: Vec<&Unit> = Vec::new();
    let mut group_len = 0usize;

    for unit in units {
        if unit.text.trim().is_empty() {
            continue;
        }
        let len = unit.char_len();
        if len > opts.chunk_size {
            flush_group(&mut group, &mut out);
            group_len = 0;
            for piece in split_oversized(&unit.text, opts.chunk_size, opts.chunk_overlap) {
                out.push((piece.trim_end().to_string(), Some(unit.boundary)));
            }
            continue;
        }
        let joined = if group.is_empty() { len } else { group_len + 1 + len };
        if joined > opts.chunk_size && !group.is_empty() {
            flush_group(&mut group, &mut out);
            group_len = len;
        } else {
            group_len = joined;
        }
        group.push(unit);
    }
    flush_group(&mut group, &mut out);
    out
}

fn flush_group(group: &mut Vec<&Unit>, out: &mut Vec<(String, Option<Boundary>)>) {
    if group.is_empty() {
        return;
    }
    let text = group
        .iter()
        .map(|u| u.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let boundary = if group.len() == 1 {
        group[0].boundary
    } else {
        Boundary {
            start_line: group[0].boundary.start_line,
            end_line: group[group.len() - 1].boundary.end_line,
            kind: BoundaryKind::Section,
            level: group.iter().map(|u| u.boundary.level).min().unwrap_or(0),
        }
    };
    out.push((text.trim_end().to_string(), Some(boundary)));
    group.clear();
}

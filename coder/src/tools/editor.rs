//! In-memory editor buffers for open files.
//!
//! The session owns the one `EditorStore`; tools mutate it through
//! `ToolContext`. Pages are fixed-size line windows and page numbers are
//! always clamped to the buffer's current length.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::io::prompt::BufferView;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorBuffer {
    pub content: String,
    /// 0-based page index.
    pub page: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditorError {
    #[error("file {0} is not open; run open_file first")]
    NotOpen(String),
    #[error("line {line} is out of range; {path} has {lines} lines")]
    LineOutOfRange {
        path: String,
        line: usize,
        lines: usize,
    },
}

/// Strip a leading `./` so `./a.py` and `a.py` name the same buffer.
pub fn normalize_path(path: &str) -> String {
    let mut path = path.trim();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path.to_string()
}

#[derive(Debug, Clone)]
pub struct EditorStore {
    buffers: BTreeMap<String, EditorBuffer>,
    page_size: usize,
}

impl EditorStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            buffers: BTreeMap::new(),
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn open(&mut self, path: &str, content: impl Into<String>) {
        self.buffers.insert(
            normalize_path(path),
            EditorBuffer {
                content: content.into(),
                page: 0,
            },
        );
    }

    /// Returns whether the file was open.
    pub fn close(&mut self, path: &str) -> bool {
        self.buffers.remove(&normalize_path(path)).is_some()
    }

    pub fn get(&self, path: &str) -> Option<&EditorBuffer> {
        self.buffers.get(&normalize_path(path))
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }

    /// Replace an open buffer's content after an edit; closed files are ignored.
    pub fn update_content(&mut self, path: &str, content: impl Into<String>) {
        let content = content.into();
        let pages = self.pages_for(&content);
        if let Some(buffer) = self.buffers.get_mut(&normalize_path(path)) {
            buffer.content = content;
            buffer.page = buffer.page.min(pages - 1);
        }
    }

    pub fn page_count(&self, path: &str) -> Result<usize, EditorError> {
        let buffer = self.buffer(path)?;
        Ok(self.pages_for(&buffer.content))
    }

    /// Move by `delta` pages, clamped; returns the new 0-based page.
    pub fn scroll(&mut self, path: &str, delta: isize) -> Result<usize, EditorError> {
        let pages = self.page_count(path)?;
        let buffer = self.buffer_mut(path)?;
        buffer.page = buffer
            .page
            .saturating_add_signed(delta)
            .min(pages - 1);
        Ok(buffer.page)
    }

    /// Show the page containing 1-based `line`.
    pub fn scroll_to_line(&mut self, path: &str, line: usize) -> Result<usize, EditorError> {
        let page_size = self.page_size;
        let lines = self.buffer(path)?.content.lines().count();
        if line == 0 || line > lines.max(1) {
            return Err(EditorError::LineOutOfRange {
                path: normalize_path(path),
                line,
                lines,
            });
        }
        let buffer = self.buffer_mut(path)?;
        buffer.page = (line - 1) / page_size;
        Ok(buffer.page)
    }

    /// The current page with 1-based line numbers.
    pub fn render_page(&self, path: &str) -> Result<BufferView, EditorError> {
        let buffer = self.buffer(path)?;
        let lines: Vec<&str> = buffer.content.lines().collect();
        let start = buffer.page * self.page_size;
        let end = (start + self.page_size).min(lines.len());
        Ok(BufferView {
            path: normalize_path(path),
            page: buffer.page + 1,
            pages: self.pages_for(&buffer.content),
            body: number_lines(&lines[start.min(end)..end], start + 1),
        })
    }

    pub fn render_all(&self) -> Vec<BufferView> {
        self.buffers
            .keys()
            .filter_map(|path| self.render_page(path).ok())
            .collect()
    }

    fn pages_for(&self, content: &str) -> usize {
        content.lines().count().div_ceil(self.page_size).max(1)
    }

    fn buffer(&self, path: &str) -> Result<&EditorBuffer, EditorError> {
        self.get(path)
            .ok_or_else(|| EditorError::NotOpen(normalize_path(path)))
    }

    fn buffer_mut(&mut self, path: &str) -> Result<&mut EditorBuffer, EditorError> {
        let key = normalize_path(path);
        self.buffers
            .get_mut(&key)
            .ok_or(EditorError::NotOpen(key))
    }
}

/// Prefix each line with its 1-based number, right-aligned.
pub fn number_lines(lines: &[&str], first: usize) -> String {
    let width = (first + lines.len()).to_string().len();
    lines
        .iter()
        .enumerate()
        .map(|(idx, line)| format!("{:>width$}: {line}", first + idx))
        .collect::<Vec<_>>()
        .join("\n")
}

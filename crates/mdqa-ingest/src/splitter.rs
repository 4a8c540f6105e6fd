//! Structure-aware markdown chunking.
//!
//! Files are lexed into blocks (ATX headers, fenced code, blank-line-separated
//! paragraphs) and the blocks are packed greedily into chunks of a target
//! size, with a tail-overlap carried between adjacent chunks. A fenced code
//! block is only ever split when it alone exceeds the target size.

use regex::Regex;

use mdqa_core::{Chunk, Error, Heading, Result};

use crate::loader::chunk_id;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

#[derive(Debug)]
enum BlockKind {
    Header(Heading),
    Fence,
    Paragraph,
}

#[derive(Debug)]
struct Block {
    text: String,
    kind: BlockKind,
}

/// Splits markdown into chunks that respect block structure.
pub struct MarkdownSplitter {
    chunk_size: usize,
    overlap: usize,
    header_re: Regex,
}

impl MarkdownSplitter {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap: overlap.min(chunk_size / 2),
            header_re: Regex::new(r"^(#{1,6})\s+(.*?)\s*#*\s*$").expect("header regex"),
        }
    }

    /// Split one file into chunks with dense indexes and stable ids.
    ///
    /// Fails with a fatal error if the file produces more chunks than the
    /// 16-bit index space allows.
    pub fn split_file(&self, file_path: &str, text: &str) -> Result<Vec<Chunk>> {
        let pieces = self.pack(self.lex(text));

        if pieces.len() > usize::from(u16::MAX) + 1 {
            return Err(Error::Fatal(format!(
                "{file_path} produced {} chunks, exceeding the per-file limit",
                pieces.len()
            )));
        }

        Ok(pieces
            .into_iter()
            .enumerate()
            .map(|(idx, (text, headers))| {
                let chunk_index = idx as u16;
                Chunk {
                    id: chunk_id(file_path, chunk_index),
                    file_path: file_path.to_string(),
                    chunk_index,
                    text,
                    headers,
                }
            })
            .collect())
    }

    // ---------------------------------------------------------------
    // Block lexer
    // ---------------------------------------------------------------

    fn lex(&self, text: &str) -> Vec<Block> {
        fn flush_paragraph(paragraph: &mut Vec<&str>, blocks: &mut Vec<Block>) {
            let body = paragraph.join("\n");
            let body = body.trim();
            if !body.is_empty() {
                blocks.push(Block {
                    text: body.to_string(),
                    kind: BlockKind::Paragraph,
                });
            }
            paragraph.clear();
        }

        let mut blocks = Vec::new();
        let mut paragraph: Vec<&str> = Vec::new();
        let mut fence: Option<(String, Vec<&str>)> = None;

        for line in text.lines() {
            if let Some((delim, lines)) = fence.as_mut() {
                lines.push(line);
                let trimmed = line.trim_start();
                if trimmed.starts_with(delim.as_str()) {
                    blocks.push(Block {
                        text: lines.join("\n"),
                        kind: BlockKind::Fence,
                    });
                    fence = None;
                }
                continue;
            }

            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                flush_paragraph(&mut paragraph, &mut blocks);
                let delim = trimmed[..3].to_string();
                fence = Some((delim, vec![line]));
                continue;
            }

            if let Some(caps) = self.header_re.captures(line) {
                flush_paragraph(&mut paragraph, &mut blocks);
                let level = caps[1].len() as u8;
                let title = caps[2].to_string();
                blocks.push(Block {
                    text: line.trim_end().to_string(),
                    kind: BlockKind::Header(Heading { level, title }),
                });
                continue;
            }

            if line.trim().is_empty() {
                flush_paragraph(&mut paragraph, &mut blocks);
            } else {
                paragraph.push(line);
            }
        }

        // Unterminated fence at EOF is kept as-is.
        if let Some((_, lines)) = fence {
            blocks.push(Block {
                text: lines.join("\n"),
                kind: BlockKind::Fence,
            });
        }
        flush_paragraph(&mut paragraph, &mut blocks);

        blocks
    }

    // ---------------------------------------------------------------
    // Packing
    // ---------------------------------------------------------------

    fn pack(&self, blocks: Vec<Block>) -> Vec<(String, Vec<Heading>)> {
        let mut out: Vec<(String, Vec<Heading>)> = Vec::new();
        let mut stack: Vec<Heading> = Vec::new();
        let mut cur = String::new();
        let mut cur_headers: Vec<Heading> = Vec::new();

        for block in blocks {
            if let BlockKind::Header(heading) = &block.kind {
                while stack.last().map_or(false, |h| h.level >= heading.level) {
                    stack.pop();
                }
                stack.push(heading.clone());
            }

            for part in self.split_oversized(&block.text) {
                let needed = if cur.is_empty() { part.len() } else { cur.len() + 2 + part.len() };
                if !cur.is_empty() && needed > self.chunk_size {
                    out.push((std::mem::take(&mut cur), std::mem::take(&mut cur_headers)));

                    // Seed the next chunk with the previous tail, shrunk so
                    // the seed plus this part still fits the target size.
                    let budget = self.chunk_size.saturating_sub(part.len() + 2);
                    let tail = overlap_tail(&out.last().expect("just pushed").0, self.overlap.min(budget));
                    if !tail.is_empty() {
                        cur.push_str(tail);
                    }
                    cur_headers = stack.clone();
                }
                if cur_headers.is_empty() && cur.is_empty() {
                    cur_headers = stack.clone();
                }
                if !cur.is_empty() {
                    cur.push_str("\n\n");
                }
                cur.push_str(&part);
            }
        }

        if !cur.trim().is_empty() {
            out.push((cur, cur_headers));
        }
        out
    }

    /// Break a block that exceeds the target size along line boundaries,
    /// falling back to raw character cuts for single oversized lines.
    fn split_oversized(&self, text: &str) -> Vec<String> {
        if text.len() <= self.chunk_size {
            return vec![text.to_string()];
        }

        let mut parts = Vec::new();
        let mut cur = String::new();
        for line in text.split_inclusive('\n') {
            if line.len() > self.chunk_size {
                if !cur.is_empty() {
                    parts.push(std::mem::take(&mut cur));
                }
                let mut rest = line;
                while rest.len() > self.chunk_size {
                    let cut = floor_char_boundary(rest, self.chunk_size);
                    parts.push(rest[..cut].to_string());
                    rest = &rest[cut..];
                }
                cur.push_str(rest);
                continue;
            }
            if cur.len() + line.len() > self.chunk_size && !cur.is_empty() {
                parts.push(std::mem::take(&mut cur));
            }
            cur.push_str(line);
        }
        if !cur.is_empty() {
            parts.push(cur);
        }
        parts
            .into_iter()
            .map(|p| p.trim_end_matches('\n').to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }
}

impl Default for MarkdownSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

/// Last `max` bytes of `s`, moved forward to a valid char boundary.
fn overlap_tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Largest byte index `<= at` that is a char boundary.
fn floor_char_boundary(s: &str, at: usize) -> usize {
    let mut cut = at.min(s.len());
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_file_is_one_chunk() {
        let splitter = MarkdownSplitter::default();
        let chunks = splitter.split_file("/docs/a.md", "Alpha Bravo Charlie").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Alpha Bravo Charlie");
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].id, chunk_id("/docs/a.md", 0));
    }

    #[test]
    fn test_empty_file_yields_no_chunks() {
        let splitter = MarkdownSplitter::default();
        assert!(splitter.split_file("/docs/a.md", "  \n\n  ").unwrap().is_empty());
    }

    #[test]
    fn test_long_file_respects_size_and_density() {
        let splitter = MarkdownSplitter::new(200, 40);
        let text = (0..40)
            .map(|i| format!("Paragraph number {i} with a little bit of filler text."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = splitter.split_file("/docs/long.md", &text).unwrap();

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.text.len() <= 200, "chunk {i} is {} bytes", chunk.text.len());
            assert_eq!(chunk.chunk_index as usize, i);
            assert_eq!(chunk.id, chunk_id("/docs/long.md", i as u16));
        }
    }

    #[test]
    fn test_adjacent_chunks_overlap() {
        let splitter = MarkdownSplitter::new(120, 40);
        let text = (0..12)
            .map(|i| format!("Sentence {i} about nothing much."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = splitter.split_file("/docs/o.md", &text).unwrap();
        assert!(chunks.len() > 1);

        // Each later chunk begins with a tail of its predecessor.
        for pair in chunks.windows(2) {
            let (a, b) = (&pair[0].text, &pair[1].text);
            let max = a.len().min(b.len());
            let shared = (1..=max)
                .rev()
                .find(|&k| a[a.len() - k..] == b[..k])
                .unwrap_or(0);
            assert!(shared >= 10, "no overlap between {a:?} and {b:?}");
        }
    }

    #[test]
    fn test_small_fence_is_never_split() {
        let splitter = MarkdownSplitter::new(160, 20);
        let fence = "```rust\nfn main() {\n    println!(\"hi\");\n}\n```";
        let text = format!("Intro paragraph that takes up a fair amount of room here.\n\n{fence}\n\nAnd a closing paragraph following the code block afterwards.");
        let chunks = splitter.split_file("/docs/code.md", &text).unwrap();
        assert!(
            chunks.iter().any(|c| c.text.contains(fence)),
            "fence was split across chunks: {chunks:#?}"
        );
    }

    #[test]
    fn test_oversized_fence_is_split() {
        let splitter = MarkdownSplitter::new(100, 10);
        let body = (0..30).map(|i| format!("let x{i} = {i};")).collect::<Vec<_>>().join("\n");
        let text = format!("```\n{body}\n```");
        let chunks = splitter.split_file("/docs/big.md", &text).unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.len() <= 100));
    }

    #[test]
    fn test_header_stack_is_carried() {
        let splitter = MarkdownSplitter::default();
        let text = "# Guide\n\n## Setup\n\nInstall the thing.\n\n## Usage\n\nRun the thing.";
        let chunks = splitter.split_file("/docs/h.md", &text).unwrap();
        assert_eq!(chunks.len(), 1);
        // Single chunk starts at the document root.
        assert_eq!(chunks[0].headers, vec![Heading { level: 1, title: "Guide".into() }]);

        // Force a split inside "Usage" and check the stack on the later chunk.
        let splitter = MarkdownSplitter::new(60, 10);
        let text = "# Guide\n\n## Usage\n\nFirst paragraph of usage details here.\n\nSecond paragraph of usage details over here.";
        let chunks = splitter.split_file("/docs/h.md", text).unwrap();
        assert!(chunks.len() > 1);
        let last = chunks.last().unwrap();
        assert_eq!(
            last.headers,
            vec![
                Heading { level: 1, title: "Guide".into() },
                Heading { level: 2, title: "Usage".into() },
            ]
        );
    }

    #[test]
    fn test_sibling_header_replaces_stack_top() {
        let splitter = MarkdownSplitter::new(60, 0);
        let text = "## One\n\nBody of section one goes right here, long enough.\n\n## Two\n\nBody of section two goes right here, long enough.";
        let chunks = splitter.split_file("/docs/s.md", text).unwrap();
        let last = chunks.last().unwrap();
        assert_eq!(last.headers, vec![Heading { level: 2, title: "Two".into() }]);
    }
}

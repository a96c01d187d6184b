//! Outbound message chunking.
//!
//! Model replies regularly exceed Telegram's per-message limit, so they are
//! partitioned into ordered chunks before delivery. Splitting prefers paragraph
//! boundaries, falls back to sentence boundaries for oversized paragraphs, and
//! never cuts inside a sentence: a single sentence longer than the limit is
//! emitted verbatim as its own oversized chunk (the delivery layer owns the
//! last-resort truncation).

/// Split `text` into chunks that fit `max_len`.
///
/// Pure and stateless. Guarantees:
/// - the result is never empty, and a short input is returned as `[text]`;
/// - every chunk except an oversized single sentence has `len() < max_len`;
/// - chunks carry no trailing whitespace.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        if paragraph.len() > max_len {
            // Paragraph alone does not fit: pack sentence by sentence.
            for sentence in SentenceSplit::new(paragraph) {
                push_unit(&mut chunks, &mut current, &sentence, max_len);
            }
        } else {
            push_unit(&mut chunks, &mut current, &format!("{paragraph}\n\n"), max_len);
        }
    }

    if !current.is_empty() {
        chunks.push(current.trim_end().to_string());
    }

    if chunks.is_empty() {
        // Defensive: only reachable for pathological inputs (e.g. max_len 0).
        return vec![text.chars().take(max_len).collect()];
    }
    chunks
}

/// Append one atomic unit (paragraph or sentence, separator included) to the
/// running chunk, flushing first when the unit would meet or exceed the limit.
fn push_unit(chunks: &mut Vec<String>, current: &mut String, unit: &str, max_len: usize) {
    if current.len() + unit.len() < max_len {
        current.push_str(unit);
        return;
    }

    if !current.is_empty() {
        chunks.push(current.trim_end().to_string());
        current.clear();
    }
    current.push_str(unit);
}

/// Iterator over sentence units of a paragraph, splitting on ". " and keeping
/// the terminator with the preceding sentence.
struct SentenceSplit<'a> {
    rest: &'a str,
}

impl<'a> SentenceSplit<'a> {
    fn new(paragraph: &'a str) -> Self {
        Self { rest: paragraph }
    }
}

impl Iterator for SentenceSplit<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match self.rest.find(". ") {
            Some(idx) => {
                let sentence = &self.rest[..idx];
                self.rest = &self.rest[idx + 2..];
                Some(format!("{sentence}. "))
            }
            None => {
                // Final fragment: keep it verbatim, no invented terminator.
                let sentence = self.rest.to_string();
                self.rest = "";
                Some(sentence)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 100;

    #[test]
    fn short_input_is_returned_unchanged() {
        let text = "hello world";
        assert_eq!(split_message(text, LIMIT), vec![text.to_string()]);
    }

    #[test]
    fn input_at_exact_limit_is_a_single_chunk() {
        let text = "a".repeat(LIMIT);
        assert_eq!(split_message(&text, LIMIT), vec![text.clone()]);
    }

    #[test]
    fn empty_input_is_a_single_empty_chunk() {
        assert_eq!(split_message("", LIMIT), vec![String::new()]);
    }

    #[test]
    fn paragraphs_are_packed_greedily() {
        let p = "x".repeat(40);
        let text = format!("{p}\n\n{p}\n\n{p}\n\n{p}");
        let chunks = split_message(&text, LIMIT);

        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() < LIMIT, "chunk too long: {}", chunk.len());
            assert_eq!(chunk, chunk.trim_end());
        }
        // Paragraph boundaries are preserved: no paragraph is cut.
        let rejoined: Vec<&str> = chunks
            .iter()
            .flat_map(|c| c.split("\n\n"))
            .collect();
        assert_eq!(rejoined.len(), 4);
        for part in rejoined {
            assert_eq!(part, p);
        }
    }

    #[test]
    fn oversized_paragraph_splits_on_sentences() {
        let sentence = "word ".repeat(8).trim_end().to_string(); // ~39 chars
        let paragraph = format!("{s}. {s}. {s}. {s}. {s}", s = sentence); // > 100
        let chunks = split_message(&paragraph, LIMIT);

        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() < LIMIT);
            // Sentences stay whole.
            for s in chunk.split(". ") {
                assert!(s.trim_end_matches('.').trim().starts_with("word"));
            }
        }
    }

    #[test]
    fn single_oversized_sentence_is_emitted_verbatim() {
        let giant = "a".repeat(LIMIT * 2); // no ". " anywhere
        let text = format!("{giant}\n\nshort tail");
        let chunks = split_message(&text, LIMIT);

        assert!(chunks.iter().any(|c| c == &giant));
        assert!(chunks.iter().any(|c| c.contains("short tail")));
    }

    #[test]
    fn content_survives_modulo_boundary_whitespace() {
        let p1 = "First paragraph with a bit of text in it";
        let p2 = "Second paragraph that is also quite long yes";
        let p3 = "Third one";
        let text = format!("{p1}\n\n{p2}\n\n{p3}");
        let chunks = split_message(&text, 60);

        let rejoined = chunks.join("\n\n");
        for p in [p1, p2, p3] {
            assert!(rejoined.contains(p), "lost paragraph: {p}");
        }
    }

    #[test]
    fn chunks_are_ordered() {
        let text = (0..50)
            .map(|i| format!("paragraph number {i:03}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = split_message(&text, 120);

        let mut seen = Vec::new();
        for chunk in &chunks {
            for part in chunk.split("\n\n") {
                seen.push(part.to_string());
            }
        }
        let expected: Vec<String> = (0..50).map(|i| format!("paragraph number {i:03}")).collect();
        assert_eq!(seen, expected);
    }
}

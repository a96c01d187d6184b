//! Formatting utilities (model-output Markdown → Telegram HTML).

use regex::Regex;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Convert the markdown subset models actually emit to Telegram-compatible
/// HTML. Telegram supports only `<b>`, `<i>`, `<code>`, `<pre>` and
/// `<a href="...">`; everything else is flattened to text.
pub fn markdown_to_html(input: &str) -> String {
    // Pull code spans out before escaping so their contents survive verbatim.
    let (text, code_blocks) = extract_fenced(input);
    let (text, inline_codes) = extract_inline(&text);

    let mut text = escape_html(&text);

    // Line-oriented transforms keep emphasis from spanning lines.
    let mut lines = Vec::new();
    for line in text.split('\n') {
        let mut l = header_to_bold(line);
        l = replace_delimited(&l, "**", "<b>", "</b>");
        l = replace_delimited(&l, "__", "<b>", "</b>");
        if let Some(rest) = l.strip_prefix("- ").or_else(|| l.strip_prefix("* ")) {
            l = format!("• {rest}");
        }
        lines.push(l);
    }
    text = lines.join("\n");

    // [text](url) -> <a href="url">text</a>; conservative, no nested brackets.
    let link_re = Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("valid regex");
    text = link_re
        .replace_all(&text, r#"<a href="$2">$1</a>"#)
        .to_string();

    for (i, code) in code_blocks.iter().enumerate() {
        let escaped = escape_html(code);
        text = text.replace(
            &format!("\0FENCE{i}\0"),
            &format!("<pre>{escaped}</pre>"),
        );
    }
    for (i, code) in inline_codes.iter().enumerate() {
        let escaped = escape_html(code);
        text = text.replace(
            &format!("\0INLINE{i}\0"),
            &format!("<code>{escaped}</code>"),
        );
    }

    while text.contains("\n\n\n") {
        text = text.replace("\n\n\n", "\n\n");
    }
    text
}

fn extract_fenced(input: &str) -> (String, Vec<String>) {
    let mut blocks = Vec::new();
    let mut out = String::new();

    let mut i = 0usize;
    while let Some(rel) = input[i..].find("```") {
        let start = i + rel;
        out.push_str(&input[i..start]);

        let mut p = start + 3;
        // Skip an optional language identifier and one newline.
        while p < input.len() {
            let b = input.as_bytes()[p];
            if b.is_ascii_alphanumeric() || b == b'_' {
                p += 1;
            } else {
                break;
            }
        }
        if p < input.len() && input.as_bytes()[p] == b'\n' {
            p += 1;
        }

        if let Some(end_rel) = input[p..].find("```") {
            let end = p + end_rel;
            let idx = blocks.len();
            blocks.push(input[p..end].to_string());
            out.push_str(&format!("\0FENCE{idx}\0"));
            i = end + 3;
            continue;
        }

        // Unclosed fence: leave the rest untouched.
        out.push_str(&input[start..]);
        return (out, blocks);
    }

    out.push_str(&input[i..]);
    (out, blocks)
}

fn extract_inline(input: &str) -> (String, Vec<String>) {
    let mut codes = Vec::new();
    let mut out = String::new();

    let mut i = 0usize;
    while let Some(rel) = input[i..].find('`') {
        let start = i + rel;
        out.push_str(&input[i..start]);

        let content_start = start + 1;
        if let Some(end_rel) = input[content_start..].find('`') {
            let end = content_start + end_rel;
            let idx = codes.len();
            codes.push(input[content_start..end].to_string());
            out.push_str(&format!("\0INLINE{idx}\0"));
            i = end + 1;
            continue;
        }

        out.push_str(&input[start..]);
        return (out, codes);
    }

    out.push_str(&input[i..]);
    (out, codes)
}

fn header_to_bold(line: &str) -> String {
    let bytes = line.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() && bytes[i] == b'#' && i < 6 {
        i += 1;
    }
    if i > 0 && i < bytes.len() && bytes[i] == b' ' {
        return format!("<b>{}</b>", &line[i + 1..]);
    }
    line.to_string()
}

fn replace_delimited(text: &str, delim: &str, open: &str, close: &str) -> String {
    let mut out = String::new();
    let mut i = 0usize;
    while let Some(rel) = text[i..].find(delim) {
        let start = i + rel;
        out.push_str(&text[i..start]);
        let content_start = start + delim.len();
        if let Some(end_rel) = text[content_start..].find(delim) {
            let end = content_start + end_rel;
            out.push_str(open);
            out.push_str(&text[content_start..end]);
            out.push_str(close);
            i = end + delim.len();
            continue;
        }
        // Unmatched opener stays literal.
        out.push_str(&text[start..]);
        return out;
    }
    out.push_str(&text[i..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html() {
        let s = r#"<a href="x&y">"#;
        assert_eq!(escape_html(s), "&lt;a href=&quot;x&amp;y&quot;&gt;");
    }

    #[test]
    fn fenced_code_contents_are_escaped_but_not_formatted() {
        let md = "hi\n```rust\nlet x = \"<b>\";\n```\nbye";
        let html = markdown_to_html(md);
        assert!(html.contains("<pre>"));
        assert!(html.contains("let x = &quot;&lt;b&gt;&quot;;"));
        assert!(!html.contains("<b>"));
    }

    #[test]
    fn inline_code_is_preserved() {
        let html = markdown_to_html("run `cargo --version` now");
        assert_eq!(html, "run <code>cargo --version</code> now");
    }

    #[test]
    fn bold_and_headers() {
        assert_eq!(markdown_to_html("**hi**"), "<b>hi</b>");
        assert_eq!(markdown_to_html("## Title"), "<b>Title</b>");
        // Unmatched delimiter stays literal.
        assert_eq!(markdown_to_html("a ** b"), "a ** b");
    }

    #[test]
    fn bullets_and_links() {
        assert_eq!(markdown_to_html("- item"), "• item");
        assert_eq!(
            markdown_to_html("[x](https://example.com)"),
            r#"<a href="https://example.com">x</a>"#
        );
    }
}

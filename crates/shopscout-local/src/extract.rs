/// Collapse runs of whitespace inside one text block to single spaces.
pub(crate) fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract paragraph-level text from HTML.
///
/// Reads only `<p>` text nodes, in document order, one line per paragraph.
/// Scripts, styles, and navigation chrome are excluded by construction.
/// Deterministic: the same input always yields the same output.
pub fn paragraph_text(html: &str) -> String {
    let doc = html_scraper::Html::parse_document(html);
    let sel = match html_scraper::Selector::parse("p") {
        Ok(s) => s,
        Err(_) => return String::new(),
    };

    let mut blocks: Vec<String> = Vec::new();
    for el in doc.select(&sel) {
        let text = norm_ws(&el.text().collect::<Vec<_>>().join(" "));
        if text.is_empty() {
            continue;
        }
        blocks.push(text);
    }
    blocks.join("\n")
}

/// Char-boundary-safe truncation. Returns the (possibly shortened) text and
/// whether anything was dropped.
pub fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    if max_chars == 0 {
        return ("".to_string(), !s.is_empty());
    }
    let mut out = String::new();
    for (n, ch) in s.chars().enumerate() {
        if n >= max_chars {
            return (out, true);
        }
        out.push(ch);
    }
    (out, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reads_paragraphs_in_document_order() {
        let html = r#"
        <html><body>
          <nav><a href="/">Home</a></nav>
          <p>First paragraph.</p>
          <div><p>Second   one,
          wrapped.</p></div>
          <script>var x = "ignored";</script>
          <p>Third.</p>
        </body></html>
        "#;
        assert_eq!(
            paragraph_text(html),
            "First paragraph.\nSecond one, wrapped.\nThird."
        );
    }

    #[test]
    fn ignores_non_paragraph_content() {
        let html = r#"
        <html><head><style>p { color: red; }</style></head>
        <body><h1>Big heading</h1><ul><li>item</li></ul><div>bare text</div></body></html>
        "#;
        assert_eq!(paragraph_text(html), "");
    }

    #[test]
    fn skips_empty_paragraphs() {
        let html = "<p>  </p><p>kept</p><p></p>";
        assert_eq!(paragraph_text(html), "kept");
    }

    #[test]
    fn extraction_is_idempotent_on_fixed_input() {
        let html = "<p>alpha</p><p>beta</p>";
        assert_eq!(paragraph_text(html), paragraph_text(html));
    }

    #[test]
    fn truncate_chars_is_char_boundary_safe() {
        let (out, truncated) = truncate_chars("héllo wörld", 5);
        assert_eq!(out, "héllo");
        assert!(truncated);

        let (out, truncated) = truncate_chars("short", 100);
        assert_eq!(out, "short");
        assert!(!truncated);

        let (out, truncated) = truncate_chars("x", 0);
        assert_eq!(out, "");
        assert!(truncated);
    }

    proptest! {
        #[test]
        fn paragraph_text_never_panics(html in any::<String>()) {
            let _ = paragraph_text(&html);
        }

        #[test]
        fn truncate_chars_respects_cap(s in any::<String>(), max in 0usize..200) {
            let (out, _) = truncate_chars(&s, max);
            prop_assert!(out.chars().count() <= max);
        }
    }
}

//! Word segmentation shared by the sparse analyzer and the model-free backends.
//!
//! Latin text splits on UAX#29 word boundaries. Han and kana have no spaces
//! between words, so each contiguous run of them is indexed as overlapping
//! character bigrams ("违约金" becomes "违约", "约金"); a lone character
//! stays a unigram. A query and a passage that share a Chinese word then
//! share its bigrams wherever the word sits in a longer sentence.
use std::borrow::Cow;
use std::ops::Range;

use unicode_segmentation::UnicodeSegmentation;

/// Han ideographs (including extension A/B and compatibility forms) and kana.
pub fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{20000}'..='\u{2A6DF}')
}

/// Byte ranges of the terms in `text`, in reading order.
pub fn term_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut run: Vec<Range<usize>> = Vec::new();
    for (start, word) in text.unicode_word_indices() {
        if word.chars().all(is_cjk) {
            if run.last().is_some_and(|r| r.end != start) {
                flush_run(&mut run, &mut spans);
            }
            run.extend(word.char_indices().map(|(i, c)| start + i..start + i + c.len_utf8()));
        } else {
            flush_run(&mut run, &mut spans);
            spans.push(start..start + word.len());
        }
    }
    flush_run(&mut run, &mut spans);
    spans
}

fn flush_run(run: &mut Vec<Range<usize>>, spans: &mut Vec<Range<usize>>) {
    match run.len() {
        0 => {}
        1 => spans.push(run[0].clone()),
        _ => spans.extend(run.windows(2).map(|w| w[0].start..w[1].end)),
    }
    run.clear();
}

/// Lower-cased terms of `text`.
pub fn terms(text: &str) -> Vec<String> {
    term_spans(text).into_iter().map(|r| text[r].to_lowercase()).collect()
}

/// Rewrites every CJK run of a query as space-separated bigrams so a query
/// parser sees independent terms instead of one phrase.
pub fn spread_cjk(query: &str) -> Cow<'_, str> {
    if !query.chars().any(is_cjk) {
        return Cow::Borrowed(query);
    }
    let mut out = String::with_capacity(query.len() * 3);
    let mut run: Vec<char> = Vec::new();
    for c in query.chars() {
        if is_cjk(c) {
            run.push(c);
            continue;
        }
        push_bigrams(&mut run, &mut out);
        out.push(c);
    }
    push_bigrams(&mut run, &mut out);
    Cow::Owned(out)
}

fn push_bigrams(run: &mut Vec<char>, out: &mut String) {
    match run.len() {
        0 => return,
        1 => out.push(run[0]),
        _ => {
            for w in run.windows(2) {
                out.push(' ');
                out.push(w[0]);
                out.push(w[1]);
            }
            out.push(' ');
        }
    }
    run.clear();
}

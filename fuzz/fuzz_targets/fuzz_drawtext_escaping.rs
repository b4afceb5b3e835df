#![no_main]

use libfuzzer_sys::fuzz_target;

use relaymark::media::watermark::escape_drawtext;

/// Drop one level of backslash escaping.
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fuzz_target!(|data: &str| {
    // Watermark text is embedded in an ffmpeg filter graph. Escaping must be
    // lossless across both parsing levels, and no unescaped separator may
    // survive to split the graph.
    let escaped = escape_drawtext(data);
    assert_eq!(unescape(&unescape(&escaped)), data);

    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            ',' | ';' | '[' | ']' | '\'' => panic!("unescaped separator in {escaped:?}"),
            _ => {}
        }
    }
});

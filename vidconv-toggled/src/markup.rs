//! Just enough XML and HTML scanning for device description documents and
//! the receiver's settings page. Neither is a general parser.

use std::collections::HashMap;

/// Text content of the first `<tag>` element in `xml`, trimmed and unescaped.
/// Empty elements are treated as missing.
pub fn element_text(xml: &str, tag: &str) -> Option<String> {
    let (_, content_start) = find_start_tag(xml, tag, 0)?;
    let close = format!("</{}>", tag);
    let end = xml[content_start..].find(close.as_str())?;

    let raw = xml[content_start..content_start + end].trim();
    let raw = raw
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
        .unwrap_or(raw);

    let value = unescape(raw.trim());
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Inner markup of the first `<tag>` element, without any nested `<stop>` section.
///
/// Used to look at the root `<device>` of a description without picking up
/// fields from the embedded devices in its `<deviceList>`.
pub fn element_section<'a>(xml: &'a str, tag: &str, stop: &str) -> Option<&'a str> {
    let (_, content_start) = find_start_tag(xml, tag, 0)?;
    let rest = &xml[content_start..];

    let mut end = rest.len();
    if let Some((stop_at, _)) = find_start_tag(rest, stop, 0) {
        end = stop_at;
    }
    let close = format!("</{}>", tag);
    if let Some(close_at) = rest.find(close.as_str()) {
        end = end.min(close_at);
    }
    Some(&rest[..end])
}

/// Byte offsets of the `<` and of the first byte after the `>` of the first
/// start tag named `tag` at or after `from`. `<deviceType>` does not match `device`.
fn find_start_tag(xml: &str, tag: &str, from: usize) -> Option<(usize, usize)> {
    let open = format!("<{}", tag);
    let mut search_from = from;

    while let Some(rel) = xml[search_from..].find(open.as_str()) {
        let start = search_from + rel;
        let after = start + open.len();
        match xml[after..].chars().next() {
            Some('>') => return Some((start, after + 1)),
            Some(c) if c.is_whitespace() => {
                let close = xml[after..].find('>')?;
                if xml[..after + close].ends_with('/') {
                    // Self-closing, no content
                    search_from = after + close + 1;
                    continue;
                }
                return Some((start, after + close + 1));
            }
            _ => search_from = after,
        }
    }
    None
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Attributes of one `<input>` element. Names are lower-cased; a bare
/// attribute such as `checked` maps to `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputElement {
    pub attributes: HashMap<String, Option<String>>,
}

impl InputElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_deref())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }
}

/// Every `<input>` element in an HTML document, in document order
pub fn input_elements(html: &str) -> Vec<InputElement> {
    // ASCII lower-casing keeps byte offsets identical to `html`
    let lowered = html.to_ascii_lowercase();
    let mut inputs = Vec::new();
    let mut pos = 0;

    while let Some(rel) = lowered[pos..].find("<input") {
        let attrs_start = pos + rel + "<input".len();
        let boundary_ok = matches!(
            lowered[attrs_start..].chars().next(),
            Some(c) if c.is_whitespace() || c == '/' || c == '>'
        );
        if !boundary_ok {
            pos = attrs_start;
            continue;
        }

        let (element, consumed) = parse_attributes(&html[attrs_start..]);
        inputs.push(element);
        pos = attrs_start + consumed;
    }

    inputs
}

/// Parse attributes up to the closing `>`. Returns the element and the number of bytes consumed.
fn parse_attributes(s: &str) -> (InputElement, usize) {
    let bytes = s.as_bytes();
    let mut element = InputElement::default();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'>' => return (element, i + 1),
            b'/' => i += 1,
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                let name_start = i;
                while i < bytes.len()
                    && !bytes[i].is_ascii_whitespace()
                    && !matches!(bytes[i], b'=' | b'>' | b'/')
                {
                    i += 1;
                }
                let name = s[name_start..i].to_ascii_lowercase();

                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }

                if i < bytes.len() && bytes[i] == b'=' {
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                        i += 1;
                    }
                    let value = match bytes.get(i) {
                        Some(&q) if q == b'"' || q == b'\'' => {
                            let value_start = i + 1;
                            let len = bytes[value_start..].iter().position(|&b| b == q);
                            let value_end = len.map_or(bytes.len(), |l| value_start + l);
                            i = (value_end + 1).min(bytes.len());
                            &s[value_start..value_end]
                        }
                        _ => {
                            let value_start = i;
                            while i < bytes.len()
                                && !bytes[i].is_ascii_whitespace()
                                && bytes[i] != b'>'
                            {
                                i += 1;
                            }
                            &s[value_start..i]
                        }
                    };
                    element.attributes.entry(name).or_insert(Some(value.to_string()));
                } else {
                    element.attributes.entry(name).or_insert(None);
                }
            }
        }
    }

    (element, bytes.len())
}

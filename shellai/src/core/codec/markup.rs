//! Tagged-markup wire format (`<response>...</response>`).
//!
//! This is not a general XML parser. It understands just enough to project a
//! model reply into a JSON value: elements, attributes, entities, CDATA and
//! comments. Known scalar fields keep their inner text verbatim (entity-decoded)
//! even when the text itself looks like markup, so script content such as
//! `if [ $a -lt 3 ]; then echo "<b>"; fi` survives.

use serde_json::{Map, Value};
use tracing::warn;

use crate::core::action::{ActionDocument, HistoryEntry, Role, ScriptDescriptor};

const ROOT: &str = "response";

/// Fields whose inner text is always taken as a string.
const SCALAR_FIELDS: &[&str] = &[
    "action",
    "kind",
    "message",
    "filename",
    "content",
    "type",
    "description",
    "prepare",
    "confirm_message",
    "input_label",
    "input_description",
];

/// Whether `raw` looks like a markup reply.
pub fn contains_root(raw: &str) -> bool {
    find_open_tag(raw, ROOT, 0).is_some()
}

/// Extract the `<response>` root (ignoring surrounding prose or fences) and
/// project it to a JSON object.
pub fn to_value(raw: &str) -> Result<Value, String> {
    let start = find_open_tag(raw, ROOT, 0).ok_or_else(|| "no <response> root".to_string())?;
    let (root, _) = parse_element(raw, start)?;
    let mut fields = Map::new();
    for child in root.children(raw)? {
        if fields.contains_key(&child.name) {
            continue;
        }
        let value = project(raw, &child)?;
        fields.insert(child.name.clone(), value);
    }
    Ok(Value::Object(fields))
}

/// Render `doc` as a `<response>` document.
pub fn encode(doc: &ActionDocument) -> String {
    let mut out = String::from("<response>\n");
    push_field(&mut out, "action", Some(doc.kind.as_str()));
    push_field(&mut out, "message", doc.message.as_deref());
    if let Some(script) = &doc.script {
        push_script(&mut out, script);
    }
    push_field(&mut out, "confirm_message", doc.confirm_message.as_deref());
    push_field(&mut out, "input_label", doc.input_label.as_deref());
    push_field(
        &mut out,
        "input_description",
        doc.input_description.as_deref(),
    );
    if let Some(history) = &doc.history {
        push_history(&mut out, history);
    }
    out.push_str("</response>");
    out
}

fn push_field(out: &mut String, name: &str, value: Option<&str>) {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return;
    };
    out.push_str(&format!("<{name}>{}</{name}>\n", escape(value)));
}

fn push_script(out: &mut String, script: &ScriptDescriptor) {
    out.push_str("<script>\n");
    push_field(out, "filename", Some(&script.filename));
    // Decoding drops one leading newline, so a content that starts with a
    // newline needs an extra one to survive.
    let content = if script.content.starts_with('\n') {
        format!("\n{}", escape(&script.content))
    } else {
        escape(&script.content)
    };
    out.push_str(&format!("<content>{content}</content>\n"));
    push_field(out, "type", Some(script.interpreter.type_tag()));
    push_field(out, "description", script.description.as_deref());
    push_field(out, "prepare", script.prepare.as_deref());
    out.push_str("</script>\n");
}

fn push_history(out: &mut String, history: &[HistoryEntry]) {
    out.push_str("<history>\n");
    for entry in history {
        out.push_str(&format!(
            "<message role=\"{}\">{}</message>\n",
            entry.role.as_str(),
            escape(&entry.content)
        ));
    }
    out.push_str("</history>\n");
}

/// Escape text for element content and double-quoted attributes.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// One element located in the source text by byte offsets.
#[derive(Debug)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    /// Byte range of the inner text, empty for self-closing tags.
    inner: (usize, usize),
}

impl Element {
    fn inner_text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.inner.0..self.inner.1]
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Direct child elements, skipping text, comments and CDATA between them.
    fn children(&self, source: &str) -> Result<Vec<Element>, String> {
        let mut children = Vec::new();
        let mut pos = self.inner.0;
        while pos < self.inner.1 {
            let Some(offset) = source[pos..self.inner.1].find('<') else {
                break;
            };
            let at = pos + offset;
            let rest = &source[at..self.inner.1];
            if rest.starts_with("<!--") {
                pos = skip_past(source, at, "-->")?;
            } else if rest.starts_with("<![CDATA[") {
                pos = skip_past(source, at, "]]>")?;
            } else if rest.starts_with("<?") || rest.starts_with("<!") {
                pos = skip_past(source, at, ">")?;
            } else if starts_name(rest[1..].chars().next()) {
                let (child, end) = parse_element(source, at)?;
                if end > self.inner.1 {
                    return Err(format!("<{}> overruns <{}>", child.name, self.name));
                }
                children.push(child);
                pos = end;
            } else {
                pos = at + 1;
            }
        }
        Ok(children)
    }
}

fn project(source: &str, element: &Element) -> Result<Value, String> {
    let name = element.name.as_str();
    if SCALAR_FIELDS.contains(&name) {
        let mut text = decode_text(element.inner_text(source));
        if name == "content" {
            strip_leading_newline(&mut text);
        }
        return Ok(Value::String(text));
    }
    if name == "history" {
        return project_history(source, element);
    }
    let children = element.children(source)?;
    if children.is_empty() {
        let text = decode_text(element.inner_text(source));
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        return Ok(Value::String(text));
    }
    let mut fields = Map::new();
    for child in &children {
        if fields.contains_key(&child.name) {
            continue;
        }
        fields.insert(child.name.clone(), project(source, child)?);
    }
    Ok(Value::Object(fields))
}

fn project_history(source: &str, element: &Element) -> Result<Value, String> {
    let mut entries = Vec::new();
    for child in element.children(source)? {
        // `<message role="user">` or a bare `<user>` / `<assistant>` tag.
        let role = child
            .attribute("role")
            .unwrap_or(child.name.as_str())
            .trim()
            .to_ascii_lowercase();
        if role != Role::User.as_str() && role != Role::Assistant.as_str() {
            warn!(role = %role, "dropping history entry with unknown role");
            continue;
        }
        let content = decode_text(child.inner_text(source));
        let mut entry = Map::new();
        entry.insert("role".to_string(), Value::String(role));
        entry.insert("content".to_string(), Value::String(content));
        entries.push(Value::Object(entry));
    }
    Ok(Value::Array(entries))
}

fn strip_leading_newline(text: &mut String) {
    if text.starts_with("\r\n") {
        text.drain(..2);
    } else if text.starts_with('\n') {
        text.remove(0);
    }
}

fn starts_name(ch: Option<char>) -> bool {
    ch.is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

fn skip_past(source: &str, from: usize, terminator: &str) -> Result<usize, String> {
    source[from..]
        .find(terminator)
        .map(|i| from + i + terminator.len())
        .ok_or_else(|| format!("unterminated construct, expected `{terminator}`"))
}

/// Find `<name` followed by `>`, `/` or whitespace at or after `from`.
fn find_open_tag(source: &str, name: &str, from: usize) -> Option<usize> {
    let needle = format!("<{name}");
    let mut pos = from;
    while let Some(offset) = source[pos..].find(&needle) {
        let at = pos + offset;
        let next = source[at + needle.len()..].chars().next();
        if matches!(next, Some(c) if c == '>' || c == '/' || c.is_whitespace()) {
            return Some(at);
        }
        pos = at + needle.len();
    }
    None
}

fn find_close_tag(source: &str, name: &str, from: usize) -> Option<usize> {
    let needle = format!("</{name}");
    let mut pos = from;
    while let Some(offset) = source[pos..].find(&needle) {
        let at = pos + offset;
        let next = source[at + needle.len()..].chars().next();
        if matches!(next, Some(c) if c == '>' || c.is_whitespace()) {
            return Some(at);
        }
        pos = at + needle.len();
    }
    None
}

/// Parse the element whose open tag starts at `start`.
///
/// Returns the element and the byte offset just past its end tag. Nested
/// elements with the same name are balanced; everything else inside is
/// opaque until [`Element::children`] or [`decode_text`] looks at it.
fn parse_element(source: &str, start: usize) -> Result<(Element, usize), String> {
    let after_lt = start + 1;
    let name_len = source[after_lt..]
        .char_indices()
        .find(|(_, c)| !is_name_char(*c))
        .map(|(i, _)| i)
        .unwrap_or(source.len() - after_lt);
    let name = source[after_lt..after_lt + name_len].to_string();
    if name.is_empty() {
        return Err(format!("expected element name at byte {start}"));
    }
    let tag_end = find_tag_end(source, after_lt + name_len)
        .ok_or_else(|| format!("unterminated <{name}> tag"))?;
    let tag_body = &source[after_lt + name_len..tag_end];
    let self_closing = tag_body.trim_end().ends_with('/');
    let attributes = parse_attributes(tag_body.trim_end().trim_end_matches('/'));
    let inner_start = tag_end + 1;
    if self_closing {
        let element = Element {
            name,
            attributes,
            inner: (inner_start, inner_start),
        };
        return Ok((element, inner_start));
    }

    let mut depth = 1usize;
    let mut pos = inner_start;
    loop {
        let close = find_close_tag(source, &name, pos)
            .ok_or_else(|| format!("missing </{name}> end tag"))?;
        // Count same-name opens between here and the candidate close.
        let mut scan = pos;
        while let Some(open) = find_open_tag(&source[..close], &name, scan) {
            let open_end = find_tag_end(source, open + 1 + name.len()).unwrap_or(close);
            if !source[open..=open_end.min(close)].trim_end_matches('>').ends_with('/') {
                depth += 1;
            }
            scan = open + 1;
        }
        depth -= 1;
        let close_end = source[close..]
            .find('>')
            .map(|i| close + i + 1)
            .ok_or_else(|| format!("unterminated </{name}> tag"))?;
        if depth == 0 {
            let element = Element {
                name,
                attributes,
                inner: (inner_start, close),
            };
            return Ok((element, close_end));
        }
        pos = close_end;
    }
}

/// Offset of the `>` that ends a start tag, honouring quoted attribute values.
fn find_tag_end(source: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in source[from..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(from + i),
            (None, _) => {}
        }
    }
    None
}

fn parse_attributes(body: &str) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    let mut rest = body.trim_start();
    while !rest.is_empty() {
        let key_len = rest.find(|c: char| !is_name_char(c)).unwrap_or(rest.len());
        if key_len == 0 {
            break;
        }
        let key = rest[..key_len].to_string();
        rest = rest[key_len..].trim_start();
        let Some(after_eq) = rest.strip_prefix('=') else {
            attributes.push((key, String::new()));
            continue;
        };
        rest = after_eq.trim_start();
        let (value, remaining) = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => match rest[1..].find(q) {
                Some(end) => (&rest[1..=end], &rest[end + 2..]),
                None => (&rest[1..], ""),
            },
            _ => {
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                (&rest[..end], &rest[end..])
            }
        };
        attributes.push((key, decode_entities(value)));
        rest = remaining.trim_start();
    }
    attributes
}

/// Inner text with CDATA sections taken literally, comments dropped and
/// entities decoded everywhere else.
pub fn decode_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    loop {
        let cdata = rest.find("<![CDATA[");
        let comment = rest.find("<!--");
        let next = match (cdata, comment) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let Some(at) = next else {
            out.push_str(&decode_entities(rest));
            return out;
        };
        out.push_str(&decode_entities(&rest[..at]));
        let (terminator, open_len) = if Some(at) == cdata {
            ("]]>", "<![CDATA[".len())
        } else {
            ("-->", "<!--".len())
        };
        let body = &rest[at + open_len..];
        match body.find(terminator) {
            Some(end) => {
                if terminator == "]]>" {
                    out.push_str(&body[..end]);
                }
                rest = &body[end + terminator.len()..];
            }
            None => {
                // Unterminated section: keep the remainder as literal text.
                out.push_str(&rest[at..]);
                return out;
            }
        }
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail
            .find(';')
            .filter(|semi| *semi <= 10)
            .and_then(|semi| decode_entity(&tail[1..semi]).map(|ch| (ch, semi)));
        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = if let Some(hex) = name
                .strip_prefix("#x")
                .or_else(|| name.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

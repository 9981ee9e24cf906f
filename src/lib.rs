use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use chrono::{Local, Timelike};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    HtmlParse(String),
    ElementNotFound(String),
    FormNotFound(String),
    FieldNotFound {
        form: String,
        field: String,
    },
    TypeMismatch {
        target: String,
        expected: String,
        actual: String,
    },
    InvalidTime {
        hour: u32,
        minute: u32,
    },
    InvalidLimit(String),
    AssertionFailed {
        target: String,
        expected: String,
        actual: String,
        dom_snippet: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HtmlParse(msg) => write!(f, "html parse error: {msg}"),
            Self::ElementNotFound(id) => write!(f, "element not found: {id}"),
            Self::FormNotFound(name) => write!(f, "form not found: {name}"),
            Self::FieldNotFound { form, field } => {
                write!(f, "field not found: {field} in form {form}")
            }
            Self::TypeMismatch {
                target,
                expected,
                actual,
            } => write!(
                f,
                "type mismatch for {target}: expected {expected}, actual {actual}"
            ),
            Self::InvalidTime { hour, minute } => {
                write!(f, "invalid time: hour={hour}, minute={minute}")
            }
            Self::InvalidLimit(msg) => write!(f, "invalid limit: {msg}"),
            Self::AssertionFailed {
                target,
                expected,
                actual,
                dom_snippet,
            } => write!(
                f,
                "assertion failed for {target}: expected {expected}, actual {actual}, snippet {dom_snippet}"
            ),
        }
    }
}

impl StdError for Error {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeType {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    node_type: NodeType,
}

#[derive(Debug, Clone)]
struct Element {
    tag_name: String,
    attrs: HashMap<String, String>,
    value: String,
}

#[derive(Debug, Clone)]
struct Dom {
    nodes: Vec<Node>,
    root: NodeId,
    id_index: HashMap<String, NodeId>,
}

impl Dom {
    fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            node_type: NodeType::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            id_index: HashMap::new(),
        }
    }

    fn create_node(&mut self, parent: Option<NodeId>, node_type: NodeType) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            node_type,
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        id
    }

    fn create_element(
        &mut self,
        parent: NodeId,
        tag_name: String,
        attrs: HashMap<String, String>,
    ) -> NodeId {
        let value = attrs.get("value").cloned().unwrap_or_default();
        let element = Element {
            tag_name,
            attrs,
            value,
        };
        let id = self.create_node(Some(parent), NodeType::Element(element));
        if let Some(id_attr) = self
            .element(id)
            .and_then(|element| element.attrs.get("id").cloned())
        {
            self.id_index.insert(id_attr, id);
        }
        id
    }

    fn create_text(&mut self, parent: NodeId, text: String) -> NodeId {
        self.create_node(Some(parent), NodeType::Text(text))
    }

    fn element(&self, node_id: NodeId) -> Option<&Element> {
        match &self.nodes[node_id.0].node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, node_id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[node_id.0].node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        self.element(node_id).map(|e| e.tag_name.as_str())
    }

    fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.nodes[node_id.0].parent
    }

    fn is_descendant_of(&self, node_id: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = self.parent(node_id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    fn by_id(&self, id: &str) -> Option<NodeId> {
        self.id_index.get(id).copied()
    }

    fn all_element_nodes(&self) -> Vec<NodeId> {
        (0..self.nodes.len())
            .map(NodeId)
            .filter(|node| self.element(*node).is_some())
            .collect()
    }

    fn text_content(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document | NodeType::Element(_) => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.text_content(*child));
                }
                out
            }
            NodeType::Text(text) => text.clone(),
        }
    }

    fn value(&self, node_id: NodeId) -> String {
        self.element(node_id)
            .map(|element| element.value.clone())
            .unwrap_or_default()
    }

    fn set_value(&mut self, node_id: NodeId, value: &str) {
        if let Some(element) = self.element_mut(node_id) {
            element.value = value.to_string();
        }
    }

    fn initialize_form_control_values(&mut self) {
        for node in self.all_element_nodes() {
            let is_textarea = self
                .tag_name(node)
                .is_some_and(|tag| tag.eq_ignore_ascii_case("textarea"));
            if is_textarea {
                let text = self.text_content(node);
                if let Some(element) = self.element_mut(node) {
                    element.value = text;
                }
            }
        }
    }

    fn style_get(&self, node_id: NodeId, prop: &str) -> String {
        let Some(element) = self.element(node_id) else {
            return String::new();
        };
        let decls = parse_style_declarations(element.attrs.get("style").map(String::as_str));
        decls
            .iter()
            .find(|(name, _)| name == prop)
            .map(|(_, value)| value.clone())
            .unwrap_or_default()
    }

    fn style_set(&mut self, node_id: NodeId, prop: &str, value: &str) {
        let Some(element) = self.element_mut(node_id) else {
            return;
        };

        let mut decls = parse_style_declarations(element.attrs.get("style").map(String::as_str));
        if let Some(pos) = decls.iter().position(|(name, _)| name == prop) {
            if value.is_empty() {
                decls.remove(pos);
            } else {
                decls[pos].1 = value.to_string();
            }
        } else if !value.is_empty() {
            decls.push((prop.to_string(), value.to_string()));
        }

        if decls.is_empty() {
            // Keep an empty style attribute to match CSSStyleDeclaration behavior.
            element.attrs.insert("style".to_string(), String::new());
        } else {
            element
                .attrs
                .insert("style".to_string(), serialize_style_declarations(&decls));
        }
    }

    fn form_by_name(&self, name: &str) -> Option<NodeId> {
        self.all_element_nodes().into_iter().find(|node| {
            self.element(*node).is_some_and(|element| {
                element.tag_name.eq_ignore_ascii_case("form")
                    && element.attrs.get("name").map(String::as_str) == Some(name)
            })
        })
    }

    fn form_field(&self, form_node: NodeId, field: &str) -> Option<NodeId> {
        self.all_element_nodes().into_iter().find(|node| {
            is_form_control(self, *node)
                && self.is_descendant_of(*node, form_node)
                && self.element(*node).is_some_and(|element| {
                    element.attrs.get("name").map(String::as_str) == Some(field)
                })
        })
    }

    fn dump_node(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node(*child));
                }
                out
            }
            NodeType::Text(text) => text.clone(),
            NodeType::Element(element) => {
                let mut out = String::new();
                out.push('<');
                out.push_str(&element.tag_name);
                for (k, v) in &element.attrs {
                    out.push(' ');
                    out.push_str(k);
                    out.push_str("=\"");
                    out.push_str(v);
                    out.push('"');
                }
                out.push('>');
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node(*child));
                }
                out.push_str("</");
                out.push_str(&element.tag_name);
                out.push('>');
                out
            }
        }
    }
}

fn is_form_control(dom: &Dom, node_id: NodeId) -> bool {
    let Some(element) = dom.element(node_id) else {
        return false;
    };

    element.tag_name.eq_ignore_ascii_case("input")
        || element.tag_name.eq_ignore_ascii_case("select")
        || element.tag_name.eq_ignore_ascii_case("textarea")
        || element.tag_name.eq_ignore_ascii_case("button")
}

fn parse_style_declarations(style_attr: Option<&str>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let Some(style_attr) = style_attr else {
        return out;
    };

    for decl in style_attr.split(';') {
        let decl = decl.trim();
        if decl.is_empty() {
            continue;
        }
        let Some((name, value)) = decl.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        let value = value.trim().to_string();
        if let Some(pos) = out.iter().position(|(existing, _)| existing == &name) {
            out[pos].1 = value;
        } else {
            out.push((name, value));
        }
    }

    out
}

fn serialize_style_declarations(decls: &[(String, String)]) -> String {
    let mut out = String::new();
    for (idx, (name, value)) in decls.iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push(';');
    }
    out
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    let mut it = value.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        let Some(ch) = it.next() else {
            return out;
        };
        out.push(ch);
    }
    if it.next().is_some() {
        out.push_str("...");
    }
    out
}

fn parse_html(html: &str) -> Result<Dom> {
    let mut dom = Dom::new();
    let mut stack = vec![dom.root];
    let bytes = html.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        if starts_with_at(bytes, i, b"<!--") {
            if let Some(end) = find_subslice(bytes, i + 4, b"-->") {
                i = end + 3;
            } else {
                return Err(Error::HtmlParse("unclosed HTML comment".into()));
            }
            continue;
        }

        if bytes[i] == b'<' {
            if starts_with_at(bytes, i, b"</") {
                let (tag, next) = parse_end_tag(html, i)?;
                i = next;

                while stack.len() > 1 {
                    let top = *stack
                        .last()
                        .ok_or_else(|| Error::HtmlParse("invalid stack state".into()))?;
                    let top_tag = dom.tag_name(top).unwrap_or("");
                    let matched = top_tag.eq_ignore_ascii_case(&tag);
                    stack.pop();
                    if matched {
                        break;
                    }
                }
                continue;
            }

            if starts_with_at(bytes, i, b"<!") {
                i = parse_declaration_tag(bytes, i)?;
                continue;
            }

            let (tag, attrs, self_closing, next) = parse_start_tag(html, i)?;
            i = next;
            let parent = *stack
                .last()
                .ok_or_else(|| Error::HtmlParse("missing parent element".into()))?;
            let node = dom.create_element(parent, tag.clone(), attrs);

            if is_raw_text_tag(&tag) && !self_closing {
                let close = find_case_insensitive_end_tag(bytes, i, tag.as_bytes())
                    .ok_or_else(|| Error::HtmlParse(format!("unclosed <{tag}>")))?;
                if let Some(body) = html.get(i..close) {
                    if !body.is_empty() {
                        let text = if tag == "script" || tag == "style" {
                            body.to_string()
                        } else {
                            decode_html_character_references(body)
                        };
                        if !text.is_empty() {
                            dom.create_text(node, text);
                        }
                    }
                }
                i = close;
                let (_, after_end) = parse_end_tag(html, i)?;
                i = after_end;
                continue;
            }

            if !self_closing && !is_void_tag(&tag) {
                stack.push(node);
            }
            continue;
        }

        let text_start = i;
        while i < bytes.len() && bytes[i] != b'<' {
            i += 1;
        }

        if let Some(text) = html.get(text_start..i) {
            if !text.is_empty() {
                let parent = *stack
                    .last()
                    .ok_or_else(|| Error::HtmlParse("missing parent element".into()))?;
                let decoded = decode_html_character_references(text);
                if !decoded.is_empty() {
                    dom.create_text(parent, decoded);
                }
            }
        }
    }

    dom.initialize_form_control_values();
    Ok(dom)
}

fn parse_start_tag(
    html: &str,
    at: usize,
) -> Result<(String, HashMap<String, String>, bool, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;
    if bytes.get(i) != Some(&b'<') {
        return Err(Error::HtmlParse("expected '<'".into()));
    }
    i += 1;

    skip_ws(bytes, &mut i);
    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid tag name".into()))?
        .to_ascii_lowercase();

    if tag.is_empty() {
        return Err(Error::HtmlParse("empty tag name".into()));
    }

    let mut attrs = HashMap::new();
    let mut self_closing = false;

    loop {
        skip_ws(bytes, &mut i);
        if i >= bytes.len() {
            return Err(Error::HtmlParse("unclosed start tag".into()));
        }

        if bytes[i] == b'>' {
            i += 1;
            break;
        }

        if bytes[i] == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'>' {
            self_closing = true;
            i += 2;
            break;
        }

        if !is_attr_name_char(bytes[i]) {
            // Browser engines recover from malformed attribute fragments
            // (e.g. href=""/en/"tools/") by skipping junk tokens.
            while i < bytes.len()
                && !bytes[i].is_ascii_whitespace()
                && bytes[i] != b'>'
                && !(bytes[i] == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'>')
            {
                i += 1;
            }
            continue;
        }

        let name_start = i;
        while i < bytes.len() && is_attr_name_char(bytes[i]) {
            i += 1;
        }

        let name = html
            .get(name_start..i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute name".into()))?
            .to_ascii_lowercase();

        if name.is_empty() {
            return Err(Error::HtmlParse("invalid attribute name".into()));
        }

        skip_ws(bytes, &mut i);

        let value = if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            skip_ws(bytes, &mut i);
            parse_attr_value(html, bytes, &mut i)?
        } else {
            "true".to_string()
        };

        attrs.insert(name, value);
    }

    Ok((tag, attrs, self_closing, i))
}

fn parse_end_tag(html: &str, at: usize) -> Result<(String, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;

    if !(bytes.get(i) == Some(&b'<') && bytes.get(i + 1) == Some(&b'/')) {
        return Err(Error::HtmlParse("expected end tag".into()));
    }
    i += 2;
    skip_ws(bytes, &mut i);

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid end tag".into()))?
        .to_ascii_lowercase();

    while i < bytes.len() && bytes[i] != b'>' {
        i += 1;
    }
    if i >= bytes.len() {
        return Err(Error::HtmlParse("unclosed end tag".into()));
    }

    Ok((tag, i + 1))
}

fn parse_declaration_tag(bytes: &[u8], at: usize) -> Result<usize> {
    let mut i = at + 2;
    let mut single_quoted = false;
    let mut double_quoted = false;

    while i < bytes.len() {
        let b = bytes[i];
        if single_quoted {
            if b == b'\'' {
                single_quoted = false;
            }
        } else if double_quoted {
            if b == b'"' {
                double_quoted = false;
            }
        } else if b == b'\'' {
            single_quoted = true;
        } else if b == b'"' {
            double_quoted = true;
        } else if b == b'>' {
            return Ok(i + 1);
        }
        i += 1;
    }

    Err(Error::HtmlParse("unclosed declaration tag".into()))
}

fn parse_attr_value(html: &str, bytes: &[u8], i: &mut usize) -> Result<String> {
    if *i >= bytes.len() {
        return Err(Error::HtmlParse("missing attribute value".into()));
    }

    if bytes[*i] == b'\'' || bytes[*i] == b'"' {
        let quote = bytes[*i];
        *i += 1;
        let start = *i;
        while *i < bytes.len() && bytes[*i] != quote {
            *i += 1;
        }
        if *i >= bytes.len() {
            return Err(Error::HtmlParse("unclosed quoted attribute value".into()));
        }
        let value = html
            .get(start..*i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?
            .to_string();
        *i += 1;
        return Ok(value);
    }

    let start = *i;
    while *i < bytes.len()
        && !bytes[*i].is_ascii_whitespace()
        && bytes[*i] != b'>'
        && !(bytes[*i] == b'/' && *i + 1 < bytes.len() && bytes[*i + 1] == b'>')
    {
        *i += 1;
    }

    let value = html
        .get(start..*i)
        .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?
        .to_string();
    Ok(value)
}

fn skip_ws(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

fn is_tag_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

fn is_attr_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b':'
}

fn is_void_tag(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

fn is_raw_text_tag(tag: &str) -> bool {
    matches!(tag, "script" | "style" | "title" | "textarea")
}

fn starts_with_at(bytes: &[u8], at: usize, needle: &[u8]) -> bool {
    if at + needle.len() > bytes.len() {
        return false;
    }
    &bytes[at..at + needle.len()] == needle
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || from > bytes.len() {
        return None;
    }

    let mut i = from;
    while i + needle.len() <= bytes.len() {
        if &bytes[i..i + needle.len()] == needle {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn find_case_insensitive_end_tag(bytes: &[u8], from: usize, tag: &[u8]) -> Option<usize> {
    let mut needle = Vec::new();
    needle.extend_from_slice(b"</");
    needle.extend(tag.iter().map(|b| b.to_ascii_lowercase()));

    let mut i = from;
    while i + needle.len() <= bytes.len() {
        if bytes[i] == b'<' && bytes.get(i + 1) == Some(&b'/') {
            let mut matched = true;
            for j in 0..needle.len() {
                if bytes[i + j].to_ascii_lowercase() != needle[j] {
                    matched = false;
                    break;
                }
            }
            if matched {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

fn decode_html_character_references(src: &str) -> String {
    if !src.contains('&') {
        return src.to_string();
    }

    let chars = src.chars().collect::<Vec<_>>();
    let mut out = String::new();
    let mut i = 0usize;
    while i < chars.len() {
        if chars[i] != '&' {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let mut j = i + 1;
        while j < chars.len()
            && j - i <= 10
            && chars[j] != ';'
            && chars[j] != '&'
            && !chars[j].is_whitespace()
        {
            j += 1;
        }

        if j < chars.len() && chars[j] == ';' {
            let token = chars[i + 1..j].iter().collect::<String>();
            if let Some(decoded) = decode_character_reference(&token) {
                out.push(decoded);
                i = j + 1;
                continue;
            }
        }

        out.push('&');
        i += 1;
    }
    out
}

fn decode_character_reference(token: &str) -> Option<char> {
    if let Some(numeric) = token.strip_prefix('#') {
        let codepoint = if let Some(hex) = numeric
            .strip_prefix('x')
            .or_else(|| numeric.strip_prefix('X'))
        {
            u32::from_str_radix(hex, 16).ok()?
        } else {
            numeric.parse::<u32>().ok()?
        };
        return char::from_u32(codepoint);
    }

    match token {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{00A0}'),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    hour: u8,
    minute: u8,
}

impl LocalTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(Error::InvalidTime { hour, minute });
        }
        Ok(Self {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    pub fn now() -> Self {
        let now = Local::now();
        Self {
            hour: now.hour() as u8,
            minute: now.minute() as u8,
        }
    }

    pub fn hour(&self) -> u32 {
        u32::from(self.hour)
    }

    pub fn minute(&self) -> u32 {
        u32::from(self.minute)
    }

    pub fn hhmm(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }

    fn advanced_by(self, minutes: u32) -> Self {
        let total = (self.hour() * 60 + self.minute() + minutes % 1440) % 1440;
        Self {
            hour: (total / 60) as u8,
            minute: (total % 60) as u8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequiredField {
    pub field: String,
    pub message: String,
}

impl RequiredField {
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageBindings {
    pub spoiler_id: String,
    pub show_id: String,
    pub time_field_id: String,
    pub form_name: String,
    pub required: Vec<RequiredField>,
}

impl Default for PageBindings {
    fn default() -> Self {
        Self {
            spoiler_id: "spoiler_id".to_string(),
            show_id: "show_id".to_string(),
            time_field_id: "ntime".to_string(),
            form_name: "add_obs".to_string(),
            required: vec![
                RequiredField::new("obs_date", "Date field must be filled out"),
                RequiredField::new("obs_desc", "Decsription must be filled out"),
                RequiredField::new("content", "Add some files!"),
            ],
        }
    }
}

pub trait PageSurface {
    fn element_exists(&self, id: &str) -> bool;
    fn set_visible(&mut self, id: &str, visible: bool) -> Result<()>;
    fn value_by_id(&self, id: &str) -> Result<String>;
    fn set_value_by_id(&mut self, id: &str, value: &str) -> Result<()>;
    fn field_value(&self, form: &str, field: &str) -> Result<String>;
    fn show_alert(&mut self, message: &str);
    fn write_output(&mut self, text: &str);
}

pub mod ops {
    use super::{LocalTime, PageBindings, PageSurface, Result};

    pub fn reveal_spoiler<S: PageSurface + ?Sized>(
        surface: &mut S,
        bindings: &PageBindings,
    ) -> Result<()> {
        surface.set_visible(&bindings.spoiler_id, true)?;
        surface.set_visible(&bindings.show_id, false)
    }

    pub fn conceal_spoiler<S: PageSurface + ?Sized>(
        surface: &mut S,
        bindings: &PageBindings,
    ) -> Result<()> {
        surface.set_visible(&bindings.spoiler_id, false)?;
        surface.set_visible(&bindings.show_id, true)
    }

    pub fn fill_time_field<S: PageSurface + ?Sized>(
        surface: &mut S,
        bindings: &PageBindings,
        time: LocalTime,
    ) -> Result<()> {
        surface.set_value_by_id(&bindings.time_field_id, &time.hhmm())
    }

    pub fn basename(path: &str) -> &str {
        match path.rfind('/') {
            Some(pos) => &path[pos + 1..],
            None => path,
        }
    }

    pub fn write_basename<'a, S: PageSurface + ?Sized>(surface: &mut S, path: &'a str) -> &'a str {
        let name = basename(path);
        surface.write_output(name);
        name
    }

    pub fn validate_required<S: PageSurface + ?Sized>(
        surface: &mut S,
        bindings: &PageBindings,
    ) -> Result<bool> {
        for required in &bindings.required {
            let value = surface.field_value(&bindings.form_name, &required.field)?;
            if value.is_empty() {
                surface.show_alert(&required.message);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[derive(Debug)]
pub struct Page {
    dom: Dom,
    clock: LocalTime,
    alerts: Vec<String>,
    output: String,
    trace: bool,
    trace_logs: Vec<String>,
    trace_log_limit: usize,
    trace_to_stderr: bool,
}

impl Page {
    pub fn from_html(html: &str) -> Result<Self> {
        let dom = parse_html(html)?;
        Ok(Self {
            dom,
            clock: LocalTime { hour: 0, minute: 0 },
            alerts: Vec::new(),
            output: String::new(),
            trace: false,
            trace_logs: Vec::new(),
            trace_log_limit: 10_000,
            trace_to_stderr: true,
        })
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace_logs)
    }

    pub fn set_trace_stderr(&mut self, enabled: bool) {
        self.trace_to_stderr = enabled;
    }

    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::InvalidLimit(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.trace_log_limit = max_entries;
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
        Ok(())
    }

    pub fn clock(&self) -> LocalTime {
        self.clock
    }

    pub fn set_clock(&mut self, hour: u32, minute: u32) -> Result<()> {
        self.clock = LocalTime::new(hour, minute)?;
        self.trace_line(format!("[clock] set {}", self.clock.hhmm()));
        Ok(())
    }

    pub fn advance_clock(&mut self, minutes: u32) {
        self.clock = self.clock.advanced_by(minutes);
        self.trace_line(format!("[clock] advance +{minutes} -> {}", self.clock.hhmm()));
    }

    pub fn sync_clock_to_wall(&mut self) {
        self.clock = LocalTime::now();
        self.trace_line(format!("[clock] sync {}", self.clock.hhmm()));
    }

    pub fn fill_time_field(&mut self, bindings: &PageBindings) -> Result<()> {
        let time = self.clock;
        ops::fill_time_field(self, bindings, time)
    }

    pub fn validate(&mut self, bindings: &PageBindings) -> Result<bool> {
        let accepted = ops::validate_required(self, bindings)?;
        self.trace_line(format!(
            "[form] name={} accepted={accepted}",
            bindings.form_name
        ));
        Ok(accepted)
    }

    pub fn value(&self, id: &str) -> Result<String> {
        let node = self.node(id)?;
        Ok(self.dom.value(node))
    }

    pub fn set_value(&mut self, id: &str, value: &str) -> Result<()> {
        let node = self.node(id)?;
        self.require_writable_control(id, node)?;
        self.dom.set_value(node, value);
        self.trace_line(format!("[value] id={id} value={}", truncate_chars(value, 80)));
        Ok(())
    }

    pub fn field_value(&self, form: &str, field: &str) -> Result<String> {
        let node = self.field_node(form, field)?;
        Ok(self.dom.value(node))
    }

    pub fn set_field_value(&mut self, form: &str, field: &str, value: &str) -> Result<()> {
        let node = self.field_node(form, field)?;
        self.dom.set_value(node, value);
        self.trace_line(format!(
            "[value] form={form} field={field} value={}",
            truncate_chars(value, 80)
        ));
        Ok(())
    }

    pub fn display(&self, id: &str) -> Result<String> {
        let node = self.node(id)?;
        Ok(self.dom.style_get(node, "display"))
    }

    pub fn visible(&self, id: &str) -> Result<bool> {
        Ok(self.display(id)? != "none")
    }

    pub fn alerts(&self) -> &[String] {
        &self.alerts
    }

    pub fn take_alerts(&mut self) -> Vec<String> {
        std::mem::take(&mut self.alerts)
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    pub fn assert_value(&self, id: &str, expected: &str) -> Result<()> {
        let actual = self.value(id)?;
        if actual != expected {
            return Err(self.assertion_failed(id, expected, &actual));
        }
        Ok(())
    }

    pub fn assert_field_value(&self, form: &str, field: &str, expected: &str) -> Result<()> {
        let actual = self.field_value(form, field)?;
        if actual != expected {
            return Err(self.assertion_failed(&format!("{form}.{field}"), expected, &actual));
        }
        Ok(())
    }

    pub fn assert_text(&self, id: &str, expected: &str) -> Result<()> {
        let node = self.node(id)?;
        let actual = self.dom.text_content(node);
        if actual != expected {
            return Err(self.assertion_failed(id, expected, &actual));
        }
        Ok(())
    }

    pub fn assert_visible(&self, id: &str, expected: bool) -> Result<()> {
        let actual = self.visible(id)?;
        if actual != expected {
            return Err(self.assertion_failed(id, &expected.to_string(), &actual.to_string()));
        }
        Ok(())
    }

    pub fn assert_exists(&self, id: &str) -> Result<()> {
        let _ = self.node(id)?;
        Ok(())
    }

    pub fn assert_output(&self, expected: &str) -> Result<()> {
        if self.output != expected {
            return Err(self.assertion_failed("output", expected, &self.output));
        }
        Ok(())
    }

    pub fn assert_alerts(&self, expected: &[&str]) -> Result<()> {
        if self.alerts != expected {
            return Err(self.assertion_failed(
                "alerts",
                &expected.join(" | "),
                &self.alerts.join(" | "),
            ));
        }
        Ok(())
    }

    pub fn dump_dom(&self, id: &str) -> Result<String> {
        let node = self.node(id)?;
        Ok(self.dom.dump_node(node))
    }

    fn node(&self, id: &str) -> Result<NodeId> {
        self.dom
            .by_id(id)
            .ok_or_else(|| Error::ElementNotFound(id.to_string()))
    }

    fn field_node(&self, form: &str, field: &str) -> Result<NodeId> {
        let form_node = self
            .dom
            .form_by_name(form)
            .ok_or_else(|| Error::FormNotFound(form.to_string()))?;
        self.dom
            .form_field(form_node, field)
            .ok_or_else(|| Error::FieldNotFound {
                form: form.to_string(),
                field: field.to_string(),
            })
    }

    fn require_writable_control(&self, id: &str, node: NodeId) -> Result<()> {
        let tag = self
            .dom
            .tag_name(node)
            .unwrap_or_default()
            .to_ascii_lowercase();
        if tag != "input" && tag != "textarea" {
            return Err(Error::TypeMismatch {
                target: id.to_string(),
                expected: "input or textarea".into(),
                actual: tag,
            });
        }
        Ok(())
    }

    fn assertion_failed(&self, target: &str, expected: &str, actual: &str) -> Error {
        Error::AssertionFailed {
            target: target.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
            dom_snippet: self.snippet(target),
        }
    }

    fn snippet(&self, target: &str) -> String {
        let node = self.dom.by_id(target).unwrap_or(self.dom.root);
        truncate_chars(&self.dom.dump_node(node), 200)
    }

    fn trace_line(&mut self, line: String) {
        if self.trace {
            if self.trace_to_stderr {
                eprintln!("{line}");
            }
            if self.trace_logs.len() >= self.trace_log_limit {
                self.trace_logs.remove(0);
            }
            self.trace_logs.push(line);
        }
    }
}

impl PageSurface for Page {
    fn element_exists(&self, id: &str) -> bool {
        self.dom.by_id(id).is_some()
    }

    fn set_visible(&mut self, id: &str, visible: bool) -> Result<()> {
        let node = self.node(id)?;
        self.dom
            .style_set(node, "display", if visible { "" } else { "none" });
        self.trace_line(format!("[toggle] id={id} visible={visible}"));
        Ok(())
    }

    fn value_by_id(&self, id: &str) -> Result<String> {
        self.value(id)
    }

    fn set_value_by_id(&mut self, id: &str, value: &str) -> Result<()> {
        self.set_value(id, value)
    }

    fn field_value(&self, form: &str, field: &str) -> Result<String> {
        Page::field_value(self, form, field)
    }

    fn show_alert(&mut self, message: &str) {
        self.trace_line(format!("[alert] {message}"));
        self.alerts.push(message.to_string());
    }

    fn write_output(&mut self, text: &str) {
        self.trace_line(format!("[write] {}", truncate_chars(text, 80)));
        self.output.push_str(text);
    }
}

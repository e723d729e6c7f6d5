/// Text modules: hashing, encodings, replacement, JSON extraction, variables
/// and templates

use super::{ModuleContext, ModuleHandler, ModuleOutput};
use crate::error::ModuleError;
use crate::runtime::logger::{truncate, MAX_DETAIL_CHARS};
use crate::runtime::variables::{is_reserved, stringify};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{json, Value};

/// Characters left intact by URL encoding besides ASCII alphanumerics
const URL_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

pub fn base64_encode(input: &str) -> String {
    STANDARD.encode(input.as_bytes())
}

/// Standard alphabet with padding; whitespace is ignored
pub fn base64_decode(input: &str) -> Result<String, ModuleError> {
    let compact: String = input.split_whitespace().collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ModuleError::Decode(format!("invalid base64: {e}")))?;
    String::from_utf8(bytes).map_err(|_| ModuleError::Decode("decoded bytes are not UTF-8".into()))
}

pub fn url_encode(input: &str) -> String {
    utf8_percent_encode(input, URL_SAFE).to_string()
}

/// Strict percent-decoding: every `%` must start a two-digit hex escape
pub fn url_decode(input: &str) -> Result<String, ModuleError> {
    let bytes = input.as_bytes();
    for (i, byte) in bytes.iter().enumerate() {
        if *byte == b'%' {
            let escape = bytes.get(i + 1..i + 3);
            if !escape.is_some_and(|pair| pair.iter().all(u8::is_ascii_hexdigit)) {
                return Err(ModuleError::Decode(format!(
                    "malformed percent escape at byte {i}"
                )));
            }
        }
    }
    percent_decode_str(input)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| ModuleError::Decode("decoded bytes are not UTF-8".into()))
}

#[derive(Debug, Clone, PartialEq)]
enum PathStep {
    Key(String),
    Index(usize),
}

/// Parse `a.b[0].c` style paths; indices may repeat (`grid[1][2]`)
fn parse_path(path: &str) -> Result<Vec<PathStep>, ModuleError> {
    let mut steps = Vec::new();
    for segment in path.split('.').map(str::trim).filter(|s| !s.is_empty()) {
        let (key, mut rest) = match segment.find('[') {
            Some(open) => (&segment[..open], &segment[open..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            steps.push(PathStep::Key(key.to_string()));
        }
        while let Some(inner) = rest.strip_prefix('[') {
            let close = inner
                .find(']')
                .ok_or_else(|| ModuleError::Parse(format!("unclosed index in '{segment}'")))?;
            let index = inner[..close]
                .trim()
                .parse()
                .map_err(|_| ModuleError::Parse(format!("invalid index in '{segment}'")))?;
            steps.push(PathStep::Index(index));
            rest = &inner[close + 1..];
        }
        if !rest.is_empty() {
            return Err(ModuleError::Parse(format!("unexpected '{rest}' in '{segment}'")));
        }
    }
    Ok(steps)
}

/// Follow `path` into `value`; `None` when any step is missing
pub fn extract_path<'v>(value: &'v Value, path: &str) -> Result<Option<&'v Value>, ModuleError> {
    let mut current = value;
    for step in parse_path(path)? {
        let next = match step {
            PathStep::Key(key) => current.as_object().and_then(|object| object.get(&key)),
            PathStep::Index(index) => current.as_array().and_then(|array| array.get(index)),
        };
        match next {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

pub struct Md5Hash;

#[async_trait]
impl ModuleHandler for Md5Hash {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let digest = md5_hex(&ctx.resolve("input"));
        ctx.store_output(digest.as_str());
        Ok(ModuleOutput::new(digest))
    }
}

pub struct Base64Encode;

#[async_trait]
impl ModuleHandler for Base64Encode {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let encoded = base64_encode(&ctx.resolve("input"));
        ctx.store_output(encoded.as_str());
        Ok(ModuleOutput::new(encoded))
    }
}

pub struct Base64Decode;

#[async_trait]
impl ModuleHandler for Base64Decode {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let decoded = base64_decode(&ctx.resolve("input"))?;
        ctx.store_output(decoded.as_str());
        Ok(ModuleOutput::new(decoded))
    }
}

pub struct TextReplace;

#[async_trait]
impl ModuleHandler for TextReplace {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let input = ctx.resolve("input");
        let search = ctx.resolve("search");
        let replaced = if search.is_empty() {
            input
        } else {
            input.replace(&search, &ctx.resolve("replace"))
        };
        ctx.store_output(replaced.as_str());
        Ok(ModuleOutput::new(replaced))
    }
}

pub struct UrlEncode;

#[async_trait]
impl ModuleHandler for UrlEncode {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let encoded = url_encode(&ctx.resolve("input"));
        ctx.store_output(encoded.as_str());
        Ok(ModuleOutput::new(encoded))
    }
}

pub struct UrlDecode;

#[async_trait]
impl ModuleHandler for UrlDecode {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let decoded = url_decode(&ctx.resolve("input"))?;
        ctx.store_output(decoded.as_str());
        Ok(ModuleOutput::new(decoded))
    }
}

pub struct JsonParse;

#[async_trait]
impl ModuleHandler for JsonParse {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let input = ctx.resolve("input");
        let path = ctx.resolve("path");
        let document: Value = serde_json::from_str(&input).map_err(|e| {
            ModuleError::Parse(format!("invalid JSON ({e}): {}", truncate(&input, 100)))
        })?;

        let Some(found) = extract_path(&document, &path)? else {
            ctx.log
                .warning(
                    format!("JSON path '{path}' not found"),
                    Some(json!({ "input": truncate(&input, MAX_DETAIL_CHARS) })),
                )
                .await;
            return Ok(ModuleOutput::new(Value::Null));
        };

        let text = stringify(found);
        ctx.store_output(text.as_str());
        Ok(ModuleOutput::new(text))
    }
}

pub struct SetVariable;

#[async_trait]
impl ModuleHandler for SetVariable {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let name = ctx.resolve("name");
        let name = name.trim();
        if name.is_empty() {
            return Ok(ModuleOutput::new(Value::Null));
        }
        if is_reserved(name) {
            return Err(ModuleError::Validation(format!(
                "variable names starting with '_' are reserved: {name}"
            )));
        }
        let value = ctx.resolve("value");
        ctx.variables.set(name, value.as_str());
        ctx.log
            .debug(format!("set variable '{name}'"), None)
            .await;
        Ok(ModuleOutput::new(value))
    }
}

pub struct TextTemplate;

#[async_trait]
impl ModuleHandler for TextTemplate {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let rendered = ctx.resolve("template");
        ctx.store_output(rendered.as_str());
        Ok(ModuleOutput::new(rendered))
    }
}

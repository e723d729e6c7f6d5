/// Data modules: random values, timestamps, arithmetic and number formatting

use super::{option_key, ModuleContext, ModuleHandler, ModuleOutput};
use crate::error::ModuleError;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use rand::Rng;
use serde_json::json;
use std::fmt::Write as _;

pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DIGITS: &str = "0123456789";
const LETTERS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const SYMBOLS: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Character pool for random strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Digits,
    Letters,
    Alphanumeric,
    Symbols,
}

impl Charset {
    fn parse(value: &str) -> Result<Self, ModuleError> {
        match option_key(value).as_str() {
            "digits" | "numbers" | "数字" => Ok(Charset::Digits),
            "letters" | "字母" => Ok(Charset::Letters),
            "" | "alphanumeric" | "digits_letters" | "digits+letters" | "数字+字母" => Ok(Charset::Alphanumeric),
            "symbols" | "digits_letters_symbols" | "digits+letters+symbols" | "数字+字母+符号" => Ok(Charset::Symbols),
            other => Err(ModuleError::Validation(format!("unknown character set '{other}'"))),
        }
    }

    fn pool(self) -> Vec<char> {
        let sets: &[&str] = match self {
            Charset::Digits => &[DIGITS],
            Charset::Letters => &[LETTERS],
            Charset::Alphanumeric => &[DIGITS, LETTERS],
            Charset::Symbols => &[DIGITS, LETTERS, SYMBOLS],
        };
        sets.iter().flat_map(|set| set.chars()).collect()
    }
}

pub fn random_integer(min: i64, max: i64) -> Result<i64, ModuleError> {
    if min > max {
        return Err(ModuleError::Validation(format!(
            "min ({min}) must not exceed max ({max})"
        )));
    }
    Ok(rand::thread_rng().gen_range(min..=max))
}

pub fn random_string(length: usize, charset: Charset) -> String {
    let pool = charset.pool();
    let mut rng = rand::thread_rng();
    (0..length).map(|_| pool[rng.gen_range(0..pool.len())]).collect()
}

pub struct RandomNumber;

#[async_trait]
impl ModuleHandler for RandomNumber {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let value = match option_key(&ctx.raw_text("type")).as_str() {
            "" | "integer" | "int" | "整数" => {
                let min = ctx.integer("min", 1)?;
                let max = ctx.integer("max", 100)?;
                random_integer(min, max)?.to_string()
            }
            "string" | "text" | "字符串" => {
                let length = ctx.integer("length", 8)?;
                let length = usize::try_from(length)
                    .map_err(|_| ModuleError::Validation(format!("length must not be negative, got {length}")))?;
                random_string(length, Charset::parse(&ctx.raw_text("chars"))?)
            }
            other => return Err(ModuleError::Validation(format!("unknown random type '{other}'"))),
        };

        ctx.store_output(value.as_str());
        Ok(ModuleOutput::new(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeOutput {
    Seconds,
    Milliseconds,
    Formatted,
}

impl TimeOutput {
    fn parse(value: &str) -> Result<Self, ModuleError> {
        match option_key(value).as_str() {
            "" | "seconds" | "timestamp_seconds" | "unix" | "时间戳(秒)" => Ok(TimeOutput::Seconds),
            "milliseconds" | "millis" | "timestamp_milliseconds" | "时间戳(毫秒)" => Ok(TimeOutput::Milliseconds),
            "formatted" | "format" | "formatted_time" | "格式化时间" => Ok(TimeOutput::Formatted),
            other => Err(ModuleError::Validation(format!("unknown timestamp format '{other}'"))),
        }
    }
}

/// strftime-style formatting that reports bad patterns instead of panicking
pub fn format_time(time: &DateTime<Local>, pattern: &str) -> Result<String, ModuleError> {
    let mut text = String::new();
    write!(text, "{}", time.format(pattern))
        .map_err(|_| ModuleError::Parse(format!("invalid datetime format '{pattern}'")))?;
    Ok(text)
}

/// Parse local time; date-only patterns resolve to midnight
pub fn parse_local_time(input: &str, pattern: &str) -> Result<DateTime<Local>, ModuleError> {
    let input = input.trim();
    let naive = NaiveDateTime::parse_from_str(input, pattern)
        .or_else(|err| {
            NaiveDate::parse_from_str(input, pattern)
                .map(|date| date.and_time(chrono::NaiveTime::MIN))
                .map_err(|_| err)
        })
        .map_err(|e| ModuleError::Parse(format!("cannot parse '{input}' with '{pattern}': {e}")))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| ModuleError::Parse(format!("'{input}' does not exist in the local time zone")))
}

pub struct Timestamp;

#[async_trait]
impl ModuleHandler for Timestamp {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let output = TimeOutput::parse(&ctx.raw_text("format"))?;
        let time = match option_key(&ctx.raw_text("action")).as_str() {
            "" | "now" | "current" | "current_time" | "获取当前时间" => Local::now(),
            "parse" | "convert" | "转换时间字符串" => parse_local_time(
                &ctx.resolve("input_time"),
                &ctx.resolve_or("input_format", DEFAULT_DATETIME_FORMAT),
            )?,
            other => return Err(ModuleError::Validation(format!("unknown timestamp action '{other}'"))),
        };

        let value = match output {
            TimeOutput::Seconds => time.timestamp().to_string(),
            TimeOutput::Milliseconds => time.timestamp_millis().to_string(),
            TimeOutput::Formatted => {
                format_time(&time, &ctx.resolve_or("datetime_format", DEFAULT_DATETIME_FORMAT))?
            }
        };

        ctx.store_output(value.as_str());
        Ok(ModuleOutput::new(value))
    }
}

/// Integral values print without a fraction
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn parse_operand(ctx: &ModuleContext<'_>, key: &str) -> Result<f64, ModuleError> {
    let text = ctx.resolve(key);
    text.trim()
        .parse()
        .map_err(|_| ModuleError::Parse(format!("{key} is not a number: '{text}'")))
}

pub fn calculate(a: f64, operator: &str, b: f64) -> Result<f64, ModuleError> {
    match operator.trim() {
        "" | "+" => Ok(a + b),
        "-" => Ok(a - b),
        "*" | "x" | "×" => Ok(a * b),
        "/" | "÷" => {
            if b == 0.0 {
                Err(ModuleError::Arithmetic("division by zero".into()))
            } else {
                Ok(a / b)
            }
        }
        other => Err(ModuleError::Validation(format!("unknown operator '{other}'"))),
    }
}

pub struct Calculate;

#[async_trait]
impl ModuleHandler for Calculate {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let a = parse_operand(ctx, "input1")?;
        let b = parse_operand(ctx, "input2")?;
        let operator = ctx.raw_text("operator");
        let result = format_number(calculate(a, &operator, b)?);

        ctx.log
            .debug(
                format!("🧮 {a} {} {b} = {result}", operator.trim()),
                Some(json!({ "module": ctx.module.display_name() })),
            )
            .await;
        ctx.store_output(result.as_str());
        Ok(ModuleOutput::new(result))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Fixed,
    Ceil,
    Round,
    Floor,
}

impl Rounding {
    fn parse(value: &str) -> Result<Self, ModuleError> {
        match option_key(value).as_str() {
            "" | "fixed" | "decimal_places" | "keep_decimals" | "保留小数位数" => Ok(Rounding::Fixed),
            "ceil" | "round_up" | "进一法取整" => Ok(Rounding::Ceil),
            "round" | "四舍五入取整" => Ok(Rounding::Round),
            "floor" | "truncate" | "round_down" | "舍弃小数取整" => Ok(Rounding::Floor),
            other => Err(ModuleError::Validation(format!("unknown format type '{other}'"))),
        }
    }

    pub fn apply(self, value: f64, decimal_places: usize) -> String {
        match self {
            Rounding::Fixed => format!("{value:.decimal_places$}"),
            Rounding::Ceil => format_number(value.ceil()),
            Rounding::Round => format_number(value.round()),
            Rounding::Floor => format_number(value.floor()),
        }
    }
}

pub struct NumberFormat;

#[async_trait]
impl ModuleHandler for NumberFormat {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let value = parse_operand(ctx, "input")?;
        let rounding = Rounding::parse(&ctx.raw_text("format_type"))?;
        let places = ctx.integer("decimal_places", 2)?.clamp(0, 20) as usize;

        let formatted = rounding.apply(value, places);
        ctx.store_output(formatted.as_str());
        Ok(ModuleOutput::new(formatted))
    }
}

/// Network modules: HTTP requests, TCP reachability probes and proxy settings

use super::{option_key, ModuleContext, ModuleHandler, ModuleOutput};
use crate::error::ModuleError;
use crate::runtime::logger::{truncate, MAX_DETAIL_CHARS};
use crate::runtime::variables::{keys, stringify};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

pub struct HttpRequest;

impl HttpRequest {
    /// Header map from JSON object text; anything else yields no headers
    fn parse_headers(text: &str) -> Option<Map<String, Value>> {
        if text.trim().is_empty() {
            return Some(Map::new());
        }
        match serde_json::from_str(text) {
            Ok(Value::Object(headers)) => Some(headers),
            _ => None,
        }
    }
}

#[async_trait]
impl ModuleHandler for HttpRequest {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let url = ctx.resolve("url");
        let method = ctx.resolve_or("method", "GET").trim().to_uppercase();
        let body = ctx.resolve("body");
        let timeout = ctx.seconds("timeout", 30.0)?;
        let use_http2 = ctx.flag("use_http2", false);
        let check_status = ctx.flag("check_status", false);
        let status_var = ctx.target_var("status_code_var");
        let proxy = ctx.variables.resolve_proxy();

        let headers = match Self::parse_headers(&ctx.resolve("headers")) {
            Some(headers) => headers,
            None => {
                ctx.log
                    .warning("request headers are not a JSON object, sending none", None)
                    .await;
                Map::new()
            }
        };

        ctx.log
            .debug(
                format!("HTTP {method} {url}"),
                Some(json!({
                    "url": url,
                    "method": method,
                    "headers": headers,
                    "body": truncate(&body, MAX_DETAIL_CHARS),
                    "proxy": proxy,
                    "use_http2": use_http2,
                    "check_status": check_status,
                    "timeout": timeout.as_secs_f64(),
                })),
            )
            .await;

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| ModuleError::Validation(format!("invalid HTTP method '{method}'")))?;

        let mut builder = reqwest::Client::builder().timeout(timeout);
        if !use_http2 {
            builder = builder.http1_only();
        }
        builder = match &proxy {
            Some(proxy) => builder.proxy(
                reqwest::Proxy::all(proxy.as_str())
                    .map_err(|e| ModuleError::Network(format!("invalid proxy '{proxy}': {e}")))?,
            ),
            None => builder.no_proxy(),
        };
        let client = builder
            .build()
            .map_err(|e| ModuleError::Network(format!("failed to build HTTP client: {e}")))?;

        let sends_body = method != reqwest::Method::GET && method != reqwest::Method::DELETE;
        let mut request = client.request(method, &url);
        for (name, value) in &headers {
            request = request.header(name.as_str(), stringify(value));
        }
        if sends_body {
            request = request.body(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                if let Some(var) = &status_var {
                    ctx.variables.set(var.as_str(), 0);
                }
                return Err(ModuleError::Network(e.to_string()));
            }
        };

        let status = response.status().as_u16();
        if let Some(var) = &status_var {
            ctx.variables.set(var.as_str(), status);
        }
        if check_status && !response.status().is_success() {
            return Err(ModuleError::Status(status));
        }

        let response_headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
                )
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| ModuleError::Network(format!("failed to read response body: {e}")))?;

        ctx.log
            .debug(
                format!("HTTP response {status}"),
                Some(json!({
                    "status_code": status,
                    "headers": response_headers,
                    "response_text": truncate(&text, MAX_DETAIL_CHARS),
                })),
            )
            .await;

        ctx.store_output(text.as_str());
        Ok(ModuleOutput::new(text).with_status(status))
    }
}

/// Domain list entry: `host` or `host:port`, scheme and path stripped
fn parse_domains(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let line = line
                .strip_prefix("https://")
                .or_else(|| line.strip_prefix("http://"))
                .unwrap_or(line);
            line.split('/').next().unwrap_or(line).to_string()
        })
        .filter(|domain| !domain.is_empty())
        .collect()
}

/// Split an explicit `:port` suffix off a domain entry
///
/// IPv6 literals need brackets to carry a port (`[::1]:443`); bare IPv6
/// addresses use the default port.
fn split_host_port(domain: &str, default_port: u16) -> (&str, u16) {
    if let Some(bracketed) = domain.strip_prefix('[') {
        return match bracketed.split_once(']') {
            Some((host, "")) => (host, default_port),
            Some((host, rest)) => match rest.strip_prefix(':').map(str::parse::<u16>) {
                Some(Ok(port)) => (host, port),
                _ => (host, default_port),
            },
            None => (domain, default_port),
        };
    }
    match domain.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, port),
            Err(_) => (domain, default_port),
        },
        _ => (domain, default_port),
    }
}

/// Outcome of one TCP connect attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub available: bool,
    pub message: String,
    /// Elapsed milliseconds, rounded to two decimals
    pub response_time: f64,
}

pub async fn probe(host: &str, port: u16, timeout: Duration) -> ProbeResult {
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, TcpStream::connect((host, port))).await;
    let response_time = (started.elapsed().as_secs_f64() * 100_000.0).round() / 100.0;

    let (available, message) = match outcome {
        Ok(Ok(_)) => (true, "connected".to_string()),
        Ok(Err(e)) => (false, format!("connection failed: {e}")),
        Err(_) => (false, format!("timed out after {}s", timeout.as_secs_f64())),
    };

    ProbeResult {
        available,
        message,
        response_time,
    }
}

pub struct CheckDomains;

#[async_trait]
impl ModuleHandler for CheckDomains {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let domains = parse_domains(&ctx.resolve("domains"));
        let port = u16::try_from(ctx.integer("port", 80)?)
            .map_err(|_| ModuleError::Validation("port must be between 0 and 65535".into()))?;
        let timeout = ctx.seconds("timeout", 5.0)?;
        let all_results_var = ctx.target_var("all_results_var");

        if domains.is_empty() {
            return Err(ModuleError::Validation("no domains to check".into()));
        }

        ctx.log
            .debug(
                format!("checking {} domains", domains.len()),
                Some(json!({ "domains": domains, "port": port, "timeout": timeout.as_secs_f64() })),
            )
            .await;

        let mut results = Map::new();
        let mut available_domain: Option<String> = None;

        for domain in &domains {
            let (host, port) = split_host_port(domain, port);
            let probe = probe(host, port, timeout).await;

            if probe.available {
                ctx.log
                    .info(
                        format!("domain {domain} reachable ({}ms)", probe.response_time),
                        None,
                    )
                    .await;
                available_domain.get_or_insert_with(|| domain.clone());
            } else {
                ctx.log
                    .warning(format!("domain {domain} unreachable: {}", probe.message), None)
                    .await;
            }

            results.insert(
                domain.clone(),
                json!({
                    "available": probe.available,
                    "message": probe.message,
                    "response_time": probe.response_time,
                }),
            );

            if available_domain.is_some() && all_results_var.is_none() {
                break;
            }
        }

        if let Some(var) = all_results_var {
            let report = serde_json::to_string(&results)
                .map_err(|e| ModuleError::Parse(format!("failed to encode domain results: {e}")))?;
            ctx.variables.set(var, report);
        }

        match available_domain {
            Some(domain) => {
                ctx.store_output(domain.as_str());
                Ok(ModuleOutput::new(domain))
            }
            None => {
                ctx.store_output("");
                Err(ModuleError::NoDomainAvailable)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProxyScope {
    Global,
    Branch,
}

impl ProxyScope {
    fn parse(value: &str) -> Self {
        match option_key(value).as_str() {
            "branch" | "branch_only" | "current_branch" | "仅当前分支" => ProxyScope::Branch,
            _ => ProxyScope::Global,
        }
    }
}

pub struct SystemProxy;

#[async_trait]
impl ModuleHandler for SystemProxy {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let proxy_url = ctx.resolve("proxy_url");
        let scope = ProxyScope::parse(&ctx.resolve("scope"));
        let reset = ctx.flag("reset", false);

        let key = match scope {
            ProxyScope::Global => keys::GLOBAL_PROXY.to_string(),
            ProxyScope::Branch => keys::branch_proxy(ctx.variables.current_branch()),
        };

        let message = if reset {
            ctx.variables.set(key, Value::Null);
            "proxy reset".to_string()
        } else {
            ctx.variables.set(key, proxy_url.as_str());
            format!("proxy set: {proxy_url}")
        };

        ctx.log.info(message.as_str(), None).await;
        Ok(ModuleOutput::new(message))
    }
}

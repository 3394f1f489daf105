//! Post-run security audit reconstructed from captured output.
//!
//! The audit is heuristic. It scans the combined stdout and stderr of a run
//! for error signatures that typically appear when the sandbox blocks an
//! operation (DNS failures with networking disabled, `EROFS` on a read-only
//! root, `EACCES` on a spawn). It is not a syscall trace:
//!
//! - a blocked operation whose error the service swallows leaves no event;
//! - a service that merely prints a matching string produces an event;
//! - a single failure can match several patterns and yield several events.
//!
//! Treat the result as advisory, never as a complete enforcement record.

use std::fmt;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{IgniteError, Result};
use crate::security::policy::SecurityPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Network,
    Filesystem,
    Process,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Read,
    Write,
    Connect,
    Spawn,
    Blocked,
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventAction::Read => "read",
            EventAction::Write => "write",
            EventAction::Connect => "connect",
            EventAction::Spawn => "spawn",
            EventAction::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// How the event target is pulled out of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetExtractor {
    /// `host x`, `address x`, `to x`, else the host of a URL
    Host,
    /// First capture group, else the first absolute path
    Path,
    /// `spawn <cmd>`
    Command,
}

impl TargetExtractor {
    fn extract(&self, captures: &regex::Captures<'_>) -> String {
        let text = &captures[0];
        match self {
            TargetExtractor::Host => extract_host(text).unwrap_or_else(|| "unknown host".to_string()),
            TargetExtractor::Path => captures
                .get(1)
                .map(|m| m.as_str().to_string())
                .filter(|s| !s.is_empty())
                .or_else(|| extract_path(text))
                .unwrap_or_else(|| "unknown path".to_string()),
            TargetExtractor::Command => {
                extract_command(text).unwrap_or_else(|| "unknown command".to_string())
            }
        }
    }
}

/// One row of the audit pattern table.
#[derive(Debug, Clone)]
pub struct AuditPattern {
    regex: Regex,
    kind: EventKind,
    action: EventAction,
    target: TargetExtractor,
}

impl AuditPattern {
    pub fn new(
        pattern: &str,
        kind: EventKind,
        action: EventAction,
        target: TargetExtractor,
    ) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| IgniteError::Config(format!("Invalid audit pattern '{}': {}", pattern, e)))?;
        Ok(Self {
            regex,
            kind,
            action,
            target,
        })
    }

    fn builtin(pattern: &str, kind: EventKind, action: EventAction, target: TargetExtractor) -> Self {
        Self {
            regex: Regex::new(pattern).expect("valid builtin audit pattern"),
            kind,
            action,
            target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub action: EventAction,
    pub target: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub allowed: bool,
    /// Raw matched text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Clean,
    Violations,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySummary {
    pub network_attempts: usize,
    pub network_blocked: usize,
    pub filesystem_reads: usize,
    pub filesystem_writes: usize,
    pub filesystem_blocked: usize,
    pub process_spawns: usize,
    pub process_blocked: usize,
    pub overall_status: AuditStatus,
}

impl SecuritySummary {
    pub fn from_events(events: &[SecurityEvent]) -> Self {
        let of = |kind: EventKind| events.iter().filter(move |e| e.kind == kind);

        Self {
            network_attempts: of(EventKind::Network).count(),
            network_blocked: of(EventKind::Network).filter(|e| !e.allowed).count(),
            filesystem_reads: of(EventKind::Filesystem)
                .filter(|e| e.action == EventAction::Read)
                .count(),
            filesystem_writes: of(EventKind::Filesystem)
                .filter(|e| e.action == EventAction::Write)
                .count(),
            filesystem_blocked: of(EventKind::Filesystem).filter(|e| !e.allowed).count(),
            process_spawns: of(EventKind::Process).count(),
            process_blocked: of(EventKind::Process).filter(|e| !e.allowed).count(),
            overall_status: if events.is_empty() {
                AuditStatus::Clean
            } else {
                AuditStatus::Violations
            },
        }
    }

    pub fn violations(&self) -> usize {
        self.network_blocked + self.filesystem_blocked + self.process_blocked
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAudit {
    pub events: Vec<SecurityEvent>,
    pub summary: SecuritySummary,
    pub policy: SecurityPolicy,
}

/// Scans run output against an ordered pattern table.
#[derive(Debug, Clone)]
pub struct AuditParser {
    patterns: Vec<AuditPattern>,
}

impl Default for AuditParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditParser {
    /// Parser with the built-in network, filesystem and process signatures.
    pub fn new() -> Self {
        use EventAction::*;
        use EventKind::*;
        use TargetExtractor as T;

        let patterns = vec![
            // DNS and connection failures
            AuditPattern::builtin(r"(?i)ENOTFOUND|ENETUNREACH|ECONNREFUSED|getaddrinfo", Network, Connect, T::Host),
            AuditPattern::builtin(r"(?i)fetch failed|network request failed", Network, Connect, T::Host),
            AuditPattern::builtin(r"(?i)socket hang up|ETIMEDOUT", Network, Connect, T::Host),
            AuditPattern::builtin(r"(?i)aborted|abort.*signal|signal.*abort", Network, Connect, T::Host),
            AuditPattern::builtin(
                r"(?i)network request.*api\.openai\.com|api\.openai\.com.*network",
                Network,
                Connect,
                T::Host,
            ),
            AuditPattern::builtin(r"(?i)Attempting network request to ([^\s.]+\.[^\s.]+)", Network, Connect, T::Host),
            // Filesystem denials
            AuditPattern::builtin(r#"(?i)EACCES.*?['"]([^'"]+)['"]"#, Filesystem, Blocked, T::Path),
            AuditPattern::builtin(r#"(?i)EROFS.*?['"]([^'"]+)['"]"#, Filesystem, Write, T::Path),
            AuditPattern::builtin(r#"(?i)ENOENT.*?['"]([^'"]+)['"]"#, Filesystem, Read, T::Path),
            AuditPattern::builtin(r#"(?i)permission denied.*?['"]?([/\w.-]+)['"]?"#, Filesystem, Blocked, T::Path),
            // Process spawning
            AuditPattern::builtin(r"(?i)spawn.*EACCES", Process, Spawn, T::Command),
            AuditPattern::builtin(r"(?i)child_process.*blocked", Process, Spawn, T::Command),
        ];

        Self { patterns }
    }

    /// Append a pattern after the built-in ones.
    pub fn with_pattern(mut self, pattern: AuditPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn parse(&self, stdout: &str, stderr: &str, policy: &SecurityPolicy) -> SecurityAudit {
        let combined = format!("{}\n{}", stdout, stderr);
        let now = Utc::now().timestamp_millis();

        let events: Vec<SecurityEvent> = self
            .patterns
            .iter()
            .flat_map(|pattern| {
                pattern.regex.captures_iter(&combined).map(move |caps| SecurityEvent {
                    kind: pattern.kind,
                    action: pattern.action,
                    target: pattern.target.extract(&caps),
                    timestamp: now,
                    allowed: false,
                    details: Some(caps[0].to_string()),
                })
            })
            .collect();

        let summary = SecuritySummary::from_events(&events);
        SecurityAudit {
            events,
            summary,
            policy: policy.clone(),
        }
    }
}

/// Audit a run's output with the built-in pattern table.
pub fn parse_audit(stdout: &str, stderr: &str, policy: &SecurityPolicy) -> SecurityAudit {
    AuditParser::new().parse(stdout, stderr, policy)
}

static HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:host|address|to)\s+['"]?([a-zA-Z0-9.-]+)['"]?"#).expect("valid host regex")
});
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)https?://([^/\s'"]+)"#).expect("valid url regex"));
static PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"['"]?(/[^\s'"]+)['"]?"#).expect("valid path regex"));
static COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)spawn\s+['"]?(\w+)['"]?"#).expect("valid command regex"));

fn extract_host(text: &str) -> Option<String> {
    if let Some(caps) = HOST.captures(text) {
        return Some(caps[1].to_string());
    }
    URL.captures(text).map(|caps| caps[1].to_string())
}

fn extract_path(text: &str) -> Option<String> {
    PATH.captures(text).map(|caps| caps[1].to_string())
}

fn extract_command(text: &str) -> Option<String> {
    COMMAND.captures(text).map(|caps| caps[1].to_string())
}

/// Plain-text rendering of an audit.
pub fn format_security_audit(audit: &SecurityAudit) -> String {
    let mut lines = vec![String::new(), "  SECURITY AUDIT".to_string(), String::new()];

    let policy = &audit.policy;
    lines.push("  Policy:".to_string());
    lines.push(format!(
        "    Network: {}",
        if policy.network.enabled { "enabled" } else { "blocked" }
    ));
    lines.push(format!(
        "    Filesystem: {}",
        if policy.filesystem.read_only { "read-only" } else { "read-write" }
    ));
    lines.push(format!(
        "    Process spawn: {}",
        if policy.process.allow_spawn { "allowed" } else { "blocked" }
    ));
    lines.push(String::new());

    if audit.events.is_empty() {
        lines.push("  ✓ No security events detected".to_string());
    } else {
        lines.push("  Events (heuristic, from captured output):".to_string());
        for (kind, title) in [
            (EventKind::Network, "Network"),
            (EventKind::Filesystem, "Filesystem"),
            (EventKind::Process, "Process"),
        ] {
            let events: Vec<&SecurityEvent> = audit.events.iter().filter(|e| e.kind == kind).collect();
            if events.is_empty() {
                continue;
            }
            lines.push(String::new());
            lines.push(format!("  {}", title));
            for event in events {
                let (icon, status) = if event.allowed { ("✓", "allowed") } else { ("✗", "blocked") };
                lines.push(format!("    {} {}: {} ({})", icon, event.action, event.target, status));
            }
        }
    }

    lines.push(String::new());
    lines.push("─".repeat(50));
    match audit.summary.overall_status {
        AuditStatus::Clean => lines.push("  ✓ Security Status: CLEAN".to_string()),
        AuditStatus::Violations => lines.push(format!(
            "  ✗ Security Status: {} VIOLATION(S) BLOCKED",
            audit.summary.violations()
        )),
    }
    lines.push(String::new());

    lines.join("\n")
}

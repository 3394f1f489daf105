pub mod audit;
pub mod policy;

pub use audit::{
    format_security_audit, parse_audit, AuditParser, AuditPattern, AuditStatus, EventAction,
    EventKind, SecurityAudit, SecurityEvent, SecuritySummary, TargetExtractor,
};
pub use policy::{
    load_policy_file, parse_policy, policy_to_engine_flags, FilesystemPolicy, NetworkPolicy,
    ProcessPolicy, SecurityPolicy, POLICY_FILES,
};

/// Event types for the check-in audit trail
pub mod audit_events {
    // Session lifecycle
    pub const SESSION_OPENED: &str = "session_opened";
    pub const SESSION_CLOSED: &str = "session_closed";
    pub const SESSIONS_SWEPT: &str = "sessions_swept";

    // Credential lifecycle
    pub const CREDENTIAL_ISSUED: &str = "credential_issued";
    pub const CREDENTIAL_ISSUE_DENIED: &str = "credential_issue_denied";
    pub const CREDENTIALS_SWEPT: &str = "credentials_swept";

    // Redemption outcomes
    pub const REDEMPTION_RECORDED: &str = "redemption_recorded";
    pub const REDEMPTION_DUPLICATE: &str = "redemption_duplicate";
    pub const REDEMPTION_THROTTLED: &str = "redemption_throttled";
    pub const REDEMPTION_REJECTED: &str = "redemption_rejected";
}

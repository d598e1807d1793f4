/// Name of the variable selecting the deployment environment.
pub const ENV_VAR: &str = "CAMPUS_ENV";

/// True when running with `CAMPUS_ENV=production`.
///
/// Production hides internal error details from clients and switches logs to JSON.
pub fn is_production() -> bool {
    std::env::var(ENV_VAR)
        .map(|v| v.eq_ignore_ascii_case("production"))
        .unwrap_or(false)
}

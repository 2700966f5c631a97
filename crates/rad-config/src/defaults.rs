/// Default log filter expression used by the server.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Configuration item naming the module kind of an instance section.
pub const MODULE_KIND_ITEM: &str = "module";

/// Configuration item naming the namespace of a virtual server section.
pub const NAMESPACE_ITEM: &str = "namespace";

/// Default log filter expression used by the server.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the server.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

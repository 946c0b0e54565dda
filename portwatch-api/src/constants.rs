pub const DEFAULT_CONFIG_PATH: &str = "/etc/portwatch/portwatch.yaml";
pub const DEFAULT_DATA_DIR: &str = "/var/lib/portwatch";
pub const DEFAULT_SOCKET_PATH: &str = "/run/portwatch/portwatch.sock";
pub const DEFAULT_RETENTION_DAYS: u32 = 180;

/// The socket is world-connectable so unprivileged clients can query the
/// daemon; all mutation still goes through the daemon itself.
pub const SOCK_MODE: u32 = 0o0666;
pub const SOCK_DIR_MODE: u32 = 0o0755;

/// Maximum message content length in bytes (4 KiB)
pub const MAX_CONTENT_LEN: usize = 4096;

/// Maximum number of media attachments on a single message
pub const MAX_ATTACHMENTS: usize = 10;

/// Default page size for message history queries
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Maximum page size a client may request
pub const MAX_PAGE_SIZE: u32 = 200;

/// Push-notification previews truncate message content to this many characters
pub const PUSH_PREVIEW_LEN: usize = 80;

/// Per-connection outbound event buffer (events queued for a slow socket)
pub const OUTBOUND_BUFFER: usize = 256;

/// Key derivation context (BLAKE3) for integrity tokens
pub const KDF_CONTEXT_INTEGRITY: &str = "causerie-integrity-token-v1";

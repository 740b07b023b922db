//! Command and status code spaces
//!
//! Command codes live in the `0xC000_xxxx` range; the matching response code
//! is the command code plus [`crate::wire::RESPONSE_CODE_OFFSET`]. Statuses
//! with the top three bits set are categorized errors; `0xFFFF_FFFF` is the
//! uncategorized catch-all.

/// List the command codes a peer supports.
pub const CMD_ENUM_COMMANDS: u32 = 0xC000_0000;
/// Present the shutdown token; a byte-exact match stops the relay.
pub const CMD_EXECUTE_TOKEN: u32 = 0xC000_0001;
/// Relay → resource handshake challenge.
pub const CMD_WHO_ARE_YOU: u32 = 0xC000_0002;
/// Relay → resource proof of the relay's own identity.
pub const CMD_RELAY_SIGN: u32 = 0xC000_0003;
/// List registered resources.
pub const CMD_LIST_RESOURCES: u32 = 0xC000_0010;
/// Resolve an identity to a live session handle.
pub const CMD_IS_RESOURCE_PRESENT: u32 = 0xC000_0011;
/// Resolve an identity to its full record.
pub const CMD_GET_RESOURCE_INFO: u32 = 0xC000_0012;
/// Forward a payload to a resource addressed by identity.
pub const CMD_SEND_TO: u32 = 0xC000_0020;
/// Forward a payload to a resource addressed by handle.
pub const CMD_SEND: u32 = 0xC000_0021;
/// Forward an opaque cryptogram to a resource addressed by handle.
pub const CMD_SEND_ENCRYPTED: u32 = 0xC000_0022;
/// Forward an opaque secure-messaging init blob addressed by handle.
pub const CMD_INIT_SM: u32 = 0xC000_0023;

/// Commands accepted on the relay's user port.
pub const USER_COMMANDS: &[u32] = &[
    CMD_ENUM_COMMANDS,
    CMD_EXECUTE_TOKEN,
    CMD_LIST_RESOURCES,
    CMD_IS_RESOURCE_PRESENT,
    CMD_GET_RESOURCE_INFO,
    CMD_SEND_TO,
    CMD_SEND,
    CMD_SEND_ENCRYPTED,
    CMD_INIT_SM,
];

/// True if responses with this code carry a forward envelope back from a
/// resource (the relay demultiplexes these to the originating user).
pub fn is_forward_code(code: u32) -> bool {
    matches!(
        code,
        CMD_SEND | CMD_SEND_ENCRYPTED | CMD_INIT_SM
    )
}

pub const STATUS_OK: u32 = 0x0000_0000;

/// Mask marking a categorized protocol/business error status.
pub const STATUS_ERROR_MASK: u32 = 0xE000_0000;

pub const STATUS_COMMAND_NOT_SUPPORTED: u32 = 0xE000_0001;
pub const STATUS_WRONG_SYNTAX: u32 = 0xE000_0002;
pub const STATUS_RESOURCE_NOT_FOUND: u32 = 0xE000_0003;
pub const STATUS_PEER_GONE: u32 = 0xE000_0004;
pub const STATUS_ACCESS_DENIED: u32 = 0xE000_0005;
pub const STATUS_HANDLER_FAILED: u32 = 0xE000_0006;

/// Uncategorized failure.
pub const STATUS_UNCATEGORIZED: u32 = 0xFFFF_FFFF;

/// True for any non-OK status.
pub fn is_error_status(status: u32) -> bool {
    status != STATUS_OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::response_code;

    #[test]
    fn test_status_classification() {
        assert!(!is_error_status(STATUS_OK));
        assert!(is_error_status(STATUS_COMMAND_NOT_SUPPORTED));
        assert!(is_error_status(STATUS_UNCATEGORIZED));
        assert_eq!(
            STATUS_RESOURCE_NOT_FOUND & STATUS_ERROR_MASK,
            STATUS_ERROR_MASK
        );
    }

    #[test]
    fn test_forward_codes() {
        assert!(is_forward_code(CMD_SEND));
        assert!(is_forward_code(CMD_SEND_ENCRYPTED));
        assert!(is_forward_code(CMD_INIT_SM));
        assert!(!is_forward_code(CMD_SEND_TO));
        assert!(!is_forward_code(CMD_ENUM_COMMANDS));
    }

    #[test]
    fn test_user_commands_distinct() {
        for (i, a) in USER_COMMANDS.iter().enumerate() {
            for b in &USER_COMMANDS[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_response_codes_do_not_collide_with_commands() {
        for code in USER_COMMANDS {
            assert!(!USER_COMMANDS.contains(&response_code(*code)));
        }
    }
}

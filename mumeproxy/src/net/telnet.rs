//! Telnet protocol constants.
//!
//! See [RFC 854](https://tools.ietf.org/html/rfc854) for the command
//! structure and [RFC 2066](https://tools.ietf.org/html/rfc2066) for the
//! CHARSET option.

/// IAC prefixed telnet command codes.
pub mod command {
    /// End of subnegotiation parameters.
    pub const SE: u8 = 240;
    /// Go ahead: the game uses this to terminate prompts.
    pub const GA: u8 = 249;
    /// Subnegotiation begin.
    pub const SB: u8 = 250;
    pub const WILL: u8 = 251;
    pub const WONT: u8 = 252;
    pub const DO: u8 = 253;
    pub const DONT: u8 = 254;
    /// Interpret-As-Command escape.
    pub const IAC: u8 = 255;
}

/// Telnet option codes.
pub mod option {
    /// Terminal type.
    pub const TTYPE: u8 = 24;
    /// Negotiate about window size.
    pub const NAWS: u8 = 31;
    /// Character set negotiation.
    pub const CHARSET: u8 = 42;
}

/// CHARSET subnegotiation codes (RFC 2066 §3).
pub mod charset {
    pub const REQUEST: u8 = 1;
    pub const ACCEPTED: u8 = 2;
    pub const REJECTED: u8 = 3;
    pub const TTABLE_IS: u8 = 4;
    pub const TTABLE_REJECTED: u8 = 5;
    pub const TTABLE_ACK: u8 = 6;
    pub const TTABLE_NAK: u8 = 7;
}

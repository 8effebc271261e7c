//! Shared type definitions for the compiler and the matching engine.

use std::fmt;

/// Action a filter carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FilterAction {
    /// Block rule - cancels the request
    Block = 0,
    /// Exception rule (@@...) - allows the request
    Allow = 1,
    /// Block, answering with a neutered surrogate resource ($redirect=)
    Redirect = 2,
    /// Strip named URL parameters instead of blocking ($removeparam=)
    Removeparam = 3,
}

impl TryFrom<u8> for FilterAction {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Block),
            1 => Ok(Self::Allow),
            2 => Ok(Self::Redirect),
            3 => Ok(Self::Removeparam),
            _ => Err(()),
        }
    }
}

/// How a pattern is anchored against the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PatternKind {
    /// Plain substring, may occur anywhere
    #[default]
    Plain = 0,
    /// `||` - anchored at a hostname label boundary
    Hostname = 1,
    /// `|pattern` - anchored at the start of the URL
    Left = 2,
    /// `pattern|` - anchored at the end of the URL
    Right = 3,
    /// `|pattern|` - anchored at both ends
    Both = 4,
    /// `/pattern/` - regular expression, never token-indexed
    Regex = 5,
}

impl TryFrom<u8> for PatternKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Plain),
            1 => Ok(Self::Hostname),
            2 => Ok(Self::Left),
            3 => Ok(Self::Right),
            4 => Ok(Self::Both),
            5 => Ok(Self::Regex),
            _ => Err(()),
        }
    }
}

bitflags::bitflags! {
    /// Request type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RequestType: u16 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const DOCUMENT = 1 << 4;
        const SUBDOCUMENT = 1 << 5;
        const XHR = 1 << 6;
        const FONT = 1 << 7;
        const MEDIA = 1 << 8;
        const WEBSOCKET = 1 << 9;
        const PING = 1 << 10;

        /// All request types
        const ALL = (1 << 11) - 1;
    }
}

impl RequestType {
    /// Parse a browser-style request type name. Unknown names map to
    /// OTHER, matching how hosts report exotic request kinds.
    pub fn parse_name(s: &str) -> Self {
        match s {
            "main_frame" | "document" => Self::DOCUMENT,
            "sub_frame" | "subdocument" => Self::SUBDOCUMENT,
            "stylesheet" => Self::STYLESHEET,
            "script" => Self::SCRIPT,
            "image" => Self::IMAGE,
            "font" => Self::FONT,
            "media" => Self::MEDIA,
            "websocket" => Self::WEBSOCKET,
            "ping" | "beacon" => Self::PING,
            "xmlhttprequest" | "xhr" | "fetch" => Self::XHR,
            _ => Self::OTHER,
        }
    }
}

bitflags::bitflags! {
    /// Party (first-party / third-party) mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PartyMask: u8 {
        const FIRST_PARTY = 1 << 0;
        const THIRD_PARTY = 1 << 1;
        const ALL = Self::FIRST_PARTY.bits() | Self::THIRD_PARTY.bits();
    }
}

bitflags::bitflags! {
    /// Per-entry behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntryFlags: u8 {
        /// $important - block wins over exception filters
        const IMPORTANT = 1 << 0;
        /// $badfilter - deactivates the filter with the same signature
        const BADFILTER = 1 << 1;
        /// $match-case - pattern matches case-sensitively
        const MATCH_CASE = 1 << 2;
    }
}

/// One request to evaluate, as handed over by the host's pipeline.
#[derive(Debug, Clone)]
pub struct RequestDescriptor<'a> {
    /// Full request URL
    pub url: &'a str,
    /// Request type as reported by the host
    pub request_type: RequestType,
    /// Hostname of the document that initiated the request
    pub initiator_host: &'a str,
}

impl<'a> RequestDescriptor<'a> {
    pub fn new(url: &'a str, request_type: RequestType, initiator_host: &'a str) -> Self {
        Self {
            url,
            request_type,
            initiator_host,
        }
    }
}

/// Outcome of one `match_request` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAction {
    /// No filter matched; the host proceeds as usual
    None,
    /// A block filter won
    Block,
    /// An exception filter won
    Allow,
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Block => f.write_str("block"),
            Self::Allow => f.write_str("allow"),
        }
    }
}

/// Diagnostic summary of the entry that decided a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedFilter {
    /// Filter text reconstructed from the compiled entry
    pub filter: String,
    /// Identity of the list the entry came from
    pub list_id: u16,
    /// Action recorded on the winning entry
    pub action: FilterAction,
}

/// Final decision for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: DecisionAction,
    /// Winning entry, for the host's logging. None when action is None.
    pub matched: Option<MatchedFilter>,
}

impl Decision {
    pub const fn none() -> Self {
        Self {
            action: DecisionAction::None,
            matched: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.action == DecisionAction::Block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_type_names() {
        assert_eq!(RequestType::parse_name("script"), RequestType::SCRIPT);
        assert_eq!(RequestType::parse_name("fetch"), RequestType::XHR);
        assert_eq!(RequestType::parse_name("weird"), RequestType::OTHER);
    }

    #[test]
    fn all_mask_covers_every_bit() {
        assert!(RequestType::ALL.contains(RequestType::PING));
        assert!(RequestType::ALL.contains(RequestType::OTHER));
    }

    #[test]
    fn action_round_trip() {
        for a in [
            FilterAction::Block,
            FilterAction::Allow,
            FilterAction::Redirect,
            FilterAction::Removeparam,
        ] {
            assert_eq!(FilterAction::try_from(a as u8), Ok(a));
        }
        assert!(FilterAction::try_from(9).is_err());
    }
}

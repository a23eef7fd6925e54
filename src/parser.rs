//! Log line parser for connect/disconnect events
//!
//! Two line shapes are recognized, both produced by the game server:
//!
//! - `<ts> ...GameConnection::postConnectRoutine>... IP:<ip>:<port>  <acctid>`
//! - `<ts> ...NetInterface::sendDisconnectPacket...IP:<ip>`
//!
//! Disconnect lines carry no account id; those events stay unattributed.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::error::ParseError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const CONNECT_PATTERN: &str = r"(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3}) .+GameConnection::postConnectRoutine>.* IP:(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):\d*  (\d+)";

const DISCONNECT_PATTERN: &str = r"(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3}) .+NetInterface::sendDisconnectPacket.+IP:(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})";

/// One event extracted from a log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEvent {
    Connect {
        timestamp: DateTime<Utc>,
        ipaddr: String,
        acctid: i64,
    },
    Disconnect {
        timestamp: DateTime<Utc>,
        ipaddr: String,
    },
}

pub struct LineParser {
    connect: Regex,
    disconnect: Regex,
}

impl LineParser {
    pub fn new() -> Self {
        Self {
            // Both patterns are compile-time constants, so new() cannot fail
            connect: Regex::new(CONNECT_PATTERN).unwrap(),
            disconnect: Regex::new(DISCONNECT_PATTERN).unwrap(),
        }
    }

    /// Extract every recognized event from one line. Lines matching neither
    /// pattern yield an empty vec. A match whose timestamp field does not
    /// parse fails the whole line with [`ParseError`].
    pub fn parse(&self, line: &str) -> Result<Vec<ParsedEvent>, ParseError> {
        let mut events = Vec::new();

        for caps in self.connect.captures_iter(line) {
            let timestamp = parse_timestamp(&caps[1])?;
            events.push(ParsedEvent::Connect {
                timestamp,
                ipaddr: caps[2].to_string(),
                // The pattern only admits digits
                acctid: caps[3].parse().unwrap_or(0),
            });
        }

        for caps in self.disconnect.captures_iter(line) {
            let timestamp = parse_timestamp(&caps[1])?;
            events.push(ParsedEvent::Disconnect {
                timestamp,
                ipaddr: caps[2].to_string(),
            });
        }

        Ok(events)
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, ParseError> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|source| ParseError {
            text: text.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const CONNECT_LINE: &str = "2020-05-17 03:20:04.123 T<5124> I GameConnection::postConnectRoutine> connected IP:127.0.0.1:5000  12345";
    const DISCONNECT_LINE: &str = "2020-05-17 03:21:09.456 T<5124> I NetInterface::sendDisconnectPacket to IP:127.0.0.1";

    #[test]
    fn parses_connect_line() {
        let parser = LineParser::new();
        let events = parser.parse(CONNECT_LINE).unwrap();

        assert_eq!(
            events,
            vec![ParsedEvent::Connect {
                timestamp: Utc
                    .with_ymd_and_hms(2020, 5, 17, 3, 20, 4)
                    .unwrap()
                    .checked_add_signed(chrono::Duration::milliseconds(123))
                    .unwrap(),
                ipaddr: "127.0.0.1".to_string(),
                acctid: 12345,
            }]
        );
    }

    #[test]
    fn parses_disconnect_line_without_account() {
        let parser = LineParser::new();
        let events = parser.parse(DISCONNECT_LINE).unwrap();

        assert_eq!(
            events,
            vec![ParsedEvent::Disconnect {
                timestamp: Utc
                    .with_ymd_and_hms(2020, 5, 17, 3, 21, 9)
                    .unwrap()
                    .checked_add_signed(chrono::Duration::milliseconds(456))
                    .unwrap(),
                ipaddr: "127.0.0.1".to_string(),
            }]
        );
    }

    #[test]
    fn ignores_unrecognized_lines() {
        let parser = LineParser::new();
        assert!(parser.parse("").unwrap().is_empty());
        assert!(parser
            .parse("2020-05-17 03:20:04.123 T<5124> I World::tick> heartbeat")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn rejects_malformed_timestamp_in_matched_line() {
        let parser = LineParser::new();
        // Matches the outer pattern but the month field is out of range
        let line = "2020-13-17 03:20:04.123 T<1> I GameConnection::postConnectRoutine> IP:127.0.0.1:5000  12345";
        assert!(parser.parse(line).is_err());
    }

    #[test]
    fn parse_is_deterministic() {
        let parser = LineParser::new();
        let first = parser.parse(CONNECT_LINE).unwrap();
        let second = parser.parse(CONNECT_LINE).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn emits_all_matches_on_one_line() {
        let parser = LineParser::new();
        let line = format!("{} {}", CONNECT_LINE, DISCONNECT_LINE);
        let events = parser.parse(&line).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ParsedEvent::Connect { .. }));
        assert!(matches!(events[1], ParsedEvent::Disconnect { .. }));
    }
}

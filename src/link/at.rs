//! # AT Command Codec
//!
//! Builds commands for, and parses lines from, a LoRaWAN modem speaking a
//! RUI3-style AT dialect.
//!
//! ## Commands
//!
//! | Purpose | Command |
//! |---------|---------|
//! | OTAA mode | `AT+NJM=1` |
//! | Identity | `AT+DEVEUI=<hex>`, `AT+APPEUI=<hex>`, `AT+APPKEY=<hex>` |
//! | Join | `AT+JOIN=1:0:10:<trials>` |
//! | Confirmed retries | `AT+RETY=<n>` |
//! | ADR | `AT+ADR=<0/1>` |
//! | Confirmation | `AT+CFM=<0/1>` |
//! | Uplink | `AT+SEND=<port>:<hex>` |
//!
//! ## Unsolicited lines
//!
//! ```text
//! +EVT:JOINED
//! +EVT:JOIN_FAILED_RX_TIMEOUT
//! +EVT:TX_DONE
//! +EVT:SEND_CONFIRMED_OK
//! +EVT:SEND_CONFIRMED_FAILED(4)
//! +EVT:RX_1:-70:8:UNICAST:15:0102
//! ```

use super::protocol::OtaaParams;

/// Line terminator expected by the modem
pub const AT_LINE_END: &str = "\r\n";

/// Prefix of unsolicited event lines
const EVENT_PREFIX: &str = "+EVT:";

/// One parsed line received from the modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemLine {
    /// Command accepted
    Ok,
    /// Command rejected with the given error token
    Error(String),
    /// Radio busy, the command was not executed
    Busy,
    /// Uplink attempted without a session
    NoNetworkJoined,
    /// OTAA join completed
    Joined,
    /// OTAA join gave up
    JoinFailed,
    /// Unconfirmed uplink left the radio
    TxDone,
    /// Confirmed uplink acknowledged (`true`) or retries exhausted (`false`)
    SendConfirmed(bool),
    /// Downlink payload received on an application port
    Downlink { port: u8, payload: Vec<u8> },
    /// `+EVT:` line this codec does not recognise
    UnknownEvent(String),
    /// Anything else (echo, version banners, query answers)
    Other(String),
}

/// Parse one line from the modem
///
/// Returns `None` for blank lines.
pub fn parse_line(line: &str) -> Option<ModemLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(event) = line.strip_prefix(EVENT_PREFIX) {
        return Some(parse_event(event));
    }

    let parsed = match line {
        "OK" => ModemLine::Ok,
        "AT_BUSY_ERROR" => ModemLine::Busy,
        "AT_NO_NETWORK_JOINED" => ModemLine::NoNetworkJoined,
        other if other.starts_with("AT_") && other.ends_with("ERROR") => {
            ModemLine::Error(other.to_string())
        }
        other => ModemLine::Other(other.to_string()),
    };
    Some(parsed)
}

fn parse_event(event: &str) -> ModemLine {
    match event {
        "JOINED" => ModemLine::Joined,
        "TX_DONE" => ModemLine::TxDone,
        "SEND_CONFIRMED_OK" => ModemLine::SendConfirmed(true),
        e if e.starts_with("JOIN_FAILED") => ModemLine::JoinFailed,
        e if e.starts_with("SEND_CONFIRMED_FAILED") => ModemLine::SendConfirmed(false),
        e if e.starts_with("RX_") => {
            parse_downlink(e).unwrap_or_else(|| ModemLine::UnknownEvent(e.to_string()))
        }
        e => ModemLine::UnknownEvent(e.to_string()),
    }
}

/// `RX_<window>:<rssi>:<snr>:<cast>:<port>:<hex>`; the payload may be empty
fn parse_downlink(event: &str) -> Option<ModemLine> {
    let mut fields = event.rsplitn(3, ':');
    let payload_hex = fields.next()?;
    let port = fields.next()?.parse::<u8>().ok()?;
    fields.next()?;

    let payload = hex::decode(payload_hex).ok()?;
    Some(ModemLine::Downlink { port, payload })
}

/// Commands configuring identity and starting an OTAA join
pub fn join_commands(params: &OtaaParams) -> Vec<String> {
    let identity = &params.identity;
    vec![
        "AT+NJM=1".to_string(),
        format!("AT+DEVEUI={}", hex::encode_upper(identity.dev_eui)),
        format!("AT+APPEUI={}", hex::encode_upper(identity.app_eui)),
        format!("AT+APPKEY={}", hex::encode_upper(identity.app_key)),
        format!("AT+JOIN=1:0:10:{}", params.nb_trials),
    ]
}

/// Commands scheduling one uplink
pub fn send_commands(port: u8, data: &[u8], confirmed: bool) -> Vec<String> {
    vec![
        format!("AT+CFM={}", u8::from(confirmed)),
        format!("AT+SEND={}:{}", port, hex::encode_upper(data)),
    ]
}

pub fn confirmed_retries_command(count: u8) -> String {
    format!("AT+RETY={}", count)
}

pub fn adaptive_datarate_command(enabled: bool) -> String {
    format!("AT+ADR={}", u8::from(enabled))
}
